//! Batched tensor containers exchanged with the model backend

use shardlet_core::{ShardletError, ShardletResult};

/// Row-major `[rows, width]` matrix of token ids fed to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBatch {
    width: usize,
    rows: usize,
    data: Vec<i64>,
}

impl InputBatch {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: 0,
            data: Vec::new(),
        }
    }

    /// Append a row, returning its index
    pub fn push_row(&mut self, row: Vec<i64>) -> ShardletResult<usize> {
        if row.len() != self.width {
            return Err(ShardletError::Internal(format!(
                "row of length {} does not match input width {}",
                row.len(),
                self.width
            )));
        }
        let index = self.rows;
        self.data.extend(row);
        self.rows += 1;
        Ok(index)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> Option<&[i64]> {
        if index >= self.rows {
            return None;
        }
        let start = index.checked_mul(self.width)?;
        self.data.get(start..start + self.width)
    }

    /// Flat row-major view
    pub fn as_slice(&self) -> &[i64] {
        &self.data
    }
}

/// Row-major `[rows, cols]` matrix of scores returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBatch {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl OutputBatch {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> ShardletResult<Self> {
        if rows * cols != data.len() {
            return Err(ShardletError::ModelExecution(format!(
                "output of {} values does not fit shape [{}, {}]",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from equally sized rows
    pub fn from_rows(rows: Vec<Vec<f32>>) -> ShardletResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(ShardletError::ModelExecution(
                "output rows have differing lengths".to_string(),
            ));
        }
        let count = rows.len();
        Self::new(count, cols, rows.into_iter().flatten().collect())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        self.data.get(start..start + self.cols)
    }
}
