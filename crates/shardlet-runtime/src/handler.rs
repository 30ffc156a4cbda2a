//! Batch handler: preprocess, one model invocation, postprocess
//!
//! Every request that enters a batch leaves with exactly one response.
//! Request-scoped failures become error responses without touching their
//! siblings; a failed model invocation fails every slot that reached it
//! and leaves earlier preprocess errors untouched.

use shardlet_core::{
    BatchingConfig, DecisionRule, LabelMap, ModelArtifacts, OversizePolicy, Request, Response,
    ShardletError, ShardletResult, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::runner::ModelRunner;
use crate::tensor::{InputBatch, OutputBatch};
use crate::traits::Tokenizer;

/// Request that reached the model input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    /// Position of the request in its batch
    pub position: usize,
    /// Id of the request
    pub request_id: String,
}

/// Dense slot index to request mapping, in input row order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    entries: Vec<SlotEntry>,
}

impl SlotMap {
    fn push(&mut self, position: usize, request_id: String) -> usize {
        self.entries.push(SlotEntry {
            position,
            request_id,
        });
        self.entries.len() - 1
    }

    pub fn get(&self, slot: usize) -> Option<&SlotEntry> {
        self.entries.get(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(slot, entry)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SlotEntry)> {
        self.entries.iter().enumerate()
    }
}

/// Output of the preprocess stage
#[derive(Debug)]
pub struct Preprocessed {
    /// Rows for every request that preprocessed successfully
    pub input: InputBatch,
    /// Slot of each row
    pub slots: SlotMap,
    /// Terminal responses already decided, indexed by batch position
    pub responses: Vec<Option<Response>>,
}

/// Result of handling one batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// One response per request, in batch order
    pub responses: Vec<Response>,
    /// Batch-scoped failure (model execution or timeout), if any
    pub fatal: Option<ShardletError>,
}

/// Per-worker batch pipeline owning the worker's model runner
pub struct BatchHandler {
    worker_index: u32,
    runner: Arc<ModelRunner>,
    tokenizer: Arc<dyn Tokenizer>,
    labels: LabelMap,
    decision_rule: DecisionRule,
    batching: BatchingConfig,
    /// Inference abandoned by a timeout, still running on the blocking pool
    in_flight: Option<JoinHandle<ShardletResult<OutputBatch>>>,
}

impl BatchHandler {
    /// Create a handler; `artifacts` overrides of the batching settings apply
    pub fn new(
        worker_index: u32,
        runner: ModelRunner,
        tokenizer: Arc<dyn Tokenizer>,
        artifacts: &ModelArtifacts,
        batching: &BatchingConfig,
    ) -> Self {
        Self {
            worker_index,
            runner: Arc::new(runner),
            tokenizer,
            labels: artifacts.labels.clone(),
            decision_rule: artifacts.config.decision_rule,
            batching: artifacts.effective_batching(batching),
            in_flight: None,
        }
    }

    /// Effective batching settings
    pub fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    /// Whether a timed-out inference is still running
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Reject batches that cannot be processed at all
    pub fn validate_batch(&self, batch: &[Request]) -> ShardletResult<()> {
        if batch.is_empty() {
            return Err(ShardletError::InvalidBatch("batch is empty".to_string()));
        }
        if batch.len() > self.batching.max_batch_size {
            return Err(ShardletError::InvalidBatch(format!(
                "batch of {} requests exceeds max_batch_size {}",
                batch.len(),
                self.batching.max_batch_size
            )));
        }
        let mut seen = HashSet::with_capacity(batch.len());
        for request in batch {
            if !seen.insert(request.request_id.as_str()) {
                return Err(ShardletError::InvalidBatch(format!(
                    "duplicate request id: {}",
                    request.request_id
                )));
            }
        }
        Ok(())
    }

    /// Handle one batch end to end.
    ///
    /// Returns `Err` only when the batch is rejected as a whole before any
    /// request is processed.
    pub async fn handle(&mut self, batch: Vec<Request>) -> ShardletResult<BatchOutcome> {
        self.validate_batch(&batch)?;
        self.drain_in_flight().await;

        let deadline = Instant::now() + self.batching.response_timeout();
        let Preprocessed {
            input,
            slots,
            mut responses,
        } = self.preprocess(&batch);

        let fatal = if slots.is_empty() {
            debug!(
                worker_index = self.worker_index,
                "No request survived preprocess, skipping inference"
            );
            None
        } else {
            let inferred = self
                .infer(input, deadline)
                .await
                .and_then(|output| check_deadline(deadline, "postprocess").map(|_| output));
            match inferred {
                Ok(output) => {
                    self.postprocess(&output, &slots, &mut responses);
                    None
                }
                Err(e) => {
                    error!(
                        worker_index = self.worker_index,
                        slots = slots.len(),
                        error = %e,
                        "Batch inference failed"
                    );
                    for (_, entry) in slots.iter() {
                        responses[entry.position] = Some(Response::error(&entry.request_id, &e));
                    }
                    Some(e)
                }
            }
        };

        let responses = batch
            .iter()
            .zip(responses)
            .map(|(request, response)| {
                response.unwrap_or_else(|| {
                    Response::error(
                        &request.request_id,
                        &ShardletError::Internal("no response produced".to_string()),
                    )
                })
            })
            .collect();

        Ok(BatchOutcome { responses, fatal })
    }

    /// Convert every request into an input row or a terminal response
    pub fn preprocess(&self, batch: &[Request]) -> Preprocessed {
        let mut input = InputBatch::new(self.batching.max_length);
        let mut slots = SlotMap::default();
        let mut responses = vec![None; batch.len()];

        for (position, request) in batch.iter().enumerate() {
            let row = self
                .preprocess_request(request)
                .and_then(|row| input.push_row(row));

            match row {
                Ok(_) => {
                    let slot = slots.push(position, request.request_id.clone());
                    debug!(request_id = %request.request_id, slot = slot, "Request preprocessed");
                }
                Err(e) => {
                    error!(
                        request_id = %request.request_id,
                        error = %e,
                        "Failed to preprocess request"
                    );
                    responses[position] = Some(Response::error(&request.request_id, &e));
                }
            }
        }

        Preprocessed {
            input,
            slots,
            responses,
        }
    }

    /// Turn one request into a fixed-width row of token ids
    pub fn preprocess_request(&self, request: &Request) -> ShardletResult<Vec<i64>> {
        let (data, _data_type) = request.payload().ok_or_else(|| {
            ShardletError::Payload(format!(
                "Empty payload for request id: {}",
                request.request_id
            ))
        })?;

        let text = std::str::from_utf8(data)
            .map_err(|e| ShardletError::Decode(format!("payload is not valid UTF-8: {}", e)))?;
        let tokens = self.tokenizer.encode(text)?;
        self.normalize(tokens)
    }

    /// Pad or bound a token sequence to exactly `max_length`
    pub fn normalize(&self, mut tokens: Vec<i64>) -> ShardletResult<Vec<i64>> {
        let max_length = self.batching.max_length;
        if tokens.len() > max_length {
            match self.batching.oversize_policy {
                OversizePolicy::Truncate => {
                    warn!(
                        tokens = tokens.len(),
                        max_length = max_length,
                        "Prompt too long, truncating"
                    );
                    tokens.truncate(max_length);
                }
                OversizePolicy::Reject => {
                    return Err(ShardletError::Decode(format!(
                        "prompt too long ({} tokens, max {})",
                        tokens.len(),
                        max_length
                    )));
                }
            }
        } else {
            tokens.resize(max_length, self.batching.pad_id);
        }
        Ok(tokens)
    }

    async fn infer(&mut self, input: InputBatch, deadline: Instant) -> ShardletResult<OutputBatch> {
        let remaining = check_deadline(deadline, "inference")?;

        let runner = Arc::clone(&self.runner);
        let mut task = tokio::task::spawn_blocking(move || runner.run(&input));

        match tokio::time::timeout(remaining, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ShardletError::ModelExecution(format!(
                "inference task failed: {}",
                e
            ))),
            Err(_) => {
                // The runner call cannot be preempted; keep it so the next
                // batch waits for the devices to be released.
                self.in_flight = Some(task);
                Err(ShardletError::Timeout(format!(
                    "batch exceeded response timeout of {}ms",
                    self.batching.response_timeout_ms
                )))
            }
        }
    }

    async fn drain_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            warn!(
                worker_index = self.worker_index,
                "Waiting for timed-out inference to finish"
            );
            if let Err(e) = task.await {
                warn!(
                    worker_index = self.worker_index,
                    error = %e,
                    "Timed-out inference task failed"
                );
            }
        }
    }

    /// Build a success response for every slot, isolating per-slot failures
    pub fn postprocess(
        &self,
        output: &OutputBatch,
        slots: &SlotMap,
        responses: &mut [Option<Response>],
    ) {
        for (slot, entry) in slots.iter() {
            let result = output
                .row(slot)
                .ok_or_else(|| {
                    ShardletError::Postprocess(format!("no output row for slot {}", slot))
                })
                .and_then(|row| self.postprocess_row(row));

            responses[entry.position] = Some(match result {
                Ok((content_type, body)) => Response::ok(&entry.request_id, content_type, body),
                Err(e) => {
                    error!(
                        request_id = %entry.request_id,
                        error = %e,
                        "Failed to postprocess output"
                    );
                    Response::error(&entry.request_id, &e)
                }
            });
        }
    }

    /// Apply the decision rule to one output row
    pub fn postprocess_row(&self, row: &[f32]) -> ShardletResult<(&'static str, String)> {
        match self.decision_rule {
            DecisionRule::ArgMax => {
                let index = argmax(row)?;
                let label = self.labels.label(index).ok_or_else(|| {
                    ShardletError::Postprocess(format!("no label for class index {}", index))
                })?;
                Ok((CONTENT_TYPE_TEXT, label.to_string()))
            }
            DecisionRule::PassThrough => {
                let body = serde_json::to_string(row)
                    .map_err(|e| ShardletError::Postprocess(e.to_string()))?;
                Ok((CONTENT_TYPE_JSON, body))
            }
        }
    }
}

/// Time left before `deadline`, or a timeout naming the stage not reached
fn check_deadline(deadline: Instant, stage: &str) -> ShardletResult<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ShardletError::Timeout(format!(
            "response timeout elapsed before {}",
            stage
        )));
    }
    Ok(remaining)
}

fn argmax(row: &[f32]) -> ShardletResult<usize> {
    if row.iter().any(|v| v.is_nan()) {
        return Err(ShardletError::Postprocess(
            "output row contains NaN".to_string(),
        ));
    }
    row.iter()
        .enumerate()
        // First maximum wins on ties
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| ShardletError::Postprocess("output row is empty".to_string()))
}
