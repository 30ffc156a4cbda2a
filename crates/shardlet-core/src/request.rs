//! Inference request and response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ErrorCategory, ShardletError};

/// Request parameter carrying the primary payload
pub const PARAMETER_NAME_DATA: &str = "data";
/// Request parameter used when `data` is absent
pub const PARAMETER_NAME_BODY: &str = "body";
/// Header declaring the data type of `data`
pub const HEADER_NAME_DATA_TYPE: &str = "data_dtype";
/// Header declaring the data type of `body`
pub const HEADER_NAME_BODY_TYPE: &str = "body_dtype";

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// One inference request, as delivered by the transport layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// Identifier, unique within a batch
    pub request_id: String,
    /// Named byte parameters
    pub parameters: HashMap<String, Vec<u8>>,
    /// Request headers
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    /// Attach a `data` payload with its declared data type
    pub fn with_data(mut self, data: impl Into<Vec<u8>>, data_type: impl Into<String>) -> Self {
        self.parameters
            .insert(PARAMETER_NAME_DATA.to_string(), data.into());
        self.headers
            .insert(HEADER_NAME_DATA_TYPE.to_string(), data_type.into());
        self
    }

    /// Attach a `body` payload with its declared data type
    pub fn with_body(mut self, body: impl Into<Vec<u8>>, body_type: impl Into<String>) -> Self {
        self.parameters
            .insert(PARAMETER_NAME_BODY.to_string(), body.into());
        self.headers
            .insert(HEADER_NAME_BODY_TYPE.to_string(), body_type.into());
        self
    }

    /// Payload and declared data type.
    ///
    /// `data`/`data_dtype` take precedence; `body`/`body_dtype` are used
    /// only when no `data` parameter is present.
    pub fn payload(&self) -> Option<(&[u8], &str)> {
        let (data, dtype) = if self.parameters.contains_key(PARAMETER_NAME_DATA) {
            (
                self.parameters.get(PARAMETER_NAME_DATA),
                self.headers.get(HEADER_NAME_DATA_TYPE),
            )
        } else {
            (
                self.parameters.get(PARAMETER_NAME_BODY),
                self.headers.get(HEADER_NAME_BODY_TYPE),
            )
        };
        Some((data?.as_slice(), dtype?.as_str()))
    }
}

/// Response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Text(String),
    Binary(Vec<u8>),
}

/// One response per request that entered a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the originating request
    pub request_id: String,
    /// HTTP-style status code
    pub status_code: u16,
    /// Content type label of `body`
    pub content_type: String,
    /// Response body
    pub body: ResponseBody,
    /// Error category, set on failures only
    pub category: Option<ErrorCategory>,
}

impl Response {
    /// Build a 200 response with a text body
    pub fn ok(request_id: impl Into<String>, content_type: &str, body: String) -> Self {
        Self {
            request_id: request_id.into(),
            status_code: 200,
            content_type: content_type.to_string(),
            body: ResponseBody::Text(body),
            category: None,
        }
    }

    /// Build a terminal 500 response for a failed request
    pub fn error(request_id: impl Into<String>, err: &ShardletError) -> Self {
        let category = err.category();
        Self {
            request_id: request_id.into(),
            status_code: 500,
            content_type: CONTENT_TYPE_TEXT.to_string(),
            body: ResponseBody::Text(format!("{}: {}", category, err)),
            category: Some(category),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_prefers_data() {
        let request = Request::new("r1")
            .with_data("hello", "string")
            .with_body("ignored", "string");
        assert_eq!(request.payload(), Some((&b"hello"[..], "string")));
    }

    #[test]
    fn test_payload_falls_back_to_body() {
        let request = Request::new("r1").with_body("hello", "bytes");
        assert_eq!(request.payload(), Some((&b"hello"[..], "bytes")));
    }

    #[test]
    fn test_payload_requires_data_type() {
        let mut request = Request::new("r1");
        request
            .parameters
            .insert(PARAMETER_NAME_DATA.to_string(), b"hello".to_vec());
        assert!(request.payload().is_none());

        // A body type does not stand in for a missing data type
        let request = request.with_body("other", "string");
        assert!(request.payload().is_none());
    }

    #[test]
    fn test_error_response() {
        let response = Response::error("r7", &ShardletError::Payload("no data".to_string()));
        assert_eq!(response.status_code, 500);
        assert_eq!(response.category, Some(ErrorCategory::EmptyPayload));
        assert!(!response.is_success());
        match response.body {
            ResponseBody::Text(body) => assert!(body.starts_with("empty payload")),
            ResponseBody::Binary(_) => panic!("expected text body"),
        }
    }
}
