//! Operation responses.

use serde::de::DeserializeOwned;

use crate::diagnostics::CosmosDiagnostics;
use crate::error::{CosmosError, CosmosResult};
use crate::routing::Region;
use crate::transport::{sub_status, Headers};

/// Final outcome of a logical operation as seen by the caller.
#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub status: u16,
    pub sub_status: u32,
    pub headers: Headers,
    /// `None` for writes when content response on write is disabled.
    pub payload: Option<Vec<u8>>,
    /// Summed over every attempt of the operation.
    pub request_charge: f64,
    pub session_token: Option<String>,
    /// Region that produced the final response.
    pub region: Option<Region>,
    pub diagnostics: CosmosDiagnostics,
}

impl OperationResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Status-bearing response for a terminal error, used by the stream API.
    pub fn from_error(error: &CosmosError, diagnostics: CosmosDiagnostics) -> Self {
        Self {
            status: error.status,
            sub_status: error.sub_status,
            headers: Headers::new(),
            payload: None,
            request_charge: diagnostics.summary().request_charge,
            session_token: None,
            region: None,
            diagnostics,
        }
    }

    /// Turn error statuses into `CosmosError`.
    pub fn ensure_success(self) -> CosmosResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = match (self.status, self.sub_status) {
            (404, sub_status::UNKNOWN) => "resource not found".to_string(),
            (409, _) => "resource with the specified id already exists".to_string(),
            (412, _) => "precondition failed: etag mismatch".to_string(),
            (status, sub) => format!("request failed with {}/{}", status, sub),
        };
        Err(CosmosError::from_status(self.status, self.sub_status, message)
            .with_diagnostics(self.diagnostics))
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get(crate::transport::headers::ETAG)
    }

    pub fn continuation(&self) -> Option<&str> {
        self.headers.get(crate::transport::headers::CONTINUATION)
    }

    /// Deserialize the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> CosmosResult<T> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| CosmosError::bad_request("response has no payload"))?;
        serde_json::from_slice(payload)
            .map_err(|e| CosmosError::bad_request(format!("payload is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Trace;
    use crate::error::ErrorKind;

    fn response(status: u16, payload: Option<&str>) -> OperationResponse {
        OperationResponse {
            status,
            sub_status: 0,
            headers: Headers::new(),
            payload: payload.map(|p| p.as_bytes().to_vec()),
            request_charge: 1.0,
            session_token: None,
            region: None,
            diagnostics: CosmosDiagnostics::new(Trace::root("op")),
        }
    }

    #[test]
    fn test_ensure_success() {
        assert!(response(200, None).ensure_success().is_ok());
        let err = response(409, None).ensure_success().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.diagnostics.is_some());
    }

    #[test]
    fn test_json_payload() {
        let value: serde_json::Value = response(200, Some(r#"{"id":"1"}"#)).json().unwrap();
        assert_eq!(value["id"], "1");
        assert!(response(200, None).json::<serde_json::Value>().is_err());
    }
}
