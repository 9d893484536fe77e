//! Per-attempt store response statistics.

use serde::{Deserialize, Serialize};

use crate::operation::{OperationType, ResourceType};
use crate::transport::{ConnectionMode, StoreRequest, StoreResponse};

/// One network attempt as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoreResponseStatistics {
    /// Offset from the start of the operation.
    pub start_offset_ms: f64,
    pub latency_ms: f64,
    pub mode: ConnectionMode,
    pub region: String,
    pub address: String,
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    /// `0` when no response arrived.
    pub status_code: u16,
    pub sub_status_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(rename = "LSN", skip_serializing_if = "Option::is_none")]
    pub lsn: Option<u64>,
    #[serde(rename = "GlobalCommittedLSN", skip_serializing_if = "Option::is_none")]
    pub global_committed_lsn: Option<u64>,
    #[serde(rename = "GlobalNRegionCommittedGLSN", skip_serializing_if = "Option::is_none")]
    pub n_region_committed_glsn: Option<u64>,
    pub request_charge: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl StoreResponseStatistics {
    /// Statistics for an attempt that produced a response.
    pub fn from_response(
        request: &StoreRequest,
        mode: ConnectionMode,
        region: &str,
        address: &str,
        response: &StoreResponse,
    ) -> Self {
        let headers = &response.headers;
        Self {
            start_offset_ms: 0.0,
            latency_ms: 0.0,
            mode,
            region: region.to_string(),
            address: address.to_string(),
            resource_type: request.resource_type,
            operation_type: request.operation_type,
            status_code: response.status,
            sub_status_code: response.sub_status(),
            exception: None,
            lsn: headers.lsn(),
            global_committed_lsn: headers.global_committed_lsn(),
            n_region_committed_glsn: headers.n_region_committed_glsn(),
            request_charge: headers.request_charge(),
            activity_id: headers.activity_id().map(str::to_string),
        }
    }

    /// Statistics for an attempt that ended in an exception.
    pub fn from_failure(
        request: &StoreRequest,
        mode: ConnectionMode,
        region: &str,
        address: &str,
        status_code: u16,
        sub_status_code: u32,
        exception: impl Into<String>,
    ) -> Self {
        Self {
            start_offset_ms: 0.0,
            latency_ms: 0.0,
            mode,
            region: region.to_string(),
            address: address.to_string(),
            resource_type: request.resource_type,
            operation_type: request.operation_type,
            status_code,
            sub_status_code,
            exception: Some(exception.into()),
            lsn: None,
            global_committed_lsn: None,
            n_region_committed_glsn: None,
            request_charge: 0.0,
            activity_id: None,
        }
    }

    pub fn with_timing(mut self, start_offset_ms: f64, latency_ms: f64) -> Self {
        self.start_offset_ms = start_offset_ms;
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_head_collection(&self) -> bool {
        self.resource_type == ResourceType::Collection && self.operation_type == OperationType::Head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::headers;

    #[test]
    fn test_serialized_field_names() {
        let request = StoreRequest::head_collection("c", None);
        let response = StoreResponse::new(200)
            .with_header(headers::LSN, "100")
            .with_header(headers::GLOBAL_N_REGION_COMMITTED_GLSN, "100");
        let stats = StoreResponseStatistics::from_response(
            &request,
            ConnectionMode::Direct,
            "West US",
            "rntbd://a",
            &response,
        );

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"GlobalNRegionCommittedGLSN\":100"));
        assert!(json.contains("\"StatusCode\":200"));
        assert!(!json.contains("Exception"));
        assert!(stats.is_head_collection());
    }
}
