//! Wire header names and a typed view over response headers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const SESSION_TOKEN: &str = "x-ms-session-token";
pub const CONSISTENCY_LEVEL: &str = "x-ms-consistency-level";
pub const PRIORITY_LEVEL: &str = "x-ms-cosmos-priority-level";
pub const ACTIVITY_ID: &str = "x-ms-activity-id";
pub const LSN: &str = "lsn";
pub const GLOBAL_COMMITTED_LSN: &str = "x-ms-global-Committed-lsn";
pub const GLOBAL_N_REGION_COMMITTED_GLSN: &str = "x-ms-cosmos-global-nregion-committed-glsn";
pub const NUMBER_OF_READ_REGIONS: &str = "x-ms-number-of-read-regions";
pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
pub const SUB_STATUS: &str = "x-ms-substatus";
pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
pub const PREFER: &str = "Prefer";
pub const PREFER_RETURN_MINIMAL: &str = "return=minimal";
pub const IF_MATCH: &str = "If-Match";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const ETAG: &str = "etag";
pub const CONTINUATION: &str = "x-ms-continuation";

/// Case-insensitive header map.
///
/// Names are stored lowercased so lookups match regardless of how the
/// service spelled them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn lsn(&self) -> Option<u64> {
        self.parse(LSN)
    }

    pub fn global_committed_lsn(&self) -> Option<u64> {
        self.parse(GLOBAL_COMMITTED_LSN)
    }

    pub fn n_region_committed_glsn(&self) -> Option<u64> {
        self.parse(GLOBAL_N_REGION_COMMITTED_GLSN)
    }

    pub fn number_of_read_regions(&self) -> Option<u32> {
        self.parse(NUMBER_OF_READ_REGIONS)
    }

    pub fn request_charge(&self) -> f64 {
        self.parse(REQUEST_CHARGE).unwrap_or(0.0)
    }

    /// Server supplied wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        self.parse::<u64>(RETRY_AFTER_MS).map(Duration::from_millis)
    }

    pub fn session_token(&self) -> Option<&str> {
        self.get(SESSION_TOKEN)
    }

    pub fn sub_status(&self) -> Option<u32> {
        self.parse(SUB_STATUS)
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.get(ACTIVITY_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let headers = Headers::new().with("x-ms-global-Committed-lsn", "42");
        assert_eq!(headers.get(GLOBAL_COMMITTED_LSN), Some("42"));
        assert_eq!(headers.get("X-MS-GLOBAL-COMMITTED-LSN"), Some("42"));
        assert_eq!(headers.global_committed_lsn(), Some(42));
    }

    #[test]
    fn test_typed_getters() {
        let headers = Headers::new()
            .with(LSN, "100")
            .with(REQUEST_CHARGE, "2.5")
            .with(RETRY_AFTER_MS, "15")
            .with(SUB_STATUS, "1002");
        assert_eq!(headers.lsn(), Some(100));
        assert_eq!(headers.request_charge(), 2.5);
        assert_eq!(headers.retry_after(), Some(Duration::from_millis(15)));
        assert_eq!(headers.sub_status(), Some(1002));
        assert_eq!(headers.n_region_committed_glsn(), None);
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let headers = Headers::new().with(LSN, "not-a-number");
        assert_eq!(headers.lsn(), None);
        assert_eq!(headers.request_charge(), 0.0);
    }
}
