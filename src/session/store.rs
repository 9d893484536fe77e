//! Client-wide session token store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

use super::errors::SessionResult;
use super::token::{format_container_token, parse_container_token, VectorSessionToken};

type RangeTokens = Arc<Mutex<BTreeMap<String, VectorSessionToken>>>;

/// Tokens observed by this client, keyed by container then range.
///
/// The outer map is only write-locked to add or drop a container; merges
/// take the container's own lock, so unrelated containers never contend.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    containers: RwLock<HashMap<String, RangeTokens>>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn container(&self, container: &str) -> Option<RangeTokens> {
        self.containers
            .read()
            .ok()
            .and_then(|containers| containers.get(container).cloned())
    }

    fn container_or_insert(&self, container: &str) -> Option<RangeTokens> {
        if let Some(tokens) = self.container(container) {
            return Some(tokens);
        }
        let mut containers = self.containers.write().ok()?;
        Some(containers.entry(container.to_string()).or_default().clone())
    }

    /// Fold a token into the stored one for `range_id`.
    pub fn merge_token(&self, container: &str, range_id: &str, token: &VectorSessionToken) {
        let Some(tokens) = self.container_or_insert(container) else {
            return;
        };
        let Ok(mut ranges) = tokens.lock() else {
            return;
        };
        let merged = match ranges.get(range_id) {
            Some(existing) => existing.merge(token),
            None => token.clone(),
        };
        ranges.insert(range_id.to_string(), merged);
    }

    /// Merge a `x-ms-session-token` response header.
    ///
    /// Unprefixed tokens belong to `range_id`.
    pub fn merge_from_header(
        &self,
        container: &str,
        range_id: Option<&str>,
        header: &str,
    ) -> SessionResult<()> {
        let entries = parse_container_token(header, range_id).map_err(|e| {
            warn!(container = %container, error = %e, "ignoring session token");
            e
        })?;
        for (range, token) in entries {
            self.merge_token(container, &range, &token);
        }
        Ok(())
    }

    pub fn token_for_range(&self, container: &str, range_id: &str) -> Option<VectorSessionToken> {
        let tokens = self.container(container)?;
        let ranges = tokens.lock().ok()?;
        ranges.get(range_id).cloned()
    }

    /// `range:token` for the request header.
    pub fn header_for_range(&self, container: &str, range_id: &str) -> Option<String> {
        self.token_for_range(container, range_id)
            .map(|token| format!("{}:{}", range_id, token))
    }

    pub fn lsn_for_range(&self, container: &str, range_id: &str) -> Option<u64> {
        self.token_for_range(container, range_id)
            .map(|token| token.global_lsn)
    }

    /// Composite token covering every known range of the container.
    pub fn container_token(&self, container: &str) -> Option<String> {
        let tokens = self.container(container)?;
        let ranges = tokens.lock().ok()?;
        if ranges.is_empty() {
            return None;
        }
        Some(format_container_token(ranges.iter()))
    }

    /// Forget a container, e.g. after it was deleted and recreated.
    pub fn clear_container(&self, container: &str) {
        if let Ok(mut containers) = self.containers.write() {
            containers.remove(container);
        }
    }
}
