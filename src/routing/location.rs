//! Location cache
//!
//! Orders account regions by the client's preference and tracks regions that
//! recently failed. Unavailable regions are not dropped, only moved to the back
//! of the list until their mark expires.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::operation::ConsistencyLevel;

use super::region::Region;

/// How long a region stays demoted after a failure.
pub const DEFAULT_UNAVAILABILITY_TTL: Duration = Duration::from_secs(300);

/// Account topology and replication settings as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProperties {
    pub write_regions: Vec<Region>,
    pub read_regions: Vec<Region>,
    pub default_consistency: ConsistencyLevel,
    #[serde(default)]
    pub enable_multiple_write_locations: bool,
    #[serde(default)]
    pub enable_n_region_synchronous_commit: bool,
}

impl AccountProperties {
    /// Single write region that also serves reads, plus extra read regions.
    pub fn single_master(write_region: &str, read_regions: &[&str]) -> Self {
        let mut reads = vec![Region::from(write_region)];
        reads.extend(read_regions.iter().map(|r| Region::from(*r)));
        Self {
            write_regions: vec![Region::from(write_region)],
            read_regions: reads,
            default_consistency: ConsistencyLevel::Session,
            enable_multiple_write_locations: false,
            enable_n_region_synchronous_commit: false,
        }
    }

    pub fn with_default_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_consistency = level;
        self
    }

    pub fn with_n_region_synchronous_commit(mut self, enabled: bool) -> Self {
        self.enable_n_region_synchronous_commit = enabled;
        self
    }

    pub fn with_multiple_write_locations(mut self, regions: &[&str]) -> Self {
        self.write_regions = regions.iter().map(|r| Region::from(*r)).collect();
        self.enable_multiple_write_locations = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Unavailability {
    marked_at: Instant,
    read: bool,
    write: bool,
}

/// Shared, preference-ordered view of the account's regions.
#[derive(Debug)]
pub struct LocationCache {
    preferred_regions: Vec<Region>,
    account: RwLock<AccountProperties>,
    unavailable: RwLock<HashMap<Region, Unavailability>>,
    unavailability_ttl: Duration,
}

impl LocationCache {
    pub fn new(preferred_regions: Vec<Region>, account: AccountProperties) -> Self {
        Self::with_ttl(preferred_regions, account, DEFAULT_UNAVAILABILITY_TTL)
    }

    pub fn with_ttl(
        preferred_regions: Vec<Region>,
        account: AccountProperties,
        unavailability_ttl: Duration,
    ) -> Self {
        Self {
            preferred_regions,
            account: RwLock::new(account),
            unavailable: RwLock::new(HashMap::new()),
            unavailability_ttl,
        }
    }

    pub fn account_properties(&self) -> AccountProperties {
        match self.account.read() {
            Ok(account) => account.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the account view, e.g. after a topology refresh.
    pub fn on_account_properties(&self, account: AccountProperties) {
        if let Ok(mut current) = self.account.write() {
            *current = account;
        }
    }

    pub fn preferred_regions(&self) -> &[Region] {
        &self.preferred_regions
    }

    /// Regions eligible for reads, most preferred first.
    pub fn read_regions(&self) -> Vec<Region> {
        let account = self.account_properties();
        self.order(&account.read_regions, true)
    }

    /// Regions eligible for writes, most preferred first.
    ///
    /// Single-master accounts keep the service's order since only the first
    /// write region accepts writes.
    pub fn write_regions(&self) -> Vec<Region> {
        let account = self.account_properties();
        if account.enable_multiple_write_locations {
            self.order(&account.write_regions, false)
        } else {
            self.demote_unavailable(account.write_regions.clone(), false)
        }
    }

    /// Regions for a request after removing caller exclusions.
    ///
    /// Excluding every region falls back to the first region so the request
    /// still has a target.
    pub fn applicable_regions(&self, is_read: bool, excluded: &[Region]) -> Vec<Region> {
        let all = if is_read {
            self.read_regions()
        } else {
            self.write_regions()
        };
        let filtered: Vec<Region> = all
            .iter()
            .filter(|r| !excluded.contains(r))
            .cloned()
            .collect();

        if filtered.is_empty() {
            all.into_iter().take(1).collect()
        } else {
            filtered
        }
    }

    pub fn mark_unavailable_for_read(&self, region: &Region) {
        self.mark(region, true, false);
    }

    pub fn mark_unavailable_for_write(&self, region: &Region) {
        self.mark(region, false, true);
    }

    pub fn is_unavailable(&self, region: &Region, for_read: bool) -> bool {
        let unavailable = match self.unavailable.read() {
            Ok(u) => u,
            Err(_) => return false,
        };
        unavailable.get(region).map_or(false, |u| {
            u.marked_at.elapsed() < self.unavailability_ttl
                && if for_read { u.read } else { u.write }
        })
    }

    fn mark(&self, region: &Region, read: bool, write: bool) {
        if let Ok(mut unavailable) = self.unavailable.write() {
            let entry = unavailable.entry(region.clone()).or_insert(Unavailability {
                marked_at: Instant::now(),
                read: false,
                write: false,
            });
            entry.marked_at = Instant::now();
            entry.read |= read;
            entry.write |= write;
        }
    }

    fn order(&self, available: &[Region], for_read: bool) -> Vec<Region> {
        let mut ordered: Vec<Region> = self
            .preferred_regions
            .iter()
            .filter(|r| available.contains(r))
            .cloned()
            .collect();
        for region in available {
            if !ordered.contains(region) {
                ordered.push(region.clone());
            }
        }
        self.demote_unavailable(ordered, for_read)
    }

    fn demote_unavailable(&self, regions: Vec<Region>, for_read: bool) -> Vec<Region> {
        let (healthy, demoted): (Vec<Region>, Vec<Region>) = regions
            .into_iter()
            .partition(|r| !self.is_unavailable(r, for_read));
        healthy.into_iter().chain(demoted).collect()
    }
}
