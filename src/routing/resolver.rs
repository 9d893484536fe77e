//! Address resolution
//!
//! Maps a logical target to the owning partition key range and the replica
//! addresses serving it in a region. Both lookups are cached per container;
//! the retry engine asks for a refresh when a replica reports the cache stale.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::operation::OperationTarget;
use crate::transport::{ConnectionMode, Endpoint};

use super::errors::{RoutingError, RoutingResult};
use super::range::{PartitionKeyRange, PartitionRoutingMap};
use super::region::Region;

/// Backend the resolver loads routing state from.
pub trait AddressSource: Send + Sync {
    /// Current partition key ranges of a container.
    fn fetch_routing_map<'a>(
        &'a self,
        container: &'a str,
    ) -> BoxFuture<'a, RoutingResult<Vec<PartitionKeyRange>>>;

    /// Replica addresses for a range in a region, primary first.
    ///
    /// `range_id` is `None` for container-level requests and in gateway mode,
    /// where the source returns the regional gateway.
    fn fetch_addresses<'a>(
        &'a self,
        container: &'a str,
        range_id: Option<&'a str>,
        region: &'a Region,
    ) -> BoxFuture<'a, RoutingResult<Vec<Endpoint>>>;
}

/// How much cached state to drop before resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshScope {
    #[default]
    None,
    /// Reload replica addresses for the target range.
    Addresses,
    /// Reload the container's ranges and every cached address under it.
    RoutingMap,
}

/// Result of resolving a target in one region.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub range_id: Option<String>,
    pub region: Region,
    /// Primary first.
    pub replicas: Vec<Endpoint>,
}

impl ResolvedAddress {
    pub fn primary(&self) -> &Endpoint {
        &self.replicas[0]
    }

    /// Replica for the n-th attempt, cycling through the set.
    pub fn replica(&self, attempt: usize) -> &Endpoint {
        &self.replicas[attempt % self.replicas.len()]
    }
}

type AddressKey = (String, Option<String>, Region);

/// Cached resolver shared by every operation of a client.
pub struct AddressResolver {
    source: Arc<dyn AddressSource>,
    mode: ConnectionMode,
    routing_maps: RwLock<HashMap<String, Arc<PartitionRoutingMap>>>,
    addresses: RwLock<HashMap<AddressKey, Arc<Vec<Endpoint>>>>,
}

impl AddressResolver {
    pub fn new(source: Arc<dyn AddressSource>, mode: ConnectionMode) -> Self {
        Self {
            source,
            mode,
            routing_maps: RwLock::new(HashMap::new()),
            addresses: RwLock::new(HashMap::new()),
        }
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Resolve a target to its range and replicas in `region`.
    pub async fn resolve(
        &self,
        container: &str,
        target: &OperationTarget,
        region: &Region,
        refresh: RefreshScope,
    ) -> RoutingResult<ResolvedAddress> {
        if refresh == RefreshScope::RoutingMap {
            self.invalidate_routing_map(container);
        }

        let range_id = match target {
            OperationTarget::None => None,
            OperationTarget::PartitionKey(key) => {
                let map = self.routing_map(container).await?;
                Some(map.range_for_key(key)?.id.clone())
            }
            OperationTarget::Range(id) => Some(self.known_range(container, id, refresh).await?),
        };

        let address_range = match self.mode {
            ConnectionMode::Direct => range_id.clone(),
            ConnectionMode::Gateway => None,
        };
        let key = (container.to_string(), address_range, region.clone());
        if refresh == RefreshScope::Addresses {
            if let Ok(mut addresses) = self.addresses.write() {
                addresses.remove(&key);
            }
        }

        let replicas = self.addresses_for(&key).await?;
        Ok(ResolvedAddress {
            range_id,
            region: region.clone(),
            replicas: replicas.as_ref().clone(),
        })
    }

    /// Drop cached addresses for a container in every region.
    pub fn invalidate_addresses(&self, container: &str) {
        if let Ok(mut addresses) = self.addresses.write() {
            addresses.retain(|(c, _, _), _| c != container);
        }
    }

    /// Drop the routing map and every address cached under it.
    pub fn invalidate_routing_map(&self, container: &str) {
        if let Ok(mut maps) = self.routing_maps.write() {
            maps.remove(container);
        }
        self.invalidate_addresses(container);
    }

    pub async fn routing_map(&self, container: &str) -> RoutingResult<Arc<PartitionRoutingMap>> {
        let cached = self
            .routing_maps
            .read()
            .ok()
            .and_then(|maps| maps.get(container).cloned());
        if let Some(map) = cached {
            return Ok(map);
        }

        debug!(container = %container, "loading partition routing map");
        let ranges = self.source.fetch_routing_map(container).await?;
        let map = Arc::new(PartitionRoutingMap::try_new(container, ranges)?);
        if let Ok(mut maps) = self.routing_maps.write() {
            maps.insert(container.to_string(), map.clone());
        }
        Ok(map)
    }

    /// Validate an explicit range id, reloading the map once if it is unknown.
    async fn known_range(
        &self,
        container: &str,
        range_id: &str,
        refresh: RefreshScope,
    ) -> RoutingResult<String> {
        let map = self.routing_map(container).await?;
        if map.range_by_id(range_id).is_ok() {
            return Ok(range_id.to_string());
        }
        if refresh == RefreshScope::RoutingMap {
            return Err(RoutingError::RangeNotFound {
                container: container.to_string(),
                range: range_id.to_string(),
            });
        }

        self.invalidate_routing_map(container);
        let map = self.routing_map(container).await?;
        Ok(map.range_by_id(range_id)?.id.clone())
    }

    async fn addresses_for(&self, key: &AddressKey) -> RoutingResult<Arc<Vec<Endpoint>>> {
        let cached = self
            .addresses
            .read()
            .ok()
            .and_then(|addresses| addresses.get(key).cloned());
        if let Some(replicas) = cached {
            return Ok(replicas);
        }

        let (container, range_id, region) = key;
        debug!(
            container = %container,
            range = range_id.as_deref().unwrap_or("-"),
            region = %region,
            "loading replica addresses"
        );
        let replicas = self
            .source
            .fetch_addresses(container, range_id.as_deref(), region)
            .await?;
        if replicas.is_empty() {
            return Err(RoutingError::NoAddresses {
                container: container.clone(),
                range: range_id.clone().unwrap_or_default(),
                region: region.to_string(),
            });
        }

        let replicas = Arc::new(replicas);
        if let Ok(mut addresses) = self.addresses.write() {
            addresses.insert(key.clone(), replicas.clone());
        }
        Ok(replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::partition_key::{PartitionKey, EPK_SPACE_END};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        ranges: Mutex<Vec<PartitionKeyRange>>,
        map_fetches: AtomicUsize,
        address_fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(ranges: Vec<PartitionKeyRange>) -> Self {
            Self {
                ranges: Mutex::new(ranges),
                map_fetches: AtomicUsize::new(0),
                address_fetches: AtomicUsize::new(0),
            }
        }
    }

    impl AddressSource for FakeSource {
        fn fetch_routing_map<'a>(
            &'a self,
            _container: &'a str,
        ) -> BoxFuture<'a, RoutingResult<Vec<PartitionKeyRange>>> {
            self.map_fetches.fetch_add(1, Ordering::SeqCst);
            let ranges = self.ranges.lock().unwrap().clone();
            Box::pin(async move { Ok(ranges) })
        }

        fn fetch_addresses<'a>(
            &'a self,
            _container: &'a str,
            range_id: Option<&'a str>,
            region: &'a Region,
        ) -> BoxFuture<'a, RoutingResult<Vec<Endpoint>>> {
            self.address_fetches.fetch_add(1, Ordering::SeqCst);
            let range = range_id.unwrap_or("gw").to_string();
            let replicas = (0..3)
                .map(|i| Endpoint::new(region.clone(), format!("rntbd://{}/{}/{}", region, range, i)))
                .collect();
            Box::pin(async move { Ok(replicas) })
        }
    }

    fn split_ranges() -> Vec<PartitionKeyRange> {
        vec![
            PartitionKeyRange::new("1", 0, EPK_SPACE_END / 2),
            PartitionKeyRange::new("2", EPK_SPACE_END / 2, EPK_SPACE_END),
        ]
    }

    #[tokio::test]
    async fn test_resolve_caches_map_and_addresses() {
        let source = Arc::new(FakeSource::new(vec![PartitionKeyRange::new("0", 0, EPK_SPACE_END)]));
        let resolver = AddressResolver::new(source.clone(), ConnectionMode::Direct);
        let region = Region::from("West US");
        let target = OperationTarget::PartitionKey(PartitionKey::from("pk"));

        let first = resolver.resolve("c", &target, &region, RefreshScope::None).await.unwrap();
        let second = resolver.resolve("c", &target, &region, RefreshScope::None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.range_id.as_deref(), Some("0"));
        assert_eq!(first.replicas.len(), 3);
        assert_eq!(source.map_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(source.address_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_address_refresh_keeps_routing_map() {
        let source = Arc::new(FakeSource::new(vec![PartitionKeyRange::new("0", 0, EPK_SPACE_END)]));
        let resolver = AddressResolver::new(source.clone(), ConnectionMode::Direct);
        let region = Region::from("West US");
        let target = OperationTarget::PartitionKey(PartitionKey::from("pk"));

        resolver.resolve("c", &target, &region, RefreshScope::None).await.unwrap();
        resolver.resolve("c", &target, &region, RefreshScope::Addresses).await.unwrap();

        assert_eq!(source.map_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(source.address_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_routing_map_refresh_sees_split() {
        let source = Arc::new(FakeSource::new(vec![PartitionKeyRange::new("0", 0, EPK_SPACE_END)]));
        let resolver = AddressResolver::new(source.clone(), ConnectionMode::Direct);
        let region = Region::from("West US");
        let target = OperationTarget::PartitionKey(PartitionKey::from("pk"));

        let before = resolver.resolve("c", &target, &region, RefreshScope::None).await.unwrap();
        *source.ranges.lock().unwrap() = split_ranges();
        let after = resolver.resolve("c", &target, &region, RefreshScope::RoutingMap).await.unwrap();

        assert_eq!(before.range_id.as_deref(), Some("0"));
        assert_ne!(after.range_id.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_unknown_range_reloads_once() {
        let source = Arc::new(FakeSource::new(vec![PartitionKeyRange::new("0", 0, EPK_SPACE_END)]));
        let resolver = AddressResolver::new(source.clone(), ConnectionMode::Direct);
        let region = Region::from("West US");

        resolver.routing_map("c").await.unwrap();
        *source.ranges.lock().unwrap() = split_ranges();
        let resolved = resolver
            .resolve("c", &OperationTarget::Range("2".into()), &region, RefreshScope::None)
            .await
            .unwrap();
        assert_eq!(resolved.range_id.as_deref(), Some("2"));

        let missing = resolver
            .resolve("c", &OperationTarget::Range("0".into()), &region, RefreshScope::None)
            .await;
        assert!(missing.unwrap_err().is_stale_routing());
    }

    #[tokio::test]
    async fn test_gateway_mode_shares_one_endpoint_per_region() {
        let source = Arc::new(FakeSource::new(split_ranges()));
        let resolver = AddressResolver::new(source.clone(), ConnectionMode::Gateway);
        let region = Region::from("West US");

        let a = resolver
            .resolve("c", &OperationTarget::Range("1".into()), &region, RefreshScope::None)
            .await
            .unwrap();
        let b = resolver
            .resolve("c", &OperationTarget::Range("2".into()), &region, RefreshScope::None)
            .await
            .unwrap();

        assert_eq!(a.primary(), b.primary());
        assert_eq!(a.range_id.as_deref(), Some("1"));
        assert_eq!(source.address_fetches.load(Ordering::SeqCst), 1);
    }
}
