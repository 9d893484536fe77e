//! Shared harness for the client integration tests.
//!
//! Builds a client on top of a simulated account wrapped in a fault
//! injecting transport.

#![allow(dead_code)]

use std::sync::Arc;

use cosmos_core::fault::{FaultCondition, FaultErrorType, FaultInjectingTransport, FaultInjectionRule, ServerErrorResult};
use cosmos_core::operation::OperationType;
use cosmos_core::simulation::SimulatedAccount;
use cosmos_core::{AccountProperties, ClientConfig, CosmosClientCore};

pub const CONTAINER: &str = "orders";

pub struct Harness {
    pub sim: Arc<SimulatedAccount>,
    pub faults: Arc<FaultInjectingTransport>,
    pub client: CosmosClientCore,
}

impl Harness {
    /// Single write region `A` with read regions `B` and `C`.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_account(AccountProperties::single_master("A", &["B", "C"]), config)
    }

    pub fn with_account(account: AccountProperties, mut config: ClientConfig) -> Self {
        if config.preferred_regions.is_empty() {
            config.preferred_regions = account.read_regions.iter().map(|r| r.to_string()).collect();
        }
        let sim = Arc::new(SimulatedAccount::new(account.clone()));
        sim.create_container(CONTAINER, 1);
        let faults = Arc::new(FaultInjectingTransport::new(sim.clone()));
        let client = CosmosClientCore::builder(faults.clone(), sim.clone(), account)
            .with_config(config)
            .build()
            .unwrap();
        Self { sim, faults, client }
    }

    /// Add a rule failing every read in `region`.
    pub fn fail_reads(&self, id: &str, region: &str, result: ServerErrorResult) -> Arc<FaultInjectionRule> {
        let rule = FaultInjectionRule::new(
            id,
            FaultCondition::new().region(region).operation_type(OperationType::Read),
            result,
        )
        .unwrap();
        self.faults.add_rule(rule).unwrap()
    }

    pub async fn seed(&self, pk: &str, id: &str) {
        let body = format!(r#"{{"id":"{}","pk":"{}","total":1}}"#, id, pk);
        self.client
            .create_item(CONTAINER, pk, id, body.into_bytes(), Default::default())
            .await
            .unwrap();
    }
}

/// Configuration with short backoffs so failure paths finish quickly.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        gone_backoff_initial_ms: 10,
        gone_backoff_max_ms: 20,
        barrier_short_interval_ms: 1,
        barrier_long_interval_ms: 2,
        ..ClientConfig::default()
    }
}

pub fn hedging_config(threshold_ms: u64, exclude: bool) -> ClientConfig {
    ClientConfig {
        hedging: Some(cosmos_core::config::HedgingSettings {
            threshold_ms,
            threshold_step_ms: threshold_ms,
            exclude_regions_with_failures: exclude,
        }),
        ..fast_config()
    }
}

pub fn failure(error_type: FaultErrorType) -> ServerErrorResult {
    ServerErrorResult::new(error_type)
}
