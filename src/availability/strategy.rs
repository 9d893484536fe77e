//! Availability strategy selection.

use std::time::Duration;

use crate::error::{CosmosError, CosmosResult};
use crate::operation::{LogicalOperation, OperationType, ResourceType};

/// Timing and exclusion settings for cross-region hedging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgingConfig {
    /// Wait before the first hedge.
    pub threshold: Duration,
    /// Wait between subsequent hedges.
    pub threshold_step: Duration,
    /// Never select a region again once it failed for this operation.
    pub exclude_regions_with_failures: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailabilityStrategy {
    #[default]
    Disabled,
    CrossRegionHedging(HedgingConfig),
}

impl AvailabilityStrategy {
    /// Hedging strategy; both durations must be positive.
    pub fn cross_region_hedging(
        threshold: Duration,
        threshold_step: Duration,
        exclude_regions_with_failures: bool,
    ) -> CosmosResult<Self> {
        if threshold.is_zero() {
            return Err(CosmosError::configuration("hedging threshold must be greater than zero"));
        }
        if threshold_step.is_zero() {
            return Err(CosmosError::configuration(
                "hedging threshold step must be greater than zero",
            ));
        }
        Ok(Self::CrossRegionHedging(HedgingConfig {
            threshold,
            threshold_step,
            exclude_regions_with_failures,
        }))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::CrossRegionHedging(_))
    }

    /// Hedging settings when `op` should race regions.
    ///
    /// Only document reads hedge, and only with more than one region.
    pub fn hedging_for(&self, op: &LogicalOperation, region_count: usize) -> Option<HedgingConfig> {
        let config = match self {
            Self::CrossRegionHedging(config) => *config,
            Self::Disabled => return None,
        };
        let hedgeable = op.resource_type == ResourceType::Document
            && matches!(
                op.operation_type,
                OperationType::Read
                    | OperationType::Query
                    | OperationType::ReadFeed
                    | OperationType::ChangeFeed
            );
        (hedgeable && region_count > 1).then_some(config)
    }
}
