//! Cross-region hedging
//!
//! Primary → wait(threshold) → hedge next region → wait(threshold_step) → …
//!
//! Each racer runs the full retry loop against its starting region. The first
//! racer to return a final result wins and the rest are cancelled through a
//! child token and dropped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{keys, spans, Trace};
use crate::error::{CosmosError, CosmosResult};
use crate::observability::{log_event, ClientMetrics, Event};
use crate::routing::Region;

use super::strategy::HedgingConfig;

/// Regions that failed during one operation, shared by its racers.
#[derive(Debug, Clone, Default)]
pub struct FailedRegions(Arc<Mutex<BTreeSet<Region>>>);

impl FailedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, region: &Region) {
        if let Ok(mut failed) = self.0.lock() {
            failed.insert(region.clone());
        }
    }

    pub fn contains(&self, region: &Region) -> bool {
        self.0.lock().map_or(false, |failed| failed.contains(region))
    }

    pub fn to_vec(&self) -> Vec<Region> {
        self.0
            .lock()
            .map(|failed| failed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Everything a racer needs to start.
pub struct RacerStart {
    pub index: usize,
    /// Position of the starting region in the operation's region list.
    pub region_pos: usize,
    pub trace: Trace,
    pub cancel: CancellationToken,
}

/// Race `regions` according to `config`.
///
/// `launch` builds one racer; it must return `Ok` only for a final result.
/// Regions recorded in `failed` are skipped when exclusion is on.
pub async fn execute_hedged<'a, T, F>(
    config: HedgingConfig,
    regions: &[Region],
    failed: &FailedRegions,
    trace: &Trace,
    cancel: &CancellationToken,
    metrics: &ClientMetrics,
    mut launch: F,
) -> CosmosResult<T>
where
    T: Send + 'a,
    F: FnMut(RacerStart) -> BoxFuture<'a, CosmosResult<T>>,
{
    let racers_cancel = cancel.child_token();
    let mut running = FuturesUnordered::new();
    let mut launched: Vec<Region> = Vec::new();
    let mut next_pos = 0usize;
    let mut last_error: Option<CosmosError> = None;

    let mut launch_next = |running: &mut FuturesUnordered<_>, launched: &mut Vec<Region>| -> bool {
        while next_pos < regions.len() {
            let pos = next_pos;
            next_pos += 1;
            let region = &regions[pos];
            if config.exclude_regions_with_failures && failed.contains(region) {
                continue;
            }

            let index = launched.len();
            let racer_trace = trace.child(spans::RACER);
            racer_trace.add_datum("Region", region.as_str());
            racer_trace.add_datum(
                keys::HEDGE_CONTEXT,
                if index == 0 {
                    keys::ORIGINAL_REQUEST
                } else {
                    keys::HEDGED_REQUEST
                },
            );
            if index > 0 {
                metrics.increment_hedges_launched();
                log_event(Event::HedgeLaunched, region.as_str(), "hedging to next region");
            }
            launched.push(region.clone());

            let racer = launch(RacerStart {
                index,
                region_pos: pos,
                trace: racer_trace,
                cancel: racers_cancel.child_token(),
            });
            let region = region.clone();
            running.push(async move { (index, region, racer.await) });
            return true;
        }
        false
    };

    launch_next(&mut running, &mut launched);
    let sleep = tokio::time::sleep(config.threshold);
    tokio::pin!(sleep);
    let mut timer_armed = true;

    let outcome = loop {
        if running.is_empty() {
            // Every running racer failed; start the next one now.
            if !launch_next(&mut running, &mut launched) {
                break Err(last_error.take().unwrap_or_else(|| {
                    CosmosError::service_unavailable(
                        crate::transport::sub_status::CLIENT_REGIONS_EXHAUSTED,
                        "no region left to hedge to",
                    )
                }));
            }
            sleep.as_mut().reset(Instant::now() + config.threshold_step);
            timer_armed = true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break Err(CosmosError::cancelled("operation cancelled while hedging"));
            }
            Some((index, region, result)) = running.next() => match result {
                Ok(value) => {
                    trace.add_datum(
                        keys::HEDGE_CONTEXT,
                        if index == 0 { keys::ORIGINAL_REQUEST } else { keys::HEDGED_REQUEST },
                    );
                    if index > 0 {
                        metrics.increment_hedges_won();
                        log_event(Event::HedgeWon, region.as_str(), "hedged request won");
                    }
                    break Ok(value);
                }
                Err(e) => {
                    if config.exclude_regions_with_failures {
                        failed.insert(&region);
                    }
                    last_error = Some(e);
                }
            },
            _ = &mut sleep, if timer_armed => {
                if launch_next(&mut running, &mut launched) {
                    sleep.as_mut().reset(Instant::now() + config.threshold_step);
                } else {
                    timer_armed = false;
                }
            }
        }
    };

    racers_cancel.cancel();
    trace.add_datum(
        keys::HEDGE_REGIONS,
        Value::from(launched.iter().map(|r| r.as_str()).collect::<Vec<_>>()),
    );
    if config.exclude_regions_with_failures {
        let excluded = failed.to_vec();
        trace.add_datum(
            keys::EXCLUDED_REGIONS,
            Value::from(excluded.iter().map(|r| r.as_str()).collect::<Vec<_>>()),
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn regions() -> Vec<Region> {
        vec![Region::from("A"), Region::from("B"), Region::from("C")]
    }

    fn config(exclude: bool) -> HedgingConfig {
        HedgingConfig {
            threshold: Duration::from_millis(40),
            threshold_step: Duration::from_millis(40),
            exclude_regions_with_failures: exclude,
        }
    }

    #[tokio::test]
    async fn test_fast_primary_never_hedges() {
        let metrics = ClientMetrics::new();
        let trace = Trace::root("op");
        let result = execute_hedged(
            config(false),
            &regions(),
            &FailedRegions::new(),
            &trace,
            &CancellationToken::new(),
            &metrics,
            |start: RacerStart| -> BoxFuture<'static, CosmosResult<usize>> {
                Box::pin(async move { Ok(start.region_pos) })
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 0);
        assert_eq!(metrics.snapshot().hedges_launched, 0);
        assert_eq!(trace.datum(keys::HEDGE_CONTEXT), Some(Value::from(keys::ORIGINAL_REQUEST)));
    }

    #[tokio::test]
    async fn test_slow_primary_is_hedged_after_threshold() {
        let metrics = ClientMetrics::new();
        let trace = Trace::root("op");
        let started = std::time::Instant::now();
        let result = execute_hedged(
            config(false),
            &regions(),
            &FailedRegions::new(),
            &trace,
            &CancellationToken::new(),
            &metrics,
            |start: RacerStart| -> BoxFuture<'static, CosmosResult<usize>> {
                Box::pin(async move {
                    if start.region_pos == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(start.region_pos)
                })
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 1);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(metrics.snapshot().hedges_won, 1);
        assert_eq!(trace.datum(keys::HEDGE_CONTEXT), Some(Value::from(keys::HEDGED_REQUEST)));
    }

    #[tokio::test]
    async fn test_failed_racer_launches_next_immediately() {
        let metrics = ClientMetrics::new();
        let trace = Trace::root("op");
        let failed = FailedRegions::new();
        let started = std::time::Instant::now();
        let result = execute_hedged(
            HedgingConfig {
                threshold: Duration::from_secs(10),
                threshold_step: Duration::from_secs(10),
                exclude_regions_with_failures: true,
            },
            &regions(),
            &failed,
            &trace,
            &CancellationToken::new(),
            &metrics,
            |start: RacerStart| -> BoxFuture<'static, CosmosResult<usize>> {
                Box::pin(async move {
                    if start.region_pos == 0 {
                        Err(CosmosError::service_unavailable(0, "A down"))
                    } else {
                        Ok(start.region_pos)
                    }
                })
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(failed.contains(&Region::from("A")));
        assert_eq!(
            trace.datum(keys::EXCLUDED_REGIONS),
            Some(Value::from(vec!["A"]))
        );
    }

    #[tokio::test]
    async fn test_all_racers_fail_surfaces_last_error() {
        let metrics = ClientMetrics::new();
        let err = execute_hedged(
            config(false),
            &regions(),
            &FailedRegions::new(),
            &Trace::root("op"),
            &CancellationToken::new(),
            &metrics,
            |start: RacerStart| -> BoxFuture<'static, CosmosResult<usize>> {
                Box::pin(async move {
                    Err(CosmosError::service_unavailable(0, format!("region {} down", start.region_pos)))
                })
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.status_code(), 503);
        assert!(err.message().starts_with("region "));
    }

    #[tokio::test]
    async fn test_caller_cancellation_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = execute_hedged(
            config(false),
            &regions(),
            &FailedRegions::new(),
            &Trace::root("op"),
            &cancel,
            &ClientMetrics::new(),
            |_start: RacerStart| -> BoxFuture<'static, CosmosResult<usize>> {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(0)
                })
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
    }
}
