//! Retry decisions.

use std::fmt;
use std::time::Duration;

use crate::error::CosmosError;
use crate::transport::sub_status;

use super::classify::{Failure, FailureKind};
use super::context::RetryContext;
use super::options::RetryOptions;

/// Where the next attempt goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTarget {
    SameEndpoint,
    /// Another replica of the same range in the same region.
    NextReplica,
    /// Reload replica addresses, then resend.
    RefreshAddresses,
    /// Reload the container's ranges, then resend.
    RefreshRoutingMap,
    NextRegion,
    /// Resend with the session token this client observed instead of the caller's.
    LocalSessionToken,
}

impl RetryTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameEndpoint => "SameEndpoint",
            Self::NextReplica => "NextReplica",
            Self::RefreshAddresses => "RefreshAddresses",
            Self::RefreshRoutingMap => "RefreshRoutingMap",
            Self::NextRegion => "NextRegion",
            Self::LocalSessionToken => "LocalSessionToken",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry { delay: Duration, target: RetryTarget },
    Fail(CosmosError),
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry { delay, target } => {
                write!(f, "retry {} after {}ms", target.as_str(), delay.as_millis())
            }
            Self::Fail(err) => write!(f, "fail {}", err.code()),
        }
    }
}

/// Facts about the operation the policy needs besides the failure itself.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo {
    pub is_read: bool,
    /// Safe to resend even if the failed attempt was applied.
    pub is_idempotent: bool,
    /// Another region can be selected for this racer.
    pub has_alternate_region: bool,
}

/// Stateless decision engine; all state lives in `RetryContext`.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Decide what to do after a failed attempt and record the decision.
    pub fn on_failure(
        &self,
        ctx: &mut RetryContext,
        failure: &Failure,
        info: AttemptInfo,
    ) -> RetryDecision {
        let decision = self.decide(ctx, failure, info);
        if let RetryDecision::Retry { delay, .. } = decision {
            ctx.total_backoff += delay;
        }
        ctx.record_decision(format!("{}: {}", failure.kind, decision));
        decision
    }

    fn decide(&self, ctx: &mut RetryContext, failure: &Failure, info: AttemptInfo) -> RetryDecision {
        let prior = ctx.record_failure(failure.kind);

        if failure.may_have_committed && !info.is_idempotent {
            return RetryDecision::Fail(ambiguous_write(failure));
        }

        match failure.kind {
            FailureKind::Throttled => self.on_throttled(ctx, failure, prior),
            FailureKind::Gone | FailureKind::PartitionRangeGone => self.on_gone(ctx, failure),
            FailureKind::SessionNotAvailable => self.on_session_not_available(ctx, failure, info),
            FailureKind::ServiceUnavailable | FailureKind::WriteForbidden => {
                self.fail_over_or(ctx, failure, info)
            }
            FailureKind::InternalServerError | FailureKind::RequestTimeout if info.is_read => {
                self.fail_over_or(ctx, failure, info)
            }
            FailureKind::InternalServerError
            | FailureKind::RequestTimeout
            | FailureKind::Terminal => RetryDecision::Fail(terminal(failure)),
        }
    }

    fn on_throttled(&self, ctx: &mut RetryContext, failure: &Failure, prior: u32) -> RetryDecision {
        if prior >= self.options.max_retry_attempts_on_throttled_requests {
            return RetryDecision::Fail(
                CosmosError::throttled(
                    failure.sub_status,
                    format!("request rate too large after {} attempts", prior + 1),
                )
                .with_source(&failure.message),
            );
        }

        let delay = failure
            .retry_after
            .unwrap_or_else(|| self.options.throttle_backoff.delay_for(prior));
        if ctx.throttle_wait + delay > self.options.max_retry_wait_on_throttled_requests {
            return RetryDecision::Fail(
                CosmosError::throttled(
                    failure.sub_status,
                    format!(
                        "request rate too large, throttling wait would exceed {}ms",
                        self.options.max_retry_wait_on_throttled_requests.as_millis()
                    ),
                )
                .with_source(&failure.message),
            );
        }

        ctx.throttle_wait += delay;
        RetryDecision::Retry {
            delay,
            target: RetryTarget::SameEndpoint,
        }
    }

    fn on_gone(&self, ctx: &mut RetryContext, failure: &Failure) -> RetryDecision {
        // Both gone kinds share one budget.
        let prior = ctx.gone_failures().saturating_sub(1);
        let delay = match prior {
            0 => Duration::ZERO,
            n => self.options.gone_backoff.delay_for(n - 1),
        };

        if prior >= self.options.max_gone_retries
            || ctx.elapsed() + delay > self.options.gone_retry_window
        {
            return RetryDecision::Fail(
                CosmosError::service_unavailable(
                    sub_status::CLIENT_GONE_EXHAUSTED,
                    format!("service unavailable after {} gone retries", prior),
                )
                .with_source(&failure.message),
            );
        }

        let target = match failure.kind {
            FailureKind::PartitionRangeGone => RetryTarget::RefreshRoutingMap,
            _ => RetryTarget::RefreshAddresses,
        };
        RetryDecision::Retry { delay, target }
    }

    fn on_session_not_available(
        &self,
        ctx: &mut RetryContext,
        failure: &Failure,
        info: AttemptInfo,
    ) -> RetryDecision {
        if ctx.session_retries_in_region < self.options.max_session_retries_in_region {
            let delay = self.options.session_backoff.delay_for(ctx.session_retries_in_region);
            ctx.session_retries_in_region += 1;
            return RetryDecision::Retry {
                delay,
                target: RetryTarget::NextReplica,
            };
        }

        if info.is_read
            && info.has_alternate_region
            && ctx.region_failovers < self.options.max_region_failovers
        {
            ctx.region_failovers += 1;
            ctx.session_retries_in_region = 0;
            return RetryDecision::Retry {
                delay: Duration::ZERO,
                target: RetryTarget::NextRegion,
            };
        }

        if ctx.explicit_session_token && !ctx.used_local_session_token {
            ctx.used_local_session_token = true;
            ctx.session_retries_in_region = 0;
            return RetryDecision::Retry {
                delay: Duration::ZERO,
                target: RetryTarget::LocalSessionToken,
            };
        }

        RetryDecision::Fail(
            CosmosError::session_not_found("the read session is not available for the input session token")
                .with_source(&failure.message),
        )
    }

    fn fail_over_or(&self, ctx: &mut RetryContext, failure: &Failure, info: AttemptInfo) -> RetryDecision {
        if info.has_alternate_region && ctx.region_failovers < self.options.max_region_failovers {
            ctx.region_failovers += 1;
            ctx.session_retries_in_region = 0;
            return RetryDecision::Retry {
                delay: Duration::ZERO,
                target: RetryTarget::NextRegion,
            };
        }
        RetryDecision::Fail(terminal(failure))
    }
}

fn terminal(failure: &Failure) -> CosmosError {
    if failure.status == 0 {
        return CosmosError::service_unavailable(sub_status::CLIENT_REGIONS_EXHAUSTED, "service unavailable")
            .with_source(&failure.message);
    }
    CosmosError::from_status(failure.status, failure.sub_status, failure.message.clone())
}

fn ambiguous_write(failure: &Failure) -> CosmosError {
    let err = if failure.transport_timeout {
        CosmosError::timeout("request timed out after it was sent; the write may have been applied")
    } else {
        CosmosError::service_unavailable(
            sub_status::UNKNOWN,
            "connection failed after the request was sent; the write may have been applied",
        )
    };
    err.with_source(&failure.message)
}
