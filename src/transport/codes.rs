//! Status and sub-status codes the core reacts to.

/// HTTP status codes.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const NOT_MODIFIED: u16 = 304;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const REQUEST_ENTITY_TOO_LARGE: u16 = 413;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Service sub-status codes. Values overlap; the meaning depends on the status.
pub mod sub_status {
    pub const UNKNOWN: u32 = 0;

    // 403
    pub const WRITE_FORBIDDEN: u32 = 3;
    pub const DATABASE_ACCOUNT_NOT_FOUND: u32 = 1008;

    // 404
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;

    // 410
    pub const NAME_CACHE_IS_STALE: u32 = 1000;
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    pub const COMPLETING_SPLIT: u32 = 1007;
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
    pub const LEASE_NOT_FOUND: u32 = 1022;
    pub const SERVER_GENERATED_410: u32 = 21005;

    // 429
    pub const RU_BUDGET_EXCEEDED: u32 = 3200;

    // 503, client generated
    pub const CLIENT_GONE_EXHAUSTED: u32 = 20002;
    pub const CLIENT_BARRIER_TIMEOUT: u32 = 20003;
    pub const CLIENT_REGIONS_EXHAUSTED: u32 = 20004;
}

/// Whether a status finishes an operation instead of triggering a retry or hedge.
///
/// Successes and client errors are final. `404` is final only without a
/// sub-status, since `404/1002` is a replica lagging behind the session.
pub fn is_non_transient(status_code: u16, sub_status_code: u32) -> bool {
    if status_code < 400 {
        return true;
    }
    match status_code {
        status::BAD_REQUEST
        | status::UNAUTHORIZED
        | status::METHOD_NOT_ALLOWED
        | status::CONFLICT
        | status::PRECONDITION_FAILED
        | status::REQUEST_ENTITY_TOO_LARGE => true,
        status::NOT_FOUND => sub_status_code == sub_status::UNKNOWN,
        _ => false,
    }
}
