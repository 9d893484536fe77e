//! Session consistency
//!
//! Session reads must observe the caller's own writes. The client records the
//! session token of every response per partition key range and sends it back
//! on later reads, so a replica that has not caught up answers `404/1002`
//! instead of stale data.

mod errors;
mod store;
mod token;

pub use errors::{SessionError, SessionResult};
pub use store::SessionTokenStore;
pub use token::{format_container_token, parse_container_token, VectorSessionToken};
