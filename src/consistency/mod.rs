//! Consistency coordination: write barriers and quorum reads.

mod barrier;
mod quorum;

pub use barrier::{barrier_requirement, BarrierOptions, BarrierRequirement, WriteBarrierCoordinator};
pub use quorum::{read_mode, read_quorum, QuorumOptions, QuorumReader, ReadMode};
