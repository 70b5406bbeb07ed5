//! Deterministic simulation support.

pub mod rng;

pub use rng::DeterministicRng;
