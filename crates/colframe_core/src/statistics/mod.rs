//! Streaming statistics used by the out-of-core algorithms.

pub mod quantile;

pub use self::quantile::ReservoirQuantile;
