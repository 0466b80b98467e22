//! Coordination of a pool of worker processes running Gaussian mixture rounds.
//!
//! A [`Pool`] spawns one worker per device, partitions a dataset across them
//! once and then runs label assignment and expected statistics rounds, merging
//! every worker's answer into a single result in input order.

pub mod aggregate;
mod blocking;
pub mod config;
pub mod dataset;
pub mod error;
mod link;
pub mod params;
pub mod partition;
mod pool;
mod round;
mod shutdown;
pub mod table;

pub use aggregate::{ExpectedStats, LabelAssignment};
pub use blocking::{BlockingPool, create_pool, terminate};
pub use config::PoolConfig;
pub use dataset::DatasetShape;
pub use error::{CoordinatorError, Result};
pub use params::{MixtureParams, Weights};
pub use pool::{Pool, ProcessPool};
pub use table::{AssignmentTable, Partition, UnitEntry, WorkerHandle};
