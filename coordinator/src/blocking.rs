use tokio::runtime::{Builder, Runtime};

use crate::{
    aggregate::{ExpectedStats, LabelAssignment},
    config::PoolConfig,
    dataset::DatasetShape,
    error::Result,
    params::MixtureParams,
    pool::ProcessPool,
    table::AssignmentTable,
};

/// A synchronous handle over a process pool.
///
/// Owns a current thread runtime and blocks on every call, so it can be driven
/// from code that is not async.
pub struct BlockingPool {
    runtime: Runtime,
    pool: ProcessPool,
}

impl BlockingPool {
    pub fn size(&self) -> usize {
        self.pool.size()
    }

    pub fn device_ids(&self) -> Vec<i32> {
        self.pool.device_ids()
    }

    pub fn table(&self) -> Option<&AssignmentTable> {
        self.pool.table()
    }

    /// See [`crate::Pool::initialize`].
    pub fn initialize(&mut self, data: DatasetShape) -> Result<&AssignmentTable> {
        self.runtime.block_on(self.pool.initialize(data))
    }

    /// See [`crate::Pool::assign_labels`].
    pub fn assign_labels(
        &mut self,
        params: &MixtureParams,
        relabel: bool,
    ) -> Result<LabelAssignment> {
        self.runtime
            .block_on(self.pool.assign_labels(params, relabel))
    }

    /// See [`crate::Pool::expected_stats`].
    pub fn expected_stats(&mut self, params: &MixtureParams) -> Result<ExpectedStats> {
        self.runtime.block_on(self.pool.expected_stats(params))
    }

    /// Sends the poison pill to every worker and releases the pool.
    pub fn terminate(self) {
        let Self { runtime, pool } = self;
        runtime.block_on(pool.terminate());
    }
}

/// Spawns one worker process per configured device.
///
/// # Errors
/// Returns `Spawn` or `InvalidConfig` if the pool can't be brought up, or `Io`
/// if the runtime can't be built.
pub fn create_pool(config: &PoolConfig) -> Result<BlockingPool> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let pool = runtime.block_on(ProcessPool::spawn(config))?;

    Ok(BlockingPool { runtime, pool })
}

/// Stops every worker of `pool`, consuming it.
pub fn terminate(pool: BlockingPool) {
    pool.terminate();
}
