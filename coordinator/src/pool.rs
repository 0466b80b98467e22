use std::{collections::HashSet, process::Stdio, time::Duration};

use comms::task::{self, InitRequest, TaskRequest};
use log::{debug, info, warn};
use ndarray::{ArrayView2, s};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{self, ExpectedStats, LabelAssignment},
    config::PoolConfig,
    dataset::DatasetShape,
    error::{CoordinatorError, Result},
    link::{RecvGuard, WorkerLink},
    params::MixtureParams,
    partition::Plan,
    round::{self, Round},
    shutdown,
    table::AssignmentTable,
};

/// A pool backed by spawned worker processes.
pub type ProcessPool = Pool<ChildStdout, ChildStdin>;

/// A fixed group of workers, one per device, and the data they hold.
///
/// The pool goes through three stages: it is created, initialized exactly once
/// with a dataset and then runs any amount of rounds until it is terminated.
/// Rounds take `&mut self`, so only one can be in flight at a time.
pub struct Pool<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    links: Vec<WorkerLink<R, W>>,
    children: Vec<Child>,
    guard: RecvGuard,
    table: Option<AssignmentTable>,
}

impl ProcessPool {
    /// Launches one worker process per configured device.
    ///
    /// Every worker speaks the protocol through its stdin and stdout, inherits
    /// the coordinator's stderr and learns its place in the pool through the
    /// `WORKER_INDEX`, `WORKER_DEVICE` and `WORKER_SEED` environment variables.
    ///
    /// # Errors
    /// Returns `Spawn` if the configuration can't be satisfied or a process
    /// fails to start, in which case the already started ones are killed.
    pub async fn spawn(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut children: Vec<Child> = Vec::with_capacity(config.device_ids.len());
        let mut links = Vec::with_capacity(config.device_ids.len());

        for (i, &device) in config.device_ids.iter().enumerate() {
            let spawned = Self::spawn_worker(config, i, device);

            let (child, stdout, stdin) = match spawned {
                Ok(parts) => parts,
                Err(e) => {
                    for child in &mut children {
                        if let Err(e) = child.start_kill() {
                            warn!("failed to kill worker process: {e}");
                        }
                    }
                    return Err(e);
                }
            };

            debug!(worker = i, device = device; "worker process started");
            links.push(WorkerLink::new(i, device, stdout, stdin));
            children.push(child);
        }

        info!(
            "spawned {} worker(s) from {}",
            links.len(),
            config.executable.display()
        );

        Ok(Self {
            links,
            children,
            guard: RecvGuard {
                timeout: config.recv_timeout(),
                cancel: None,
            },
            table: None,
        })
    }

    fn spawn_worker(
        config: &PoolConfig,
        index: usize,
        device: i32,
    ) -> Result<(Child, ChildStdout, ChildStdin)> {
        let mut command = Command::new(&config.executable);
        command
            .args(&config.args)
            .env("WORKER_INDEX", index.to_string())
            .env("WORKER_DEVICE", device.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(seed) = config.seed {
            command.env("WORKER_SEED", seed.to_string());
        }

        let mut child = command.spawn().map_err(|e| CoordinatorError::Spawn {
            detail: format!(
                "cannot launch '{}' for device {device}",
                config.executable.display()
            ),
            source: Some(e),
        })?;

        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            let _ = child.start_kill();
            return Err(CoordinatorError::Spawn {
                detail: format!("worker {index} has no piped stdio"),
                source: None,
            });
        };

        Ok((child, stdout, stdin))
    }
}

impl<R, W> Pool<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Builds a pool over already connected channels, one per device.
    ///
    /// # Arguments
    /// * `device_ids` - The device of every worker, in worker index order.
    /// * `channels` - The reading and writing halves of every worker's channel.
    ///
    /// # Errors
    /// Returns `Spawn` if the lists are empty, differ in length or repeat a device.
    pub fn from_channels(device_ids: Vec<i32>, channels: Vec<(R, W)>) -> Result<Self> {
        if device_ids.len() != channels.len() {
            return Err(CoordinatorError::Spawn {
                detail: format!(
                    "{} devices for {} channels",
                    device_ids.len(),
                    channels.len()
                ),
                source: None,
            });
        }

        if device_ids.is_empty() {
            return Err(CoordinatorError::Spawn {
                detail: "at least one device id is required".into(),
                source: None,
            });
        }

        let unique: HashSet<_> = device_ids.iter().collect();
        if unique.len() != device_ids.len() {
            return Err(CoordinatorError::Spawn {
                detail: "device ids must be unique".into(),
                source: None,
            });
        }

        let links = device_ids
            .into_iter()
            .zip(channels)
            .enumerate()
            .map(|(i, (device, (rx, tx)))| WorkerLink::new(i, device, rx, tx))
            .collect();

        Ok(Self {
            links,
            children: Vec::new(),
            guard: RecvGuard::default(),
            table: None,
        })
    }

    /// Bounds every receive from a worker by `timeout`.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.guard.timeout = Some(timeout);
        self
    }

    /// Aborts any receive from a worker as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.guard.cancel = Some(token);
        self
    }

    pub fn size(&self) -> usize {
        self.links.len()
    }

    pub fn device_ids(&self) -> Vec<i32> {
        self.links.iter().map(|link| link.device_id).collect()
    }

    /// The assignment table, available once the pool is initialized.
    pub fn table(&self) -> Option<&AssignmentTable> {
        self.table.as_ref()
    }

    /// Partitions `data` across the workers and loads every unit.
    ///
    /// A homogeneous table is split into one contiguous partition per worker,
    /// the tables of a heterogeneous collection are dealt round robin. Each
    /// unit is sent with its own init request and the identifier the worker
    /// acknowledges it with is recorded in the assignment table.
    ///
    /// # Errors
    /// * `InvalidState` if the pool was already initialized.
    /// * `ShapeMismatch` if the dataset is malformed or smaller than the pool.
    /// * Any error of a worker while loading its data.
    pub async fn initialize(&mut self, data: DatasetShape) -> Result<&AssignmentTable> {
        if self.table.is_some() {
            return Err(CoordinatorError::InvalidState(
                "the pool is already initialized".into(),
            ));
        }

        let plan = Plan::new(&data, &self.device_ids())?;
        let mut local_indices = Vec::with_capacity(plan.units.len());
        let mut loaded = vec![HashSet::new(); self.links.len()];

        for unit in &plan.units {
            let view = match &data {
                DatasetShape::Homogeneous(table) => table.slice(s![unit.rows.clone(), ..]),
                DatasetShape::Heterogeneous(tables) => tables[unit.global_id].view(),
            };

            let link = &mut self.links[unit.worker_index];
            let request = TaskRequest::Init(init_request(view, link.device_id));

            task::send_request(&mut link.tx, &request)
                .await
                .map_err(|e| CoordinatorError::from_protocol(link.index, e))?;

            let local_index = self
                .guard
                .watch(link.index, task::recv_init_ack(&mut link.rx, &mut link.buf))
                .await?;

            if !loaded[link.index].insert(local_index) {
                return Err(CoordinatorError::aggregation(
                    link.index,
                    format!("local index {local_index} acknowledged twice"),
                ));
            }

            debug!(
                worker = link.index,
                global_id = unit.global_id,
                local_index = local_index;
                "unit loaded"
            );
            local_indices.push(local_index);
        }

        info!(
            "initialized {} unit(s) with {} observation(s) on {} worker(s)",
            plan.units.len(),
            data.nobs(),
            self.links.len()
        );

        Ok(&*self.table.insert(plan.into_table(local_indices)))
    }

    /// Samples a component label for every observation of the pool.
    ///
    /// # Arguments
    /// * `params` - The mixture parameters of the round.
    /// * `relabel` - Whether to also compute the secondary `z` labels.
    ///
    /// # Returns
    /// The labels of every observation, in input order.
    ///
    /// # Errors
    /// * `InvalidState` if the pool is not initialized.
    /// * `ShapeMismatch` if `params` disagrees with the data.
    /// * Any error of a worker during the round.
    pub async fn assign_labels(
        &mut self,
        params: &MixtureParams,
        relabel: bool,
    ) -> Result<LabelAssignment> {
        let table = Self::ready(&self.table, params)?;

        round::dispatch(&mut self.links, table, params, Round::AssignLabels { relabel }).await?;
        let partials = round::collect_labels(&mut self.links, table, &self.guard, relabel).await?;

        aggregate::merge_labels(table, partials, relabel)
    }

    /// Computes the pool wide expected sufficient statistics.
    ///
    /// # Errors
    /// * `InvalidState` if the pool is not initialized.
    /// * `ShapeMismatch` if `params` disagrees with the data.
    /// * Any error of a worker during the round.
    pub async fn expected_stats(&mut self, params: &MixtureParams) -> Result<ExpectedStats> {
        let table = Self::ready(&self.table, params)?;
        let ncomp = params.ncomp();

        round::dispatch(&mut self.links, table, params, Round::ExpectedStats).await?;
        let partials = round::collect_stats(&mut self.links, table, &self.guard, ncomp).await?;

        aggregate::merge_stats(table, partials, ncomp)
    }

    /// Stops every worker and releases the pool.
    ///
    /// The poison pill is sent once to each worker and the channels are closed,
    /// the worker processes are left to exit on their own.
    pub async fn terminate(mut self) {
        shutdown::broadcast(&mut self.links).await;

        if !self.children.is_empty() {
            debug!("releasing {} worker process(es)", self.children.len());
        }
    }

    fn ready<'a>(
        table: &'a Option<AssignmentTable>,
        params: &MixtureParams,
    ) -> Result<&'a AssignmentTable> {
        let table = table.as_ref().ok_or_else(|| {
            CoordinatorError::InvalidState("the pool must be initialized before a round".into())
        })?;

        params.validate(table.ndim(), table.units().len())?;
        Ok(table)
    }
}

fn init_request(view: ArrayView2<'_, f64>, device: i32) -> InitRequest {
    InitRequest {
        nobs: view.nrows(),
        ndim: view.ncols(),
        device,
        data: view.iter().copied().collect(),
    }
}
