use std::io;

use comms::{
    OnoReceiver, OnoSender, ProtocolErr,
    task::{self, InitRequest, LabelUnit, StatsUnit, TaskRequest, UnitRequest},
};
use log::{debug, info, warn};
use ndarray::Array2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    config::WorkerConfig,
    error::{Result, WorkerErr},
    kernel::{Components, Kernel},
};

/// A pool member: holds its loaded datasets and answers the coordinator's tasks.
pub struct Worker<K: Kernel> {
    config: WorkerConfig,
    kernel: K,
    datasets: Vec<Array2<f64>>,
}

impl<K: Kernel> Worker<K> {
    /// Creates a new `Worker` with no data loaded.
    ///
    /// # Args
    /// * `config` - The worker's place in the pool.
    /// * `kernel` - The numeric kernel every round is evaluated with.
    pub fn new(config: WorkerConfig, kernel: K) -> Self {
        Self {
            config,
            kernel,
            datasets: Vec::new(),
        }
    }

    /// The amount of datasets loaded so far.
    pub fn loaded(&self) -> usize {
        self.datasets.len()
    }

    /// Serves tasks until the poison pill arrives or the coordinator hangs up.
    ///
    /// Failures evaluating a round are reported back to the coordinator as an
    /// error frame and the worker keeps serving.
    ///
    /// # Args
    /// * `rx` - Receiving end of the coordinator channel.
    /// * `tx` - Sending end of the coordinator channel.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures or malformed requests.
    pub async fn run<R, W>(&mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let worker = self.config.index;

        loop {
            debug!(worker = worker; "waiting for task");

            let request = match task::recv_request(&mut rx, &mut buf).await {
                Ok(request) => request,
                Err(ProtocolErr::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(worker = worker; "coordinator closed the channel");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match request {
                TaskRequest::Init(init) => match self.load(init) {
                    Ok(local_index) => task::send_init_ack(&mut tx, local_index).await?,
                    Err(e) => report(&mut tx, worker, e).await?,
                },
                TaskRequest::AssignLabels(units) => match self.assign_labels(&units) {
                    Ok(results) => task::send_label_results(&mut tx, &results).await?,
                    Err(e) => report(&mut tx, worker, e).await?,
                },
                TaskRequest::ExpectedStats(units) => match self.expected_stats(&units) {
                    Ok(results) => task::send_stats_results(&mut tx, &results).await?,
                    Err(e) => report(&mut tx, worker, e).await?,
                },
                TaskRequest::Shutdown => {
                    info!(worker = worker; "poison pill received");
                    return Ok(());
                }
            }
        }
    }

    fn load(&mut self, init: InitRequest) -> Result<usize> {
        if init.device != self.config.device {
            warn!(
                worker = self.config.index;
                "data for device {} loaded on device {}", init.device, self.config.device
            );
        }

        let data = Array2::from_shape_vec((init.nobs, init.ndim), init.data)
            .map_err(|e| WorkerErr::Kernel(format!("malformed dataset: {e}")))?;

        let local_index = self.datasets.len();
        self.datasets.push(data);

        debug!(
            worker = self.config.index,
            local_index = local_index,
            nobs = init.nobs;
            "dataset loaded"
        );
        Ok(local_index)
    }

    fn assign_labels(&mut self, units: &[UnitRequest]) -> Result<Vec<LabelUnit>> {
        units
            .iter()
            .map(|unit| {
                let components = Components::from_request(unit)?;
                let data = dataset(&self.datasets, unit.local_index)?;

                let out = self
                    .kernel
                    .assign_labels(data.view(), &components, unit.relabel)?;

                Ok(LabelUnit {
                    global_id: unit.global_id,
                    labels: out.labels,
                    z: out.z,
                })
            })
            .collect()
    }

    fn expected_stats(&mut self, units: &[UnitRequest]) -> Result<Vec<StatsUnit>> {
        let mut results = Vec::with_capacity(units.len());

        for unit in units {
            let components = Components::from_request(unit)?;
            let data = dataset(&self.datasets, unit.local_index)?.view();
            let stats = self.kernel.expected_stats(data, &components)?;

            results.push(StatsUnit {
                global_id: unit.global_id,
                nobs: data.nrows(),
                counts: stats.counts.to_vec(),
                mean_sums: stats.mean_sums.iter().copied().collect(),
                density: stats.density.iter().copied().collect(),
                log_likelihood: stats.log_likelihood,
            });
        }

        Ok(results)
    }
}

fn dataset(datasets: &[Array2<f64>], local_index: usize) -> Result<&Array2<f64>> {
    datasets.get(local_index).ok_or(WorkerErr::UnknownDataset {
        local_index,
        loaded: datasets.len(),
    })
}

/// Reports a failed task to the coordinator in place of its answer.
async fn report<W>(tx: &mut OnoSender<W>, worker: usize, err: WorkerErr) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    warn!(worker = worker; "task failed: {err}");
    task::send_error(tx, &err.to_string()).await?;
    Ok(())
}
