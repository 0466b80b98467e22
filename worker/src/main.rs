use std::io;

use log::info;
use tokio::signal;

use worker::{CpuKernel, Worker, WorkerConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = WorkerConfig::from_env()?;
    info!(
        "worker {} starting on device {}",
        config.index, config.device
    );

    let (rx, tx) = comms::channel(tokio::io::stdin(), tokio::io::stdout());
    let mut worker = Worker::new(config, CpuKernel::new(config.sampler_seed()));

    tokio::select! {
        ret = worker.run(rx, tx) => {
            ret?;
            info!("wrapping up, {} dataset(s) released", worker.loaded());
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}
