use std::{env, process::ExitCode};

use coordinator::{DatasetShape, MixtureParams, PoolConfig, Weights, create_pool};
use log::{error, info};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

const NCOMP: usize = 3;
const NDIM: usize = 2;
const NOBS: usize = 3000;
const ITERATIONS: usize = 10;

/// Draws `NOBS` points around `NCOMP` well separated centers.
fn synthetic_data(rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((NOBS, NDIM), |(i, _)| {
        let center = (i % NCOMP) as f64 * 10.0;
        center + rng.sample::<f64, _>(StandardNormal)
    })
}

fn initial_params(rng: &mut StdRng) -> MixtureParams {
    let weights = Array1::from_elem(NCOMP, 1.0 / NCOMP as f64);
    let means = Array2::from_shape_fn((NCOMP, NDIM), |_| rng.random_range(0.0..20.0));
    let mut covariances = Array3::zeros((NCOMP, NDIM, NDIM));
    for k in 0..NCOMP {
        for d in 0..NDIM {
            covariances[[k, d, d]] = 4.0;
        }
    }

    MixtureParams::new(Weights::Shared(weights), means, covariances)
}

fn run(config: PoolConfig) -> coordinator::Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or(42));
    let mut pool = create_pool(&config)?;

    pool.initialize(DatasetShape::Homogeneous(synthetic_data(&mut rng)))?;
    let mut params = initial_params(&mut rng);

    for iteration in 0..ITERATIONS {
        let stats = pool.expected_stats(&params)?;
        info!(
            "iteration {iteration}: log likelihood {:.3}",
            stats.log_likelihood
        );

        let counts = stats.counts.mapv(|c| c.max(f64::EPSILON));
        params.means = &stats.mean_sums / &counts.view().insert_axis(Axis(1));
        params.weights = Weights::Shared(&counts / NOBS as f64);
    }

    let labels = pool.assign_labels(&params, false)?;
    let mut sizes = [0usize; NCOMP];
    for &label in labels.labels() {
        if let Some(size) = usize::try_from(label).ok().and_then(|l| sizes.get_mut(l)) {
            *size += 1;
        }
    }

    info!("final means: {}", params.means);
    info!("cluster sizes: {sizes:?}");

    pool.terminate();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => PoolConfig::load(path),
        None => Ok(PoolConfig::new("worker", vec![0, 1]).with_seed(42)),
    };

    match config.and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
