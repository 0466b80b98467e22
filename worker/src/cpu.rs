//! A reference implementation of the worker kernels on the host CPU.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{SeedableRng, distr::Distribution, distr::weighted::WeightedIndex, rngs::StdRng};

use crate::{
    error::{Result, WorkerErr},
    kernel::{Components, Kernel, UnitLabels, UnitStats},
};

/// A single multivariate normal, kept in Cholesky form.
struct Gaussian<'a> {
    mean: ArrayView1<'a, f64>,
    chol: Array2<f64>,
    log_norm: f64,
}

impl<'a> Gaussian<'a> {
    fn new(component: usize, mean: ArrayView1<'a, f64>, covariance: ArrayView2<'_, f64>) -> Result<Self> {
        let chol = cholesky(covariance).ok_or_else(|| {
            WorkerErr::Kernel(format!(
                "covariance of component {component} is not positive definite"
            ))
        })?;

        let ndim = mean.len() as f64;
        let log_det_half: f64 = chol.diag().iter().map(|d| d.ln()).sum();
        let log_norm = -0.5 * ndim * (2.0 * PI).ln() - log_det_half;

        Ok(Self {
            mean,
            chol,
            log_norm,
        })
    }

    fn log_pdf(&self, x: ArrayView1<'_, f64>) -> f64 {
        let n = self.mean.len();
        let mut y = vec![0.0; n];
        let mut mahalanobis = 0.0;

        for i in 0..n {
            let mut sum = x[i] - self.mean[i];
            for k in 0..i {
                sum -= self.chol[[i, k]] * y[k];
            }
            y[i] = sum / self.chol[[i, i]];
            mahalanobis += y[i] * y[i];
        }

        self.log_norm - 0.5 * mahalanobis
    }
}

fn cholesky(a: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if !sum.is_finite() || sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Some(l)
}

fn log_sum_exp(values: ArrayView1<'_, f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if max == f64::NEG_INFINITY {
        return max;
    }

    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Posterior component probabilities of every observation and the total log likelihood.
fn responsibilities(data: ArrayView2<'_, f64>, components: &Components) -> Result<(Array2<f64>, f64)> {
    let ncomp = components.ncomp();

    if data.ncols() != components.means.ncols() {
        return Err(WorkerErr::Kernel(format!(
            "data has dimension {}, parameters have {}",
            data.ncols(),
            components.means.ncols()
        )));
    }

    if let Some(w) = components.weights.iter().find(|w| w.is_nan() || **w < 0.0) {
        return Err(WorkerErr::Kernel(format!("invalid mixture weight {w}")));
    }

    let gaussians = (0..ncomp)
        .map(|k| {
            Gaussian::new(
                k,
                components.means.row(k),
                components.covariances.index_axis(Axis(0), k),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let log_weights = components.weights.mapv(f64::ln);
    let mut resp = Array2::from_shape_fn((data.nrows(), ncomp), |(i, k)| {
        log_weights[k] + gaussians[k].log_pdf(data.row(i))
    });

    let mut log_likelihood = 0.0;
    for (i, mut row) in resp.axis_iter_mut(Axis(0)).enumerate() {
        let norm = log_sum_exp(row.view());
        if !norm.is_finite() {
            return Err(WorkerErr::Kernel(format!(
                "observation {i} has no probability under any component"
            )));
        }

        row.mapv_inplace(|v| (v - norm).exp());
        log_likelihood += norm;
    }

    Ok((resp, log_likelihood))
}

/// The position of every component when sorted by descending weight.
fn weight_ranks(weights: &Array1<f64>) -> Vec<i32> {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));

    let mut ranks = vec![0; weights.len()];
    for (rank, k) in order.into_iter().enumerate() {
        ranks[k] = rank as i32;
    }

    ranks
}

/// Evaluates every unit on the host with a seeded sampler.
pub struct CpuKernel {
    rng: StdRng,
}

impl CpuKernel {
    /// Creates a new `CpuKernel`, seeded from the OS when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self { rng }
    }
}

impl Kernel for CpuKernel {
    fn assign_labels(
        &mut self,
        data: ArrayView2<'_, f64>,
        components: &Components,
        relabel: bool,
    ) -> Result<UnitLabels> {
        let (resp, _) = responsibilities(data, components)?;

        let labels = resp
            .axis_iter(Axis(0))
            .map(|row| {
                let dist = WeightedIndex::new(row.iter())
                    .map_err(|e| WorkerErr::Kernel(format!("cannot sample a label: {e}")))?;
                Ok(dist.sample(&mut self.rng) as i32)
            })
            .collect::<Result<Vec<_>>>()?;

        let z = relabel.then(|| {
            let ranks = weight_ranks(&components.weights);
            labels.iter().map(|&l| ranks[l as usize]).collect()
        });

        Ok(UnitLabels { labels, z })
    }

    fn expected_stats(&mut self, data: ArrayView2<'_, f64>, components: &Components) -> Result<UnitStats> {
        let (density, log_likelihood) = responsibilities(data, components)?;

        Ok(UnitStats {
            counts: density.sum_axis(Axis(0)),
            mean_sums: density.t().dot(&data),
            density,
            log_likelihood,
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, array};

    use super::*;

    fn identity(ncomp: usize, ndim: usize) -> Array3<f64> {
        Array3::from_shape_fn((ncomp, ndim, ndim), |(_, i, j)| if i == j { 1.0 } else { 0.0 })
    }

    fn two_clusters() -> Components {
        Components {
            weights: array![0.3, 0.7],
            means: array![[-10.0, -10.0], [10.0, 10.0]],
            covariances: identity(2, 2),
        }
    }

    #[test]
    fn standard_normal_density_at_the_mean() {
        let mean = array![0.0];
        let cov = array![[1.0]];
        let gaussian = Gaussian::new(0, mean.view(), cov.view()).unwrap();

        let expected = -0.5 * (2.0 * PI).ln();
        assert!((gaussian.log_pdf(array![0.0].view()) - expected).abs() < 1e-12);
        assert!((gaussian.log_pdf(array![2.0].view()) - (expected - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn cholesky_reconstructs_the_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        let back = l.dot(&l.t());

        assert!(back.iter().zip(a.iter()).all(|(x, y)| (x - y).abs() < 1e-12));
    }

    #[test]
    fn singular_covariances_are_rejected() {
        let mut components = two_clusters();
        components.covariances.fill(0.0);

        let data = array![[0.0, 0.0]];
        let err = CpuKernel::new(Some(1))
            .expected_stats(data.view(), &components)
            .unwrap_err();
        assert!(matches!(err, WorkerErr::Kernel(_)));
    }

    #[test]
    fn separated_clusters_are_labeled_by_proximity() {
        let data = array![[-10.0, -9.5], [10.2, 9.9], [-9.8, -10.1], [9.7, 10.3]];
        let mut kernel = CpuKernel::new(Some(7));

        let out = kernel.assign_labels(data.view(), &two_clusters(), true).unwrap();

        assert_eq!(out.labels, [0, 1, 0, 1]);
        assert_eq!(out.z.unwrap(), [1, 0, 1, 0]);
    }

    #[test]
    fn seeded_kernels_repeat_their_samples() {
        let components = Components {
            weights: array![0.5, 0.5],
            means: array![[0.0], [0.5]],
            covariances: identity(2, 1),
        };
        let data = Array2::from_shape_fn((200, 1), |(i, _)| i as f64 / 200.0);

        let first = CpuKernel::new(Some(3)).assign_labels(data.view(), &components, false).unwrap();
        let second = CpuKernel::new(Some(3)).assign_labels(data.view(), &components, false).unwrap();

        assert_eq!(first, second);
        assert!(first.z.is_none());
    }

    #[test]
    fn responsibilities_sum_to_one() {
        let data = array![[0.0, 0.0], [1.0, -1.0], [5.0, 5.0]];
        let stats = CpuKernel::new(None).expected_stats(data.view(), &two_clusters()).unwrap();

        for row in stats.density.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((stats.counts.sum() - 3.0).abs() < 1e-9);
        assert!(stats.log_likelihood.is_finite());
    }

    #[test]
    fn mean_sums_weight_observations_by_responsibility() {
        let data = array![[-10.0, -10.0], [10.0, 10.0], [10.0, 12.0]];
        let stats = CpuKernel::new(None).expected_stats(data.view(), &two_clusters()).unwrap();

        assert!((stats.counts[0] - 1.0).abs() < 1e-9);
        assert!((stats.counts[1] - 2.0).abs() < 1e-9);
        assert!((stats.mean_sums[[1, 1]] - 22.0).abs() < 1e-9);
        assert!((stats.mean_sums[[0, 0]] + 10.0).abs() < 1e-9);
    }

    #[test]
    fn ranks_follow_descending_weight() {
        assert_eq!(weight_ranks(&array![0.2, 0.5, 0.3]), [2, 0, 1]);
    }
}
