use ndarray::{Array1, Array2, Array3};

use crate::error::{CoordinatorError, Result};

/// Mixture weights for a round.
#[derive(Debug, Clone)]
pub enum Weights {
    /// The same `ncomp` weights for every unit.
    Shared(Array1<f64>),
    /// One row of `ncomp` weights per unit, indexed by global id.
    ///
    /// In heterogeneous pools a unit is a sub-dataset, in homogeneous pools a partition.
    PerDataset(Array2<f64>),
}

/// The parameters broadcast to the workers in every round.
#[derive(Debug, Clone)]
pub struct MixtureParams {
    pub weights: Weights,
    /// `ncomp × ndim`
    pub means: Array2<f64>,
    /// `ncomp × ndim × ndim`
    pub covariances: Array3<f64>,
}

impl MixtureParams {
    pub fn new(weights: Weights, means: Array2<f64>, covariances: Array3<f64>) -> Self {
        Self {
            weights,
            means,
            covariances,
        }
    }

    pub fn ncomp(&self) -> usize {
        self.means.nrows()
    }

    pub fn ndim(&self) -> usize {
        self.means.ncols()
    }

    /// Checks every buffer against the amount of components and the pool's dimension.
    ///
    /// # Arguments
    /// * `ndim` - The dimension of the pool's observations.
    /// * `nunits` - The amount of units in the pool's assignment table.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` describing the first disagreement.
    pub fn validate(&self, ndim: usize, nunits: usize) -> Result<()> {
        let ncomp = self.ncomp();

        if ncomp == 0 {
            return Err(CoordinatorError::ShapeMismatch(
                "at least one component is required".into(),
            ));
        }

        if self.ndim() != ndim {
            return Err(CoordinatorError::ShapeMismatch(format!(
                "means have dimension {}, the data has {ndim}",
                self.ndim()
            )));
        }

        if self.covariances.dim() != (ncomp, ndim, ndim) {
            return Err(CoordinatorError::ShapeMismatch(format!(
                "covariances are {:?}, expected {:?}",
                self.covariances.dim(),
                (ncomp, ndim, ndim)
            )));
        }

        match &self.weights {
            Weights::Shared(weights) if weights.len() != ncomp => {
                Err(CoordinatorError::ShapeMismatch(format!(
                    "{} weights for {ncomp} components",
                    weights.len()
                )))
            }
            Weights::PerDataset(weights) if weights.dim() != (nunits, ncomp) => {
                Err(CoordinatorError::ShapeMismatch(format!(
                    "weights are {:?}, expected {:?}",
                    weights.dim(),
                    (nunits, ncomp)
                )))
            }
            _ => Ok(()),
        }
    }

    /// The weights of the unit with the given global id, in wire order.
    pub(crate) fn unit_weights(&self, global_id: usize) -> Vec<f64> {
        match &self.weights {
            Weights::Shared(weights) => weights.to_vec(),
            Weights::PerDataset(weights) => weights.row(global_id).to_vec(),
        }
    }

    pub(crate) fn flat_means(&self) -> Vec<f64> {
        self.means.iter().copied().collect()
    }

    pub(crate) fn flat_covariances(&self) -> Vec<f64> {
        self.covariances.iter().copied().collect()
    }
}
