use comms::task::UnitRequest;
use ndarray::{Array1, Array2, Array3, ArrayView2};

use crate::error::{Result, WorkerErr};

/// The mixture parameters of a single unit, shaped.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    /// `ncomp`
    pub weights: Array1<f64>,
    /// `ncomp × ndim`
    pub means: Array2<f64>,
    /// `ncomp × ndim × ndim`
    pub covariances: Array3<f64>,
}

impl Components {
    /// Reshapes the flat buffers of a unit request.
    ///
    /// # Errors
    /// Returns `Kernel` if a buffer doesn't match `ncomp` and `ndim`.
    pub fn from_request(unit: &UnitRequest) -> Result<Self> {
        let (ncomp, ndim) = (unit.ncomp, unit.ndim);
        let shape_err = |e: ndarray::ShapeError| WorkerErr::Kernel(format!("malformed parameters: {e}"));

        Ok(Self {
            weights: Array1::from(unit.weights.clone()),
            means: Array2::from_shape_vec((ncomp, ndim), unit.means.clone()).map_err(shape_err)?,
            covariances: Array3::from_shape_vec((ncomp, ndim, ndim), unit.covariances.clone())
                .map_err(shape_err)?,
        })
    }

    pub fn ncomp(&self) -> usize {
        self.weights.len()
    }
}

/// The sufficient statistics of one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitStats {
    /// Expected amount of observations per component, `ncomp`.
    pub counts: Array1<f64>,
    /// Responsibility weighted observation sums, `ncomp × ndim`.
    pub mean_sums: Array2<f64>,
    /// Posterior component probabilities, `nobs × ncomp`.
    pub density: Array2<f64>,
    pub log_likelihood: f64,
}

/// The labels sampled for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLabels {
    pub labels: Vec<i32>,
    pub z: Option<Vec<i32>>,
}

/// The numeric computations a worker runs on its device.
pub trait Kernel {
    /// Samples a component for every observation of `data`.
    ///
    /// When `relabel` is set, also returns each label's secondary index.
    fn assign_labels(
        &mut self,
        data: ArrayView2<'_, f64>,
        components: &Components,
        relabel: bool,
    ) -> Result<UnitLabels>;

    /// Computes the expected sufficient statistics of `data`.
    fn expected_stats(&mut self, data: ArrayView2<'_, f64>, components: &Components) -> Result<UnitStats>;
}
