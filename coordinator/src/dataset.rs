use ndarray::Array2;

use crate::error::{CoordinatorError, Result};

/// The data a pool is initialized with, chosen once for its whole lifetime.
#[derive(Debug, Clone)]
pub enum DatasetShape {
    /// A single `nobs × ndim` table, split row wise across every worker.
    Homogeneous(Array2<f64>),
    /// Independently sized tables, each kept whole on a single worker.
    Heterogeneous(Vec<Array2<f64>>),
}

impl DatasetShape {
    /// The amount of observations over every table.
    pub fn nobs(&self) -> usize {
        match self {
            DatasetShape::Homogeneous(table) => table.nrows(),
            DatasetShape::Heterogeneous(tables) => tables.iter().map(Array2::nrows).sum(),
        }
    }

    /// The dimension of the observations, 0 for an empty collection.
    pub fn ndim(&self) -> usize {
        match self {
            DatasetShape::Homogeneous(table) => table.ncols(),
            DatasetShape::Heterogeneous(tables) => tables.first().map_or(0, Array2::ncols),
        }
    }

    /// Checks that the tables share a dimension and hold at least one observation.
    ///
    /// A homogeneous table must have rows to split. In a heterogeneous
    /// collection individual tables may be empty, but not all of them.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` describing the first offending table.
    pub fn validate(&self) -> Result<()> {
        match self {
            DatasetShape::Homogeneous(table) => {
                if table.nrows() == 0 {
                    return Err(CoordinatorError::ShapeMismatch("table 0 has no rows".into()));
                }
                check_table(0, table, table.ncols())
            }
            DatasetShape::Heterogeneous(tables) => {
                let Some(first) = tables.first() else {
                    return Err(CoordinatorError::ShapeMismatch(
                        "heterogeneous dataset has no tables".into(),
                    ));
                };

                let ndim = first.ncols();
                tables
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, table)| check_table(i, table, ndim))?;

                if self.nobs() == 0 {
                    return Err(CoordinatorError::ShapeMismatch(
                        "heterogeneous dataset has no observations".into(),
                    ));
                }

                Ok(())
            }
        }
    }
}

fn check_table(index: usize, table: &Array2<f64>, ndim: usize) -> Result<()> {
    if table.ncols() == 0 {
        return Err(CoordinatorError::ShapeMismatch(format!(
            "table {index} has no columns"
        )));
    }

    if table.ncols() != ndim {
        return Err(CoordinatorError::ShapeMismatch(format!(
            "table {index} has {} columns, expected {ndim}",
            table.ncols()
        )));
    }

    Ok(())
}
