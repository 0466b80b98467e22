//! Deterministic assignment of observations, or whole sub-datasets, to workers.

use std::ops::Range;

use crate::{
    dataset::DatasetShape,
    error::{CoordinatorError, Result},
    table::{AssignmentTable, Partition, UnitEntry, WorkerHandle},
};

/// Splits `nobs` rows into `ndev` contiguous partitions.
///
/// Every partition gets `nobs / ndev` rows and the last one also absorbs the
/// remainder, so the partitions always cover `[0, nobs)` with no gaps or overlaps.
///
/// # Errors
/// Returns `ShapeMismatch` if there are fewer rows than workers, since some
/// partition would be left empty.
pub fn contiguous(nobs: usize, ndev: usize) -> Result<Vec<Range<usize>>> {
    if ndev == 0 || nobs < ndev {
        return Err(CoordinatorError::ShapeMismatch(format!(
            "{nobs} observations can't be split across {ndev} workers"
        )));
    }

    let chunk = nobs / ndev;
    let partitions = (0..ndev)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == ndev { nobs } else { start + chunk };
            start..end
        })
        .collect();

    Ok(partitions)
}

/// Assigns sub-dataset `i` to worker `i mod ndev`.
///
/// # Returns
/// For every worker, the indices of its sub-datasets in ascending order. Workers
/// past `ndata` get an empty list.
pub fn round_robin(ndata: usize, ndev: usize) -> Vec<Vec<usize>> {
    let mut assignment = vec![Vec::new(); ndev];

    if ndev > 0 {
        for dataset in 0..ndata {
            assignment[dataset % ndev].push(dataset);
        }
    }

    assignment
}

/// A unit of work before its data is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub global_id: usize,
    pub worker_index: usize,
    pub rows: Range<usize>,
}

/// The outcome of partitioning, still missing the workers' local identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub ndim: usize,
    pub workers: Vec<WorkerHandle>,
    /// In ascending global id order.
    pub units: Vec<PlannedUnit>,
}

impl Plan {
    /// Partitions `data` across one worker per device.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the dataset is malformed or too small.
    pub fn new(data: &DatasetShape, device_ids: &[i32]) -> Result<Self> {
        data.validate()?;

        match data {
            DatasetShape::Homogeneous(table) => Self::homogeneous(table.nrows(), data.ndim(), device_ids),
            DatasetShape::Heterogeneous(tables) => {
                let sizes: Vec<_> = tables.iter().map(|table| table.nrows()).collect();
                Ok(Self::heterogeneous(&sizes, data.ndim(), device_ids))
            }
        }
    }

    fn homogeneous(nobs: usize, ndim: usize, device_ids: &[i32]) -> Result<Self> {
        let partitions = contiguous(nobs, device_ids.len())?;

        let units = partitions
            .iter()
            .enumerate()
            .map(|(i, rows)| PlannedUnit {
                global_id: i,
                worker_index: i,
                rows: rows.clone(),
            })
            .collect();

        let workers = partitions
            .into_iter()
            .zip(device_ids)
            .enumerate()
            .map(|(i, (rows, &device_id))| WorkerHandle {
                worker_index: i,
                device_id,
                partition: Partition::Rows(rows),
            })
            .collect();

        Ok(Self {
            ndim,
            workers,
            units,
        })
    }

    fn heterogeneous(sizes: &[usize], ndim: usize, device_ids: &[i32]) -> Self {
        let assignment = round_robin(sizes.len(), device_ids.len());

        let mut offset = 0;
        let units = sizes
            .iter()
            .enumerate()
            .map(|(dataset, &size)| {
                let rows = offset..offset + size;
                offset += size;

                PlannedUnit {
                    global_id: dataset,
                    worker_index: dataset % device_ids.len(),
                    rows,
                }
            })
            .collect();

        let workers = assignment
            .into_iter()
            .zip(device_ids)
            .enumerate()
            .map(|(i, (datasets, &device_id))| WorkerHandle {
                worker_index: i,
                device_id,
                partition: Partition::Datasets(datasets),
            })
            .collect();

        Self {
            ndim,
            workers,
            units,
        }
    }

    /// Completes the plan with the identifiers returned by the workers.
    ///
    /// # Arguments
    /// * `local_indices` - One per unit, in ascending global id order.
    pub fn into_table(self, local_indices: Vec<usize>) -> AssignmentTable {
        debug_assert_eq!(self.units.len(), local_indices.len());

        let units = self
            .units
            .into_iter()
            .zip(local_indices)
            .map(|(unit, local_index)| UnitEntry {
                global_id: unit.global_id,
                worker_index: unit.worker_index,
                local_index,
                rows: unit.rows,
            })
            .collect();

        AssignmentTable::new(self.ndim, self.workers, units)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn assert_covers(partitions: &[Range<usize>], nobs: usize) {
        assert_eq!(partitions.first().map(|p| p.start), Some(0));
        assert_eq!(partitions.last().map(|p| p.end), Some(nobs));
        assert!(partitions.windows(2).all(|w| w[0].end == w[1].start));
        assert!(partitions.iter().all(|p| !p.is_empty()));
        assert_eq!(partitions.iter().map(|p| p.len()).sum::<usize>(), nobs);
    }

    #[test]
    fn even_split() {
        let partitions = contiguous(1000, 4).unwrap();
        assert_eq!(partitions, [0..250, 250..500, 500..750, 750..1000]);
    }

    #[test]
    fn last_partition_absorbs_the_remainder() {
        let partitions = contiguous(10, 3).unwrap();
        assert_eq!(partitions, [0..3, 3..6, 6..10]);
    }

    #[test]
    fn every_split_covers_the_rows() {
        for ndev in 1..=9 {
            for nobs in ndev..60 {
                assert_covers(&contiguous(nobs, ndev).unwrap(), nobs);
            }
        }
    }

    #[test]
    fn fewer_rows_than_workers_is_rejected() {
        assert!(matches!(
            contiguous(3, 4),
            Err(CoordinatorError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn round_robin_five_datasets_on_two_workers() {
        assert_eq!(round_robin(5, 2), [vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn round_robin_leaves_extra_workers_empty() {
        assert_eq!(round_robin(2, 4), [vec![0], vec![1], vec![], vec![]]);
    }

    #[test]
    fn round_robin_is_stable() {
        assert_eq!(round_robin(17, 3), round_robin(17, 3));

        let assignment = round_robin(17, 3);
        let mut all: Vec<_> = assignment.concat();
        all.sort_unstable();
        assert_eq!(all, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn heterogeneous_plan_records_offsets() {
        let tables = vec![
            Array2::zeros((3, 2)),
            Array2::zeros((1, 2)),
            Array2::zeros((4, 2)),
        ];
        let plan = Plan::new(&DatasetShape::Heterogeneous(tables), &[7, 9]).unwrap();

        let rows: Vec<_> = plan.units.iter().map(|u| u.rows.clone()).collect();
        assert_eq!(rows, [0..3, 3..4, 4..8]);
        assert_eq!(plan.workers[0].partition, Partition::Datasets(vec![0, 2]));
        assert_eq!(plan.workers[1].device_id, 9);

        let table = plan.into_table(vec![0, 0, 1]);
        assert_eq!(table.dataset_location(2), Some((0, 1)));
        assert_eq!(table.nobs(), 8);
    }

    #[test]
    fn homogeneous_plan_has_one_unit_per_worker() {
        let data = DatasetShape::Homogeneous(Array2::zeros((1000, 3)));
        let plan = Plan::new(&data, &[0, 1, 2, 3]).unwrap();

        assert_eq!(plan.units.len(), 4);
        assert_eq!(plan.workers[3].partition, Partition::Rows(750..1000));

        let table = plan.into_table(vec![0; 4]);
        assert_eq!(table.units_of(2).count(), 1);
        assert_eq!(table.ndim(), 3);
    }
}
