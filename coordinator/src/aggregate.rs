//! Validation and merging of the per worker results of a round.
//!
//! Results are always merged in ascending global id order, so the output never
//! depends on the order in which the workers answered.

use std::ops::Range;

use comms::task::{LabelUnit, StatsUnit};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};

use crate::{
    error::{CoordinatorError, Result},
    table::AssignmentTable,
};

/// Everything a single worker answered in a round.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult<U> {
    pub worker_index: usize,
    pub units: Vec<U>,
}

/// What the aggregator needs to know about a unit's result to place it.
pub trait UnitResult {
    fn global_id(&self) -> usize;
    fn nobs(&self) -> usize;
}

impl UnitResult for LabelUnit {
    fn global_id(&self) -> usize {
        self.global_id
    }

    fn nobs(&self) -> usize {
        self.labels.len()
    }
}

impl UnitResult for StatsUnit {
    fn global_id(&self) -> usize {
        self.global_id
    }

    fn nobs(&self) -> usize {
        self.nobs
    }
}

/// Labels for every observation, in the original input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAssignment {
    labels: Vec<i32>,
    z: Option<Vec<i32>>,
    bounds: Vec<Range<usize>>,
}

impl LabelAssignment {
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// The secondary labels, present only for relabeling rounds.
    pub fn z(&self) -> Option<&[i32]> {
        self.z.as_deref()
    }

    /// The global row range of every unit, by global id.
    pub fn bounds(&self) -> &[Range<usize>] {
        &self.bounds
    }

    /// The labels of a single sub-dataset or partition.
    pub fn dataset(&self, global_id: usize) -> Option<&[i32]> {
        self.bounds
            .get(global_id)
            .map(|rows| &self.labels[rows.clone()])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn into_parts(self) -> (Vec<i32>, Option<Vec<i32>>, Vec<Range<usize>>) {
        (self.labels, self.z, self.bounds)
    }
}

/// The pool wide sufficient statistics of an expected stats round.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedStats {
    /// Summed over every unit.
    pub log_likelihood: f64,
    /// `ncomp` values, summed over every unit.
    pub counts: Array1<f64>,
    /// `ncomp × ndim`, summed over every unit.
    pub mean_sums: Array2<f64>,
    /// `nobs × ncomp`, every unit's rows at its global offset.
    pub density: Array2<f64>,
}

/// Checks that the partial results cover the table exactly once.
///
/// # Errors
/// Returns `Aggregation`, attributed to the offending worker, if a worker
/// answered with the wrong amount of units, a global id it doesn't own, a
/// repeated global id or a unit whose length disagrees with its rows.
pub fn check_coverage<U: UnitResult>(
    table: &AssignmentTable,
    partials: &[PartialResult<U>],
) -> Result<()> {
    let mut seen = vec![false; table.units().len()];

    for partial in partials {
        let worker = partial.worker_index;
        let expected = table.units_of(worker).count();

        if partial.units.len() != expected {
            return Err(CoordinatorError::aggregation(
                worker,
                format!("{} results for {expected} units", partial.units.len()),
            ));
        }

        for unit in &partial.units {
            let gid = unit.global_id();

            let entry = table
                .unit(gid)
                .filter(|entry| entry.worker_index == worker)
                .ok_or_else(|| {
                    CoordinatorError::aggregation(worker, format!("unknown global id {gid}"))
                })?;

            if std::mem::replace(&mut seen[gid], true) {
                return Err(CoordinatorError::aggregation(
                    worker,
                    format!("global id {gid} reported twice"),
                ));
            }

            if unit.nobs() != entry.rows.len() {
                return Err(CoordinatorError::aggregation(
                    worker,
                    format!(
                        "unit {gid} has {} observations, expected {}",
                        unit.nobs(),
                        entry.rows.len()
                    ),
                ));
            }
        }
    }

    match seen.iter().position(|&covered| !covered) {
        Some(gid) => Err(CoordinatorError::aggregation(
            table.units()[gid].worker_index,
            format!("no result for global id {gid}"),
        )),
        None => Ok(()),
    }
}

/// Flattens the partial results into `(worker, unit)` pairs sorted by global id.
fn by_global_id<U: UnitResult>(partials: Vec<PartialResult<U>>) -> Vec<(usize, U)> {
    let mut units: Vec<_> = partials
        .into_iter()
        .flat_map(|partial| {
            let worker = partial.worker_index;
            partial.units.into_iter().map(move |unit| (worker, unit))
        })
        .collect();

    units.sort_by_key(|(_, unit)| unit.global_id());
    units
}

/// Builds the global label vector of a round.
///
/// # Arguments
/// * `table` - The pool's assignment table.
/// * `partials` - One entry per worker that was given work.
/// * `relabel` - Whether the round asked for the secondary labels.
///
/// # Errors
/// Returns `Aggregation` if the results don't cover the table exactly once.
pub fn merge_labels(
    table: &AssignmentTable,
    partials: Vec<PartialResult<LabelUnit>>,
    relabel: bool,
) -> Result<LabelAssignment> {
    check_coverage(table, &partials)?;

    let nobs = table.nobs();
    let mut labels = vec![0; nobs];
    let mut z = relabel.then(|| vec![0; nobs]);

    for (worker, unit) in by_global_id(partials) {
        let rows = table.units()[unit.global_id].rows.clone();
        labels[rows.clone()].copy_from_slice(&unit.labels);

        match (&mut z, unit.z) {
            (Some(z), Some(unit_z)) if unit_z.len() == rows.len() => {
                z[rows].copy_from_slice(&unit_z);
            }
            (None, None) => {}
            _ => {
                return Err(CoordinatorError::aggregation(
                    worker,
                    format!("unit {} has inconsistent relabels", unit.global_id),
                ));
            }
        }
    }

    let bounds = table.units().iter().map(|unit| unit.rows.clone()).collect();

    Ok(LabelAssignment { labels, z, bounds })
}

/// Sums the sufficient statistics of a round and places every density row.
///
/// # Arguments
/// * `table` - The pool's assignment table.
/// * `partials` - One entry per worker that was given work.
/// * `ncomp` - The amount of mixture components of the round.
///
/// # Errors
/// Returns `Aggregation` if the results don't cover the table exactly once or
/// a buffer has the wrong size.
pub fn merge_stats(
    table: &AssignmentTable,
    partials: Vec<PartialResult<StatsUnit>>,
    ncomp: usize,
) -> Result<ExpectedStats> {
    check_coverage(table, &partials)?;

    let ndim = table.ndim();
    let mut stats = ExpectedStats {
        log_likelihood: 0.0,
        counts: Array1::zeros(ncomp),
        mean_sums: Array2::zeros((ncomp, ndim)),
        density: Array2::zeros((table.nobs(), ncomp)),
    };

    for (worker, unit) in by_global_id(partials) {
        let gid = unit.global_id;
        let rows = table.units()[gid].rows.clone();
        let shape_err = |e: ndarray::ShapeError| {
            CoordinatorError::aggregation(worker, format!("unit {gid} is malformed: {e}"))
        };

        if unit.counts.len() != ncomp {
            return Err(CoordinatorError::aggregation(
                worker,
                format!("unit {gid} has {} counts for {ncomp} components", unit.counts.len()),
            ));
        }

        let mean_sums = ArrayView2::from_shape((ncomp, ndim), &unit.mean_sums).map_err(shape_err)?;
        let density = ArrayView2::from_shape((rows.len(), ncomp), &unit.density).map_err(shape_err)?;

        stats.log_likelihood += unit.log_likelihood;
        stats.counts += &ArrayView1::from(&unit.counts);
        stats.mean_sums += &mean_sums;
        stats.density.slice_mut(s![rows, ..]).assign(&density);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{dataset::DatasetShape, partition::Plan};

    /// Five sub-datasets of sizes 1..=5 on two workers.
    fn table() -> AssignmentTable {
        let tables = (1..=5).map(|n| Array2::zeros((n, 2))).collect();
        let plan = Plan::new(&DatasetShape::Heterogeneous(tables), &[0, 1]).unwrap();
        plan.into_table(vec![0, 0, 1, 1, 2])
    }

    fn label(gid: usize) -> LabelUnit {
        LabelUnit {
            global_id: gid,
            labels: vec![gid as i32; gid + 1],
            z: None,
        }
    }

    fn stat(gid: usize) -> StatsUnit {
        let n = gid + 1;
        StatsUnit {
            global_id: gid,
            nobs: n,
            counts: vec![1.0, n as f64],
            mean_sums: vec![1.0; 4],
            density: vec![gid as f64; n * 2],
            log_likelihood: -(n as f64),
        }
    }

    fn partials<U>(units: impl Fn(usize) -> U, first: &[usize], second: &[usize]) -> Vec<PartialResult<U>> {
        vec![
            PartialResult {
                worker_index: 0,
                units: first.iter().map(|&g| units(g)).collect(),
            },
            PartialResult {
                worker_index: 1,
                units: second.iter().map(|&g| units(g)).collect(),
            },
        ]
    }

    #[test]
    fn labels_land_at_their_global_rows() {
        let merged = merge_labels(&table(), partials(label, &[0, 2, 4], &[1, 3]), false).unwrap();

        assert_eq!(merged.len(), 15);
        assert_eq!(merged.labels(), [0, 1, 1, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4]);
        assert_eq!(merged.dataset(3), Some(&[3, 3, 3, 3][..]));
        assert_eq!(merged.z(), None);
    }

    #[test]
    fn merging_ignores_arrival_order() {
        let table = table();
        let ordered = merge_labels(&table, partials(label, &[0, 2, 4], &[1, 3]), false).unwrap();

        let mut shuffled = partials(label, &[4, 0, 2], &[3, 1]);
        shuffled.reverse();
        let shuffled = merge_labels(&table, shuffled, false).unwrap();

        assert_eq!(ordered, shuffled);
    }

    #[test]
    fn relabels_are_merged_alongside() {
        let with_z = |gid: usize| LabelUnit {
            z: Some(vec![-1; gid + 1]),
            ..label(gid)
        };

        let merged = merge_labels(&table(), partials(with_z, &[0, 2, 4], &[1, 3]), true).unwrap();
        assert!(merged.z().unwrap().iter().all(|&z| z == -1));

        let err = merge_labels(&table(), partials(label, &[0, 2, 4], &[1, 3]), true).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { .. }));
    }

    #[test]
    fn foreign_global_ids_are_rejected() {
        let err = merge_labels(&table(), partials(label, &[0, 2, 3], &[1, 3]), false).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { worker: 0, .. }));
    }

    #[test]
    fn repeated_global_ids_are_rejected() {
        let err = merge_labels(&table(), partials(label, &[0, 2, 2], &[1, 3]), false).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { worker: 0, .. }));
    }

    #[test]
    fn short_result_groups_are_rejected() {
        let err = merge_labels(&table(), partials(label, &[0, 2, 4], &[1]), false).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { worker: 1, .. }));
    }

    #[test]
    fn missing_workers_are_reported() {
        let mut partials = partials(label, &[0, 2, 4], &[1, 3]);
        partials.pop();

        let err = merge_labels(&table(), partials, false).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { worker: 1, .. }));
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let short = |gid: usize| LabelUnit {
            labels: vec![0; gid],
            ..label(gid)
        };

        let err = merge_labels(&table(), partials(short, &[0, 2, 4], &[1, 3]), false).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { .. }));
    }

    #[test]
    fn stats_are_summed() {
        let stats = merge_stats(&table(), partials(stat, &[0, 2, 4], &[1, 3]), 2).unwrap();

        assert_eq!(stats.log_likelihood, -15.0);
        assert_eq!(stats.counts, array![5.0, 15.0]);
        assert_eq!(stats.mean_sums, Array2::from_elem((2, 2), 5.0));
        assert_eq!(stats.density.dim(), (15, 2));
        assert_eq!(stats.density.row(0), array![0.0, 0.0]);
        assert_eq!(stats.density.row(14), array![4.0, 4.0]);
        assert_eq!(stats.density.row(5), array![2.0, 2.0]);
    }

    #[test]
    fn malformed_stats_are_rejected() {
        let broken = |gid: usize| StatsUnit {
            mean_sums: vec![1.0; 3],
            ..stat(gid)
        };

        let err = merge_stats(&table(), partials(broken, &[0, 2, 4], &[1, 3]), 2).unwrap_err();
        assert!(matches!(err, CoordinatorError::Aggregation { worker: 0, .. }));
    }
}
