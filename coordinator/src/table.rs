use std::ops::Range;

/// The portion of the dataset a worker holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// A contiguous row range of a homogeneous table.
    Rows(Range<usize>),
    /// Whole sub-datasets of a heterogeneous collection, by dataset index.
    Datasets(Vec<usize>),
}

impl Partition {
    /// The amount of units of work this partition yields per round.
    pub fn units(&self) -> usize {
        match self {
            Partition::Rows(_) => 1,
            Partition::Datasets(datasets) => datasets.len(),
        }
    }
}

/// A worker of the pool and what it was assigned at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub worker_index: usize,
    pub device_id: i32,
    pub partition: Partition,
}

/// A unit of work: a partition or a sub-dataset loaded on a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEntry {
    /// Position of the unit in the global output, partitions and sub-datasets alike.
    pub global_id: usize,
    pub worker_index: usize,
    /// The identifier the worker returned when the unit's data was loaded.
    pub local_index: usize,
    /// Where the unit's observations land in the global output.
    pub rows: Range<usize>,
}

/// The immutable result of partitioning and loading a dataset onto a pool.
///
/// Built once by `Pool::initialize` and read by every round afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentTable {
    ndim: usize,
    workers: Vec<WorkerHandle>,
    /// Sorted by global id, which is also the position in this vector.
    units: Vec<UnitEntry>,
}

impl AssignmentTable {
    pub(crate) fn new(ndim: usize, workers: Vec<WorkerHandle>, mut units: Vec<UnitEntry>) -> Self {
        units.sort_by_key(|unit| unit.global_id);
        debug_assert!(units.iter().enumerate().all(|(i, u)| u.global_id == i));

        Self {
            ndim,
            workers,
            units,
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// The total amount of observations over every unit.
    pub fn nobs(&self) -> usize {
        self.units.last().map_or(0, |unit| unit.rows.end)
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn worker(&self, worker_index: usize) -> Option<&WorkerHandle> {
        self.workers.get(worker_index)
    }

    /// Every unit, in ascending global id order.
    pub fn units(&self) -> &[UnitEntry] {
        &self.units
    }

    pub fn unit(&self, global_id: usize) -> Option<&UnitEntry> {
        self.units.get(global_id)
    }

    /// The units held by a worker, in ascending global id order.
    pub fn units_of(&self, worker_index: usize) -> impl Iterator<Item = &UnitEntry> {
        self.units
            .iter()
            .filter(move |unit| unit.worker_index == worker_index)
    }

    /// Which worker holds a sub-dataset and under which local identifier.
    pub fn dataset_location(&self, dataset: usize) -> Option<(usize, usize)> {
        self.unit(dataset)
            .map(|unit| (unit.worker_index, unit.local_index))
    }
}
