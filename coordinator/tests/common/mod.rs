#![allow(dead_code)]

use comms::{
    OnoReceiver, OnoSender,
    schema::{LABEL_UNIT, RESULT_COUNT, SchemaWriter},
    task::{self, InitRequest, LabelUnit, StatsUnit, TaskKind, TaskRequest, UnitRequest},
};
use coordinator::Pool;
use ndarray::Array2;
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};

pub type MockPool = Pool<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

/// How a mock worker answers the rounds it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Labels every observation with its first column, statistics are derived from the data.
    Honest,
    /// Reports a global id it was never given.
    WrongGlobalId,
    /// Drops the last label of every unit, keeping the frames consistent.
    ShortLabels,
    /// Announces more labels than it sends.
    TruncatedLabels,
    /// Answers every round with an error frame.
    ReportError,
    /// Announces `i32::MAX` results and sends nothing else.
    OversizedCount,
    /// Reads the requests and never answers them.
    Silent,
}

/// What a mock worker saw before its channel closed.
#[derive(Debug, Default)]
pub struct Report {
    pub requests: Vec<TaskKind>,
    pub shutdowns: usize,
    pub datasets: Vec<InitRequest>,
}

/// Builds a pool of mock workers over in memory pipes, one per device.
pub fn mock_pool(device_ids: Vec<i32>, behaviors: Vec<Behavior>) -> (MockPool, Vec<JoinHandle<Report>>) {
    assert_eq!(device_ids.len(), behaviors.len());

    let mut channels = Vec::new();
    let mut workers = Vec::new();

    for behavior in behaviors {
        let (coordinator_end, worker_end) = io::duplex(64 * 1024);
        channels.push(io::split(coordinator_end));

        let (rx, tx) = io::split(worker_end);
        let (rx, tx) = comms::channel(rx, tx);
        workers.push(tokio::spawn(run_mock(rx, tx, behavior)));
    }

    let pool = Pool::from_channels(device_ids, channels).unwrap();
    (pool, workers)
}

pub fn honest(n: usize) -> Vec<Behavior> {
    vec![Behavior::Honest; n]
}

/// A table whose first column holds each row's index, starting at `offset`.
pub fn indexed_table(nobs: usize, ndim: usize, offset: usize) -> Array2<f64> {
    Array2::from_shape_fn((nobs, ndim), |(i, j)| match j {
        0 => (offset + i) as f64,
        _ => 1.0,
    })
}

async fn run_mock(mut rx: Rx, mut tx: Tx, behavior: Behavior) -> Report {
    let mut buf = Vec::new();
    let mut report = Report::default();

    while let Ok(request) = task::recv_request(&mut rx, &mut buf).await {
        report.requests.push(request.kind());

        match request {
            TaskRequest::Init(init) => {
                let local_index = report.datasets.len();
                report.datasets.push(init);
                task::send_init_ack(&mut tx, local_index).await.unwrap();
            }
            TaskRequest::AssignLabels(units) => {
                answer_labels(&mut tx, &report.datasets, &units, behavior).await;
            }
            TaskRequest::ExpectedStats(units) => {
                answer_stats(&mut tx, &report.datasets, &units, behavior).await;
            }
            TaskRequest::Shutdown => report.shutdowns += 1,
        }
    }

    report
}

fn labels_of(init: &InitRequest) -> Vec<i32> {
    init.data
        .chunks(init.ndim)
        .map(|row| row[0] as i32)
        .collect()
}

async fn answer_labels(tx: &mut Tx, datasets: &[InitRequest], units: &[UnitRequest], behavior: Behavior) {
    match behavior {
        Behavior::Silent => return,
        Behavior::ReportError => {
            task::send_error(tx, "kernel failed").await.unwrap();
            return;
        }
        Behavior::TruncatedLabels => {
            send_truncated(tx, datasets, units).await;
            return;
        }
        Behavior::OversizedCount => {
            send_oversized_count(tx).await;
            return;
        }
        _ => {}
    }

    let results: Vec<_> = units
        .iter()
        .map(|unit| {
            let mut labels = labels_of(&datasets[unit.local_index]);
            if behavior == Behavior::ShortLabels {
                labels.pop();
            }

            LabelUnit {
                global_id: match behavior {
                    Behavior::WrongGlobalId => unit.global_id + 1000,
                    _ => unit.global_id,
                },
                z: unit.relabel.then(|| labels.iter().map(|l| -l).collect()),
                labels,
            }
        })
        .collect();

    task::send_label_results(tx, &results).await.unwrap();
}

async fn send_truncated(tx: &mut Tx, datasets: &[InitRequest], units: &[UnitRequest]) {
    let mut count = SchemaWriter::new(tx, &RESULT_COUNT);
    count.ints(&[units.len() as i32]).await.unwrap();
    count.finish().unwrap();

    for unit in units {
        let labels = labels_of(&datasets[unit.local_index]);
        let mut writer = SchemaWriter::new(tx, &LABEL_UNIT);
        writer.ints(&[labels.len() as i32 + 1]).await.unwrap();
        writer.ints(&labels).await.unwrap();
        writer.ints(&[unit.global_id as i32]).await.unwrap();
        writer.finish().unwrap();
    }
}

async fn send_oversized_count(tx: &mut Tx) {
    let mut count = SchemaWriter::new(tx, &RESULT_COUNT);
    count.ints(&[i32::MAX]).await.unwrap();
    count.finish().unwrap();
}

/// Every component counts every observation, mean sums are column sums and
/// every density entry is the observation's first column.
async fn answer_stats(tx: &mut Tx, datasets: &[InitRequest], units: &[UnitRequest], behavior: Behavior) {
    match behavior {
        Behavior::Silent => return,
        Behavior::ReportError => {
            task::send_error(tx, "kernel failed").await.unwrap();
            return;
        }
        Behavior::OversizedCount => {
            send_oversized_count(tx).await;
            return;
        }
        _ => {}
    }

    let results: Vec<_> = units
        .iter()
        .map(|unit| {
            let init = &datasets[unit.local_index];
            let rows: Vec<&[f64]> = init.data.chunks(init.ndim).collect();

            let column_sums: Vec<f64> = (0..init.ndim)
                .map(|d| rows.iter().map(|row| row[d]).sum())
                .collect();

            StatsUnit {
                global_id: match behavior {
                    Behavior::WrongGlobalId => unit.global_id + 1000,
                    _ => unit.global_id,
                },
                nobs: init.nobs,
                counts: vec![init.nobs as f64; unit.ncomp],
                mean_sums: column_sums.repeat(unit.ncomp),
                density: rows
                    .iter()
                    .flat_map(|row| std::iter::repeat_n(row[0], unit.ncomp))
                    .collect(),
                log_likelihood: -(init.nobs as f64),
            }
        })
        .collect();

    task::send_stats_results(tx, &results).await.unwrap();
}
