//! Dispatch of a round's requests and collection of the workers' answers.

use comms::task::{self, LabelUnit, StatsUnit, TaskRequest, UnitRequest};
use futures::future::try_join_all;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    aggregate::PartialResult,
    error::{CoordinatorError, Result},
    link::{RecvGuard, WorkerLink},
    params::MixtureParams,
    table::AssignmentTable,
};

/// The kind of computation requested from the workers in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Round {
    AssignLabels { relabel: bool },
    ExpectedStats,
}

/// Builds the per unit requests of `worker`, in ascending global id order.
fn unit_requests(
    table: &AssignmentTable,
    worker: usize,
    params: &MixtureParams,
    relabel: bool,
) -> Vec<UnitRequest> {
    let means = params.flat_means();
    let covariances = params.flat_covariances();

    table
        .units_of(worker)
        .map(|unit| UnitRequest {
            local_index: unit.local_index,
            global_id: unit.global_id,
            ncomp: params.ncomp(),
            ndim: params.ndim(),
            relabel,
            weights: params.unit_weights(unit.global_id),
            means: means.clone(),
            covariances: covariances.clone(),
        })
        .collect()
}

/// Sends the round's request to every worker holding at least one unit.
///
/// The sends run concurrently, each worker's frames stay in order.
pub(crate) async fn dispatch<R, W>(
    links: &mut [WorkerLink<R, W>],
    table: &AssignmentTable,
    params: &MixtureParams,
    round: Round,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let sends = links.iter_mut().filter_map(|link| {
        let request = match round {
            Round::AssignLabels { relabel } => {
                TaskRequest::AssignLabels(unit_requests(table, link.index, params, relabel))
            }
            Round::ExpectedStats => {
                TaskRequest::ExpectedStats(unit_requests(table, link.index, params, false))
            }
        };

        if let TaskRequest::AssignLabels(units) | TaskRequest::ExpectedStats(units) = &request {
            if units.is_empty() {
                debug!(worker = link.index; "no units, skipping worker");
                return None;
            }
        }

        Some(async move {
            task::send_request(&mut link.tx, &request)
                .await
                .map_err(|e| CoordinatorError::from_protocol(link.index, e))
        })
    });

    try_join_all(sends).await?;
    Ok(())
}

/// Receives the label results of every worker that was given work, in index order.
pub(crate) async fn collect_labels<R, W>(
    links: &mut [WorkerLink<R, W>],
    table: &AssignmentTable,
    guard: &RecvGuard,
    relabel: bool,
) -> Result<Vec<PartialResult<LabelUnit>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut partials = Vec::with_capacity(links.len());

    for link in busy(links, table) {
        let expected = table.units_of(link.index).count();
        let units = guard
            .watch(
                link.index,
                task::recv_label_results(&mut link.rx, &mut link.buf, expected, relabel),
            )
            .await?;

        debug!(worker = link.index, units = units.len(); "received labels");
        partials.push(PartialResult {
            worker_index: link.index,
            units,
        });
    }

    Ok(partials)
}

/// Receives the statistics of every worker that was given work, in index order.
pub(crate) async fn collect_stats<R, W>(
    links: &mut [WorkerLink<R, W>],
    table: &AssignmentTable,
    guard: &RecvGuard,
    ncomp: usize,
) -> Result<Vec<PartialResult<StatsUnit>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut partials = Vec::with_capacity(links.len());
    let ndim = table.ndim();

    for link in busy(links, table) {
        let expected = table.units_of(link.index).count();
        let units = guard
            .watch(
                link.index,
                task::recv_stats_results(&mut link.rx, &mut link.buf, expected, ncomp, ndim),
            )
            .await?;

        debug!(worker = link.index, units = units.len(); "received statistics");
        partials.push(PartialResult {
            worker_index: link.index,
            units,
        });
    }

    Ok(partials)
}

fn busy<'a, R, W>(
    links: &'a mut [WorkerLink<R, W>],
    table: &'a AssignmentTable,
) -> impl Iterator<Item = &'a mut WorkerLink<R, W>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    links
        .iter_mut()
        .filter(move |link| table.units_of(link.index).next().is_some())
}
