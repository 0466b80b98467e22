//! The request and result codec shared by the coordinator and the workers.
//!
//! Every function here writes or reads whole message groups through the schemas
//! in [`crate::schema`], so both ends agree on the exact frame sequence of a task.

use std::borrow::Cow;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    OnoReceiver, OnoSender, ProtocolErr, Result,
    msg::{Msg, Tag},
    schema::{
        INIT_ACK, INIT_REQUEST, LABEL_UNIT, RELABEL_UNIT, RESULT_COUNT, ROUND_HEADER, STATS_UNIT,
        SchemaReader, SchemaWriter, TASK, UNIT_REQUEST,
    },
};

const INIT_CODE: i32 = 0;
const ASSIGN_LABELS_CODE: i32 = 1;
const EXPECTED_STATS_CODE: i32 = 2;

/// The poison pill, any negative selector stops a worker.
pub const SHUTDOWN_CODE: i32 = -1;

/// The task selector sent ahead of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Init,
    AssignLabels,
    ExpectedStats,
    Shutdown,
}

impl TaskKind {
    pub fn code(self) -> i32 {
        match self {
            TaskKind::Init => INIT_CODE,
            TaskKind::AssignLabels => ASSIGN_LABELS_CODE,
            TaskKind::ExpectedStats => EXPECTED_STATS_CODE,
            TaskKind::Shutdown => SHUTDOWN_CODE,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            INIT_CODE => Some(TaskKind::Init),
            ASSIGN_LABELS_CODE => Some(TaskKind::AssignLabels),
            EXPECTED_STATS_CODE => Some(TaskKind::ExpectedStats),
            code if code < 0 => Some(TaskKind::Shutdown),
            _ => None,
        }
    }
}

/// Ships one dataset (or one partition of it) to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct InitRequest {
    pub nobs: usize,
    pub ndim: usize,
    pub device: i32,
    /// Row major, `nobs * ndim` values.
    pub data: Vec<f64>,
}

/// The mixture parameters for one unit of work inside a round.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRequest {
    /// The identifier the worker returned when the unit's data was loaded.
    pub local_index: usize,
    pub global_id: usize,
    pub ncomp: usize,
    pub ndim: usize,
    pub relabel: bool,
    /// `ncomp` values.
    pub weights: Vec<f64>,
    /// `ncomp * ndim` values, row major.
    pub means: Vec<f64>,
    /// `ncomp * ndim * ndim` values, one row major matrix per component.
    pub covariances: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Init(InitRequest),
    AssignLabels(Vec<UnitRequest>),
    ExpectedStats(Vec<UnitRequest>),
    Shutdown,
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Init(_) => TaskKind::Init,
            TaskRequest::AssignLabels(_) => TaskKind::AssignLabels,
            TaskRequest::ExpectedStats(_) => TaskKind::ExpectedStats,
            TaskRequest::Shutdown => TaskKind::Shutdown,
        }
    }
}

/// The labels sampled for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelUnit {
    pub global_id: usize,
    pub labels: Vec<i32>,
    /// Present only when relabeling was requested.
    pub z: Option<Vec<i32>>,
}

/// The sufficient statistics computed for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsUnit {
    pub global_id: usize,
    pub nobs: usize,
    /// `ncomp` values.
    pub counts: Vec<f64>,
    /// `ncomp * ndim` values, row major.
    pub mean_sums: Vec<f64>,
    /// `nobs * ncomp` values, row major.
    pub density: Vec<f64>,
    pub log_likelihood: f64,
}

fn to_wire(tag: Tag, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| ProtocolErr::InvalidValue {
        tag,
        value: value as i64,
    })
}

fn to_size(tag: Tag, value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| ProtocolErr::InvalidValue {
        tag,
        value: value.into(),
    })
}

fn product(tag: Tag, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(ProtocolErr::InvalidValue { tag, value: -1 })
}

/// Sends a whole request, selector included.
///
/// # Arguments
/// * `tx` - The sending end of the worker's channel.
/// * `request` - The request to encode.
///
/// # Errors
/// Returns `ProtocolErr` on I/O failures or values that don't fit the wire types.
pub async fn send_request<W>(tx: &mut OnoSender<W>, request: &TaskRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut selector = SchemaWriter::new(tx, &TASK);
    selector.ints(&[request.kind().code()]).await?;
    selector.finish()?;

    match request {
        TaskRequest::Init(init) => send_init(tx, init).await,
        TaskRequest::AssignLabels(units) | TaskRequest::ExpectedStats(units) => {
            send_units(tx, units).await
        }
        TaskRequest::Shutdown => Ok(()),
    }
}

async fn send_init<W>(tx: &mut OnoSender<W>, init: &InitRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let expected = product(Tag::Data, &[init.nobs, init.ndim])?;
    if init.data.len() != expected {
        return Err(ProtocolErr::LengthMismatch {
            tag: Tag::Data,
            expected,
            got: init.data.len(),
        });
    }

    let params = [
        to_wire(Tag::Params, init.nobs)?,
        to_wire(Tag::Params, init.ndim)?,
        init.device,
    ];

    let mut writer = SchemaWriter::new(tx, &INIT_REQUEST);
    writer.ints(&params).await?;
    writer.doubles(&init.data).await?;
    writer.finish()
}

async fn send_units<W>(tx: &mut OnoSender<W>, units: &[UnitRequest]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = SchemaWriter::new(tx, &ROUND_HEADER);
    header.ints(&[to_wire(Tag::Params, units.len())?]).await?;
    header.finish()?;

    for unit in units {
        let params = [
            to_wire(Tag::UnitParams, unit.local_index)?,
            to_wire(Tag::UnitParams, unit.ncomp)?,
            to_wire(Tag::UnitParams, unit.ndim)?,
            i32::from(unit.relabel),
            to_wire(Tag::UnitParams, unit.global_id)?,
        ];

        let mut writer = SchemaWriter::new(tx, &UNIT_REQUEST);
        writer.ints(&params).await?;
        writer.doubles(&unit.weights).await?;
        writer.doubles(&unit.means).await?;
        writer.doubles(&unit.covariances).await?;
        writer.finish()?;
    }

    Ok(())
}

/// Receives a whole request, selector included.
///
/// # Arguments
/// * `rx` - The receiving end of the coordinator's channel.
/// * `buf` - Scratch buffer reused between frames.
///
/// # Errors
/// Returns `ProtocolErr` if any frame disagrees with the request's schema.
pub async fn recv_request<R>(rx: &mut OnoReceiver<R>, buf: &mut Vec<u64>) -> Result<TaskRequest>
where
    R: AsyncRead + Unpin,
{
    let mut selector = SchemaReader::new(rx, buf, &TASK);
    let code = selector.int().await?;
    selector.finish()?;

    let kind = TaskKind::from_code(code).ok_or(ProtocolErr::UnknownTask(code))?;

    let request = match kind {
        TaskKind::Init => TaskRequest::Init(recv_init(rx, buf).await?),
        TaskKind::AssignLabels => TaskRequest::AssignLabels(recv_units(rx, buf).await?),
        TaskKind::ExpectedStats => TaskRequest::ExpectedStats(recv_units(rx, buf).await?),
        TaskKind::Shutdown => TaskRequest::Shutdown,
    };

    Ok(request)
}

async fn recv_init<R>(rx: &mut OnoReceiver<R>, buf: &mut Vec<u64>) -> Result<InitRequest>
where
    R: AsyncRead + Unpin,
{
    let mut reader = SchemaReader::new(rx, buf, &INIT_REQUEST);
    let params = reader.ints(3).await?;
    let nobs = to_size(Tag::Params, params[0])?;
    let ndim = to_size(Tag::Params, params[1])?;
    let device = params[2];

    let data = reader.doubles(product(Tag::Data, &[nobs, ndim])?).await?;
    reader.finish()?;

    Ok(InitRequest {
        nobs,
        ndim,
        device,
        data,
    })
}

async fn recv_units<R>(rx: &mut OnoReceiver<R>, buf: &mut Vec<u64>) -> Result<Vec<UnitRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut header = SchemaReader::new(rx, buf, &ROUND_HEADER);
    let n_units = header.count().await?;
    header.finish()?;

    let mut units = Vec::new();

    for _ in 0..n_units {
        let mut reader = SchemaReader::new(rx, buf, &UNIT_REQUEST);
        let params = reader.ints(5).await?;

        let local_index = to_size(Tag::UnitParams, params[0])?;
        let ncomp = to_size(Tag::UnitParams, params[1])?;
        let ndim = to_size(Tag::UnitParams, params[2])?;
        let relabel = match params[3] {
            0 => false,
            1 => true,
            flag => {
                return Err(ProtocolErr::InvalidValue {
                    tag: Tag::UnitParams,
                    value: flag.into(),
                });
            }
        };
        let global_id = to_size(Tag::UnitParams, params[4])?;

        let weights = reader.doubles(ncomp).await?;
        let means = reader.doubles(product(Tag::Means, &[ncomp, ndim])?).await?;
        let covariances = reader
            .doubles(product(Tag::Covariances, &[ncomp, ndim, ndim])?)
            .await?;
        reader.finish()?;

        units.push(UnitRequest {
            local_index,
            global_id,
            ncomp,
            ndim,
            relabel,
            weights,
            means,
            covariances,
        });
    }

    Ok(units)
}

/// Answers an init request with the identifier of the loaded dataset.
pub async fn send_init_ack<W>(tx: &mut OnoSender<W>, local_index: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = SchemaWriter::new(tx, &INIT_ACK);
    writer.ints(&[to_wire(Tag::LocalIndex, local_index)?]).await?;
    writer.finish()
}

pub async fn recv_init_ack<R>(rx: &mut OnoReceiver<R>, buf: &mut Vec<u64>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = SchemaReader::new(rx, buf, &INIT_ACK);
    let local_index = reader.count().await?;
    reader.finish()?;
    Ok(local_index)
}

async fn send_result_count<W>(tx: &mut OnoSender<W>, count: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = SchemaWriter::new(tx, &RESULT_COUNT);
    writer.ints(&[to_wire(Tag::ResultCount, count)?]).await?;
    writer.finish()
}

/// Reads the result count and checks it against the amount of units sent.
async fn recv_result_count<R>(
    rx: &mut OnoReceiver<R>,
    buf: &mut Vec<u64>,
    expected: usize,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = SchemaReader::new(rx, buf, &RESULT_COUNT);
    let got = reader.count().await?;
    reader.finish()?;

    if got != expected {
        return Err(ProtocolErr::ResultCount { expected, got });
    }

    Ok(got)
}

/// Sends the result count followed by every label unit.
pub async fn send_label_results<W>(tx: &mut OnoSender<W>, units: &[LabelUnit]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_result_count(tx, units.len()).await?;

    for unit in units {
        let schema = match unit.z {
            Some(_) => &RELABEL_UNIT,
            None => &LABEL_UNIT,
        };

        let mut writer = SchemaWriter::new(tx, schema);
        writer
            .ints(&[to_wire(Tag::UnitCount, unit.labels.len())?])
            .await?;
        writer.ints(&unit.labels).await?;
        if let Some(z) = &unit.z {
            writer.ints(z).await?;
        }
        writer
            .ints(&[to_wire(Tag::GlobalId, unit.global_id)?])
            .await?;
        writer.finish()?;
    }

    Ok(())
}

/// Receives the result count followed by every label unit.
///
/// # Arguments
/// * `expected` - The amount of units the worker was sent.
/// * `relabel` - Whether the round asked for the secondary `z` labels.
///
/// # Errors
/// Returns `ResultCount` before reading any unit if the worker announces a
/// different amount of results.
pub async fn recv_label_results<R>(
    rx: &mut OnoReceiver<R>,
    buf: &mut Vec<u64>,
    expected: usize,
    relabel: bool,
) -> Result<Vec<LabelUnit>>
where
    R: AsyncRead + Unpin,
{
    let count = recv_result_count(rx, buf, expected).await?;
    let schema = if relabel { &RELABEL_UNIT } else { &LABEL_UNIT };
    let mut units = Vec::with_capacity(count);

    for _ in 0..count {
        let mut reader = SchemaReader::new(rx, buf, schema);
        let nobs = reader.count().await?;
        let labels = reader.ints(nobs).await?;
        let z = match relabel {
            true => Some(reader.ints(nobs).await?),
            false => None,
        };
        let global_id = reader.count().await?;
        reader.finish()?;

        units.push(LabelUnit {
            global_id,
            labels,
            z,
        });
    }

    Ok(units)
}

/// Sends the result count followed by every statistics unit.
pub async fn send_stats_results<W>(tx: &mut OnoSender<W>, units: &[StatsUnit]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_result_count(tx, units.len()).await?;

    for unit in units {
        let mut writer = SchemaWriter::new(tx, &STATS_UNIT);
        writer.ints(&[to_wire(Tag::UnitCount, unit.nobs)?]).await?;
        writer.doubles(&unit.counts).await?;
        writer.doubles(&unit.mean_sums).await?;
        writer.doubles(&unit.density).await?;
        writer.doubles(&[unit.log_likelihood]).await?;
        writer
            .ints(&[to_wire(Tag::GlobalId, unit.global_id)?])
            .await?;
        writer.finish()?;
    }

    Ok(())
}

/// Receives the result count followed by every statistics unit.
///
/// # Arguments
/// * `expected` - The amount of units the worker was sent.
/// * `ncomp` - The amount of mixture components sent in the round.
/// * `ndim` - The dimension of the observations.
///
/// # Errors
/// Returns `ResultCount` before reading any unit if the worker announces a
/// different amount of results.
pub async fn recv_stats_results<R>(
    rx: &mut OnoReceiver<R>,
    buf: &mut Vec<u64>,
    expected: usize,
    ncomp: usize,
    ndim: usize,
) -> Result<Vec<StatsUnit>>
where
    R: AsyncRead + Unpin,
{
    let count = recv_result_count(rx, buf, expected).await?;
    let mut units = Vec::with_capacity(count);

    for _ in 0..count {
        let mut reader = SchemaReader::new(rx, buf, &STATS_UNIT);
        let nobs = reader.count().await?;
        let counts = reader.doubles(ncomp).await?;
        let mean_sums = reader.doubles(product(Tag::MeanSums, &[ncomp, ndim])?).await?;
        let density = reader.doubles(product(Tag::Density, &[nobs, ncomp])?).await?;
        let log_likelihood = reader.double().await?;
        let global_id = reader.count().await?;
        reader.finish()?;

        units.push(StatsUnit {
            global_id,
            nobs,
            counts,
            mean_sums,
            density,
            log_likelihood,
        });
    }

    Ok(units)
}

/// Reports a failure in place of the next expected frame.
pub async fn send_error<W>(tx: &mut OnoSender<W>, detail: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tx.send_frame(&Msg::Err(Cow::Borrowed(detail))).await?;
    Ok(())
}
