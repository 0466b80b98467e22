//! Static, ordered frame layouts for every message group of the protocol.
//!
//! Both ends walk the same `Schema`, a writer refuses to emit a field out of order
//! and a reader refuses any frame whose tag, kind or length disagrees with the
//! next field.

use log::trace;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    OnoReceiver, OnoSender, ProtocolErr, Result,
    msg::{Kind, Msg, Payload, Tag},
};

/// One typed field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub tag: Tag,
    pub kind: Kind,
}

const fn ints(tag: Tag) -> Field {
    Field {
        tag,
        kind: Kind::Ints,
    }
}

const fn doubles(tag: Tag) -> Field {
    Field {
        tag,
        kind: Kind::Doubles,
    }
}

/// An ordered list of fields exchanged as a unit.
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

/// `[selector]`
pub static TASK: Schema = Schema {
    name: "task selector",
    fields: &[ints(Tag::Task)],
};

/// `[nobs, ndim, device]`, then `nobs * ndim` observations in row major order.
pub static INIT_REQUEST: Schema = Schema {
    name: "init request",
    fields: &[ints(Tag::Params), doubles(Tag::Data)],
};

/// `[local_index]`
pub static INIT_ACK: Schema = Schema {
    name: "init ack",
    fields: &[ints(Tag::LocalIndex)],
};

/// `[n_units]`
pub static ROUND_HEADER: Schema = Schema {
    name: "round header",
    fields: &[ints(Tag::Params)],
};

/// `[local_index, ncomp, ndim, relabel, global_id]`, then weights, means and covariances.
pub static UNIT_REQUEST: Schema = Schema {
    name: "unit request",
    fields: &[
        ints(Tag::UnitParams),
        doubles(Tag::Weights),
        doubles(Tag::Means),
        doubles(Tag::Covariances),
    ],
};

/// `[n_results]`
pub static RESULT_COUNT: Schema = Schema {
    name: "result count",
    fields: &[ints(Tag::ResultCount)],
};

pub static LABEL_UNIT: Schema = Schema {
    name: "label unit",
    fields: &[ints(Tag::UnitCount), ints(Tag::Labels), ints(Tag::GlobalId)],
};

pub static RELABEL_UNIT: Schema = Schema {
    name: "relabel unit",
    fields: &[
        ints(Tag::UnitCount),
        ints(Tag::Labels),
        ints(Tag::Relabels),
        ints(Tag::GlobalId),
    ],
};

pub static STATS_UNIT: Schema = Schema {
    name: "stats unit",
    fields: &[
        ints(Tag::UnitCount),
        doubles(Tag::Counts),
        doubles(Tag::MeanSums),
        doubles(Tag::Density),
        doubles(Tag::LogLikelihood),
        ints(Tag::GlobalId),
    ],
};

/// Tracks the position inside a schema, shared by both directions.
#[derive(Debug)]
struct Cursor {
    schema: &'static Schema,
    pos: usize,
}

impl Cursor {
    fn new(schema: &'static Schema) -> Self {
        Self { schema, pos: 0 }
    }

    fn advance(&mut self, kind: Kind) -> Result<Field> {
        let Some(&field) = self.schema.fields.get(self.pos) else {
            return Err(ProtocolErr::SchemaExhausted {
                schema: self.schema.name,
            });
        };

        if field.kind != kind {
            return Err(ProtocolErr::UnexpectedKind {
                tag: field.tag,
                expected: field.kind,
                got: kind,
            });
        }

        self.pos += 1;
        Ok(field)
    }

    fn finish(&self) -> Result<()> {
        let expected = self.schema.fields.len();

        if self.pos != expected {
            return Err(ProtocolErr::Incomplete {
                schema: self.schema.name,
                written: self.pos,
                expected,
            });
        }

        Ok(())
    }
}

/// Writes the fields of a schema in order.
pub struct SchemaWriter<'a, W: AsyncWrite + Unpin> {
    tx: &'a mut OnoSender<W>,
    cursor: Cursor,
}

impl<'a, W: AsyncWrite + Unpin> SchemaWriter<'a, W> {
    pub fn new(tx: &'a mut OnoSender<W>, schema: &'static Schema) -> Self {
        Self {
            tx,
            cursor: Cursor::new(schema),
        }
    }

    pub async fn ints(&mut self, values: &[i32]) -> Result<()> {
        let field = self.cursor.advance(Kind::Ints)?;
        let msg = Msg::Data {
            tag: field.tag,
            payload: Payload::Ints(values),
        };

        self.tx.send_frame(&msg).await?;
        Ok(())
    }

    pub async fn doubles(&mut self, values: &[f64]) -> Result<()> {
        let field = self.cursor.advance(Kind::Doubles)?;
        let msg = Msg::Data {
            tag: field.tag,
            payload: Payload::Doubles(values),
        };

        self.tx.send_frame(&msg).await?;
        Ok(())
    }

    /// Fails if any field of the schema was left unwritten.
    pub fn finish(self) -> Result<()> {
        self.cursor.finish()
    }
}

/// Reads the fields of a schema in order, checking every frame against it.
pub struct SchemaReader<'a, R: AsyncRead + Unpin> {
    rx: &'a mut OnoReceiver<R>,
    buf: &'a mut Vec<u64>,
    cursor: Cursor,
}

impl<'a, R: AsyncRead + Unpin> SchemaReader<'a, R> {
    pub fn new(rx: &'a mut OnoReceiver<R>, buf: &'a mut Vec<u64>, schema: &'static Schema) -> Self {
        Self {
            rx,
            buf,
            cursor: Cursor::new(schema),
        }
    }

    async fn recv(&mut self, kind: Kind, len: usize) -> Result<Payload<'_>> {
        let field = self.cursor.advance(kind)?;
        let schema = self.cursor.schema.name;

        let (tag, payload) = match self.rx.recv_frame(&mut *self.buf).await? {
            Msg::Err(detail) => return Err(ProtocolErr::Remote(detail.into_owned())),
            Msg::Data { tag, payload } => (tag, payload),
        };

        trace!(tag = tag.code(), len = payload.len(); "received frame");

        if tag != field.tag {
            return Err(ProtocolErr::UnexpectedTag {
                schema,
                expected: field.tag,
                got: tag,
            });
        }

        if payload.kind() != field.kind {
            return Err(ProtocolErr::UnexpectedKind {
                tag,
                expected: field.kind,
                got: payload.kind(),
            });
        }

        if payload.len() != len {
            return Err(ProtocolErr::LengthMismatch {
                tag,
                expected: len,
                got: payload.len(),
            });
        }

        Ok(payload)
    }

    pub async fn ints(&mut self, len: usize) -> Result<Vec<i32>> {
        match self.recv(Kind::Ints, len).await? {
            Payload::Ints(values) => Ok(values.to_vec()),
            Payload::Doubles(_) => unreachable!("kind checked in recv"),
        }
    }

    pub async fn doubles(&mut self, len: usize) -> Result<Vec<f64>> {
        match self.recv(Kind::Doubles, len).await? {
            Payload::Doubles(values) => Ok(values.to_vec()),
            Payload::Ints(_) => unreachable!("kind checked in recv"),
        }
    }

    pub async fn int(&mut self) -> Result<i32> {
        Ok(self.ints(1).await?[0])
    }

    pub async fn double(&mut self) -> Result<f64> {
        Ok(self.doubles(1).await?[0])
    }

    /// Reads a single non negative integer, typically a size or an index.
    pub async fn count(&mut self) -> Result<usize> {
        let tag = self.next_tag();
        let value = self.int().await?;
        usize::try_from(value).map_err(|_| ProtocolErr::InvalidValue {
            tag,
            value: value.into(),
        })
    }

    fn next_tag(&self) -> Tag {
        self.cursor
            .schema
            .fields
            .get(self.cursor.pos)
            .map_or(Tag::Task, |field| field.tag)
    }

    /// Fails if any field of the schema was left unread.
    pub fn finish(self) -> Result<()> {
        self.cursor.finish()
    }
}
