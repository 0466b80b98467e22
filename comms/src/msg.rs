use std::{borrow::Cow, fmt, io};

use crate::{Deserialize, Serialize};

type HeaderType = u32;
const HEADER_FIELD_SIZE: usize = size_of::<HeaderType>();

/// Tag followed by kind, keeps the body 8 bytes aligned inside the receive buffer.
pub(crate) const HEADER_SIZE: usize = 2 * HEADER_FIELD_SIZE;

const ERR_KIND: HeaderType = 0;
const INTS_KIND: HeaderType = 1;
const DOUBLES_KIND: HeaderType = 2;

/// The logical channel identifier of a frame.
///
/// Tags below 30 flow from the coordinator to the workers, the rest flow back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Tag {
    Task = 11,
    Params = 12,
    UnitParams = 13,
    Data = 14,
    Weights = 21,
    Means = 22,
    Covariances = 23,
    LocalIndex = 31,
    ResultCount = 41,
    UnitCount = 42,
    Labels = 43,
    Relabels = 44,
    Counts = 45,
    MeanSums = 46,
    Density = 47,
    LogLikelihood = 48,
    GlobalId = 49,
}

impl Tag {
    const ALL: [Tag; 17] = [
        Tag::Task,
        Tag::Params,
        Tag::UnitParams,
        Tag::Data,
        Tag::Weights,
        Tag::Means,
        Tag::Covariances,
        Tag::LocalIndex,
        Tag::ResultCount,
        Tag::UnitCount,
        Tag::Labels,
        Tag::Relabels,
        Tag::Counts,
        Tag::MeanSums,
        Tag::Density,
        Tag::LogLikelihood,
        Tag::GlobalId,
    ];

    /// The wire value of this tag.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parses a wire value, `None` if no tag has that value.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.code() == code)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

/// The element type of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Ints,
    Doubles,
}

/// The body of the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    Ints(&'a [i32]),
    Doubles(&'a [f64]),
}

impl Payload<'_> {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Ints(_) => Kind::Ints,
            Payload::Doubles(_) => Kind::Doubles,
        }
    }

    /// The amount of elements, not bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Ints(values) => values.len(),
            Payload::Doubles(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single frame of the coordinator/worker protocol.
#[derive(Debug)]
pub enum Msg<'a> {
    Data { tag: Tag, payload: Payload<'a> },
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_header<T>(what: &str, value: HeaderType) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid {what} {value}"),
        ))
    }

    fn misaligned_body<T>(tag: Tag, err: bytemuck::PodCastError) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received a malformed body for {tag}: {err:?}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(detail) => {
                buf.extend_from_slice(&(0 as HeaderType).to_be_bytes());
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(detail.as_bytes())
            }
            Msg::Data { tag, payload } => {
                let (kind, body): (HeaderType, &[u8]) = match payload {
                    Payload::Ints(values) => (INTS_KIND, bytemuck::cast_slice(values)),
                    Payload::Doubles(values) => (DOUBLES_KIND, bytemuck::cast_slice(values)),
                };

                buf.extend_from_slice(&tag.code().to_be_bytes());
                buf.extend_from_slice(&kind.to_be_bytes());
                Some(body)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((tag_buf, rest)) = buf.split_first_chunk::<HEADER_FIELD_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };
        let Some((kind_buf, body)) = rest.split_first_chunk::<HEADER_FIELD_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        let tag = HeaderType::from_be_bytes(*tag_buf);
        let kind = HeaderType::from_be_bytes(*kind_buf);

        if kind == ERR_KIND {
            let detail = std::str::from_utf8(body)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

            return Ok(Self::Err(Cow::Borrowed(detail)));
        }

        let Some(tag) = Tag::from_code(tag) else {
            return Self::invalid_header("tag", tag);
        };

        let payload = match kind {
            INTS_KIND => match bytemuck::try_cast_slice(body) {
                Ok(values) => Payload::Ints(values),
                Err(err) => return Self::misaligned_body(tag, err),
            },
            DOUBLES_KIND => match bytemuck::try_cast_slice(body) {
                Ok(values) => Payload::Doubles(values),
                Err(err) => return Self::misaligned_body(tag, err),
            },
            kind => return Self::invalid_header("kind", kind),
        };

        Ok(Self::Data { tag, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_body(msg: &Msg<'_>) -> Vec<u64> {
        let mut header = Vec::new();
        let data = msg.serialize(&mut header).unwrap_or_default();
        header.extend_from_slice(data);

        let mut aligned = vec![0u64; header.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut aligned)[..header.len()].copy_from_slice(&header);
        aligned.truncate(header.len().div_ceil(8));
        aligned
    }

    #[test]
    fn doubles_frame_keeps_values() {
        let values = [1.5, -2.0, 3.25];
        let msg = Msg::Data {
            tag: Tag::Means,
            payload: Payload::Doubles(&values),
        };

        let buf = frame_body(&msg);
        let len = HEADER_SIZE + values.len() * 8;
        let bytes = &bytemuck::cast_slice::<u64, u8>(&buf)[..len];

        let Msg::Data { tag, payload } = Msg::deserialize(bytes).unwrap() else {
            panic!("expected a data frame");
        };

        assert_eq!(tag, Tag::Means);
        assert_eq!(payload, Payload::Doubles(&values));
    }

    #[test]
    fn err_frame_keeps_detail() {
        let msg = Msg::Err(Cow::Borrowed("singular covariance"));
        let buf = frame_body(&msg);
        let len = HEADER_SIZE + "singular covariance".len();
        let bytes = &bytemuck::cast_slice::<u64, u8>(&buf)[..len];

        let Msg::Err(detail) = Msg::deserialize(bytes).unwrap() else {
            panic!("expected an error frame");
        };

        assert_eq!(detail, "singular covariance");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&99u32.to_be_bytes());
        bytes[4..].copy_from_slice(&INTS_KIND.to_be_bytes());

        let err = Msg::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let bytes = [0u8; HEADER_SIZE - 1];
        assert!(Msg::deserialize(&bytes).is_err());
    }

    #[test]
    fn tag_codes_round_trip() {
        for tag in Tag::ALL {
            assert_eq!(Tag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(Tag::from_code(0), None);
    }
}
