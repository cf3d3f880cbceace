//! Decoder error taxonomy.
//!
//! Every failure surfaced by the crate is one of four kinds. Structural parsing errors raised by
//! the packet, TOC and header parsers keep their own detailed enums and are classified into a kind
//! when they cross the crate boundary.

use thiserror::Error;

use crate::{header, packet, toc};

pub type Result<T> = std::result::Result<T, Error>;

/// The broad class of a decoder failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bitstream is malformed.
    InvalidData,
    /// The bitstream is valid but uses a feature this decoder does not implement.
    Unsupported,
    /// An internal buffer could not be allocated or grown.
    ResourceExhausted,
    /// A check that validated input should never trip. Indicates a decoder defect.
    InternalInvariant,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),

    #[error("packet error: {0}")]
    Packet(#[from] packet::Error),

    #[error("TOC error: {0}")]
    Toc(#[from] toc::Error),

    #[error("header error: {0}")]
    Header(#[from] header::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        return match self {
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::InternalInvariant(_) => ErrorKind::InternalInvariant,
            Error::Packet(_) | Error::Toc(_) => ErrorKind::InvalidData,
            Error::Header(err) => err.kind(),
        };
    }

    /// A short static description suitable for `symphonia_core` error variants.
    fn describe(&self) -> &'static str {
        return match self {
            Error::InvalidData(msg)
            | Error::Unsupported(msg)
            | Error::ResourceExhausted(msg)
            | Error::InternalInvariant(msg) => msg,
            Error::Packet(err) => err.describe(),
            Error::Toc(_) => "opus: invalid toc byte",
            Error::Header(err) => err.describe(),
        };
    }
}

impl From<Error> for symphonia_core::errors::Error {
    fn from(err: Error) -> Self {
        let msg = err.describe();

        return match err.kind() {
            ErrorKind::InvalidData | ErrorKind::InternalInvariant => {
                symphonia_core::errors::Error::DecodeError(msg)
            }
            ErrorKind::Unsupported => symphonia_core::errors::Error::Unsupported(msg),
            ErrorKind::ResourceExhausted => symphonia_core::errors::Error::LimitError(msg),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_core_errors() {
        let err: symphonia_core::errors::Error = Error::InvalidData("bad lacing").into();
        assert!(matches!(err, symphonia_core::errors::Error::DecodeError("bad lacing")));

        let err: symphonia_core::errors::Error = Error::Unsupported("family 2").into();
        assert!(matches!(err, symphonia_core::errors::Error::Unsupported("family 2")));

        let err: symphonia_core::errors::Error = Error::ResourceExhausted("fifo").into();
        assert!(matches!(err, symphonia_core::errors::Error::LimitError("fifo")));

        let err: symphonia_core::errors::Error = Error::InternalInvariant("skew").into();
        assert!(matches!(err, symphonia_core::errors::Error::DecodeError("skew")));
    }

    #[test]
    fn wrapped_errors_are_classified() {
        assert_eq!(Error::from(packet::Error::ZeroFrameCount).kind(), ErrorKind::InvalidData);
        assert_eq!(
            Error::from(header::Error::UnsupportedMappingFamily(2)).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(Error::from(header::Error::InvalidStreamCount(0)).kind(), ErrorKind::InvalidData);
    }
}
