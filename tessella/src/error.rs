//! Error types shared by every stage of the codec.

use core::fmt;

/// The failure kinds a pipeline step can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A marker segment's layout or lengths violate the codestream rules.
    MalformedMarker(&'static str),
    /// A valid codestream feature that this codec does not implement.
    UnsupportedFeature(&'static str),
    /// An allocation failed or an internal size cap was exceeded.
    ResourceExhausted(&'static str),
    /// Caller-supplied configuration outside the allowed ranges.
    InvalidParameter(&'static str),
    /// The underlying byte source or sink failed.
    StreamIo,
    /// Palette / component-mapping / channel-definition inconsistency.
    ColorInvariant(&'static str),
    /// A packet header or segment ended before its announced length.
    Truncated(&'static str),
}

/// Where in the input an error was detected, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// A byte offset into the codestream.
    Offset(usize),
    /// A tile index.
    Tile(u32),
}

/// The error type for encoding and decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Where it went wrong, if the failing stage knows.
    pub position: Option<Position>,
}

impl Error {
    /// Attach a position to an error that was raised without one.
    pub(crate) fn at(mut self, position: Position) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            position: None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMarker(what) => write!(f, "malformed marker segment: {what}"),
            Self::UnsupportedFeature(what) => write!(f, "unsupported feature: {what}"),
            Self::ResourceExhausted(what) => write!(f, "resource limit exceeded: {what}"),
            Self::InvalidParameter(what) => write!(f, "invalid parameter: {what}"),
            Self::StreamIo => write!(f, "stream I/O failure"),
            Self::ColorInvariant(what) => write!(f, "colour description inconsistency: {what}"),
            Self::Truncated(what) => write!(f, "truncated data: {what}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(Position::Offset(offset)) => write!(f, "{} (at byte {offset})", self.kind),
            Some(Position::Tile(tile)) => write!(f, "{} (in tile {tile})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for codec operations.
pub type Result<T> = core::result::Result<T, Error>;

macro_rules! bail {
    ($err:expr) => {
        return Err($crate::error::Error::from($err))
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($crate::error::Error::from($err))
    };
}

pub(crate) use bail;
pub(crate) use err;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_render() {
        let e = Error::from(ErrorKind::Truncated("packet header")).at(Position::Tile(3));
        assert_eq!(e.to_string(), "truncated data: packet header (in tile 3)");

        let e = Error::from(ErrorKind::StreamIo).at(Position::Offset(17));
        assert_eq!(e.to_string(), "stream I/O failure (at byte 17)");
    }

    #[test]
    fn first_position_wins() {
        let e = Error::from(ErrorKind::StreamIo)
            .at(Position::Offset(1))
            .at(Position::Offset(2));
        assert_eq!(e.position, Some(Position::Offset(1)));
    }
}
