use std::collections::TryReserveError;
use std::fmt;
pub use Error::*;

/// Error codes
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Width or height of the image is zero, or the histogram has no colors
    EmptyImage,
    /// Requested palette size is not in 1..=256
    PaletteSize,
    /// Even the largest allowed palette can't satisfy the maximum error set with [`set_quality()`][crate::Attributes::set_quality]
    QualityUnattainable,
    /// Speed is not in 1..=11
    InvalidSpeed,
    /// Function called with invalid arguments
    ValueOutOfRange,
    /// Pixel buffer length doesn't match width × height
    BufferSizeMismatch,
    /// Either the system/process really hit a limit, or the image size was ridiculously wrong
    OutOfMemory,
    /// Progress callback said to stop
    Aborted,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::EmptyImage => "EMPTY_IMAGE",
            Self::PaletteSize => "PALETTE_SIZE",
            Self::QualityUnattainable => "QUALITY_UNATTAINABLE",
            Self::InvalidSpeed => "INVALID_SPEED",
            Self::ValueOutOfRange => "VALUE_OUT_OF_RANGE",
            Self::BufferSizeMismatch => "BUFFER_SIZE_MISMATCH",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Aborted => "ABORTED",
        })
    }
}

impl From<TryReserveError> for Error {
    #[cold]
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

#[test]
fn display_codes() {
    assert_eq!("QUALITY_UNATTAINABLE", QualityUnattainable.to_string());
    assert_eq!("EMPTY_IMAGE", EmptyImage.to_string());
    let mut v: Vec<u8> = Vec::new();
    let err: Error = v.try_reserve(usize::MAX).unwrap_err().into();
    assert_eq!(OutOfMemory, err);
}
