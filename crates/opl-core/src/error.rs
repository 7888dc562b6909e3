//! Error kinds shared by the OPL and MIDI codecs.

/// Errors raised by the codec core.
///
/// These are kinds, not codes: each variant names the structural problem,
/// not a numeric identifier a caller has to look up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("truncated input: expected at least {expected} more byte(s)")]
    TruncatedInput { expected: usize },

    #[error("bad signature: expected {expected:?}, found {found:?}")]
    BadSignature {
        expected: &'static str,
        found: String,
    },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid register: 0x{0:03X}")]
    InvalidRegister(u16),

    #[error("unreasonable delay: {0} ticks")]
    UnreasonableDelay(u32),

    #[error("format conflict: item carries both {a} and {b}")]
    FormatConflict { a: &'static str, b: &'static str },

    #[error("missing instrument: index {0} out of range")]
    MissingInstrument(u32),

    #[error("unsupported event: {0}")]
    UnsupportedEvent(&'static str),

    #[error("clipped frequency: {requested_hz:.3} Hz exceeds representable range")]
    ClippedFrequency { requested_hz: f64 },

    #[error("tag decode error: {0}")]
    TagDecodeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
