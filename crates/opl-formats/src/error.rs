//! Error kinds for the format-handler layer.
//!
//! Mirrors [`opl_core::Error`]'s kinds (spec §7) plus the container and I/O
//! failures that only make sense once bytes and a `Music` are involved.

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

    /// `Music` invariant violation (§3): a pattern's track count, a
    /// `pattern_sequence` index, or a `NoteOn.instrument_index` doesn't
    /// line up with `track_config`/`patches`.
    #[error("invalid music container: {0}")]
    InvalidMusic(String),

    #[error(transparent)]
    Core(#[from] opl_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
