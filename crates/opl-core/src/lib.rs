//! OPL2/OPL3 register-stream and MIDI event codec core.
//!
//! This crate holds the hard, well-specified middle of the pipeline —
//! [`parser`]/[`generator`] for the OPL register stream, [`midi`] for
//! Standard MIDI File bytes, and [`tempo_algebra`] for collapsing
//! interleaved tempo changes to a fixed tick rate. File-format wrappers,
//! autodetection, and the `Music` container live in `opl-formats`.

pub mod chip;
pub mod error;
pub mod event;
pub mod generator;
pub mod midi;
pub mod parser;
pub mod patch;
pub mod patch_table;
pub mod tempo;
pub mod tempo_algebra;
pub mod warnings;

pub use chip::{ChipState, FnumBlock};
pub use error::{Error, Result};
pub use event::{ConfigOption, Event, Origin};
pub use generator::{generate, GenerateOutput, TrackConfig, TrackedEvent};
pub use midi::{MidiEvent, TimedMidiEvent};
pub use parser::{parse, OplItem, ParseOutput};
pub use patch::{Connection, OperatorParams, OplPatch, Patch, Rhythm};
pub use patch_table::PatchTable;
pub use tempo::Tempo;
pub use tempo_algebra::fixed_tempo;
pub use warnings::GeneratorWarnings;
