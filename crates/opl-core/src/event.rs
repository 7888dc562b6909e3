//! The abstract event model shared by the OPL and MIDI codecs.
//!
//! Codec scratch (origin channel, source track index) is *not* carried on
//! the event itself — see [`Origin`] — so `Event` stays a plain tagged
//! variant instead of growing a grab-bag `custom` map.

use crate::patch::Rhythm;
use crate::tempo::Tempo;

/// A single musical event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Change playback rate. Global; not tied to any one track.
    Tempo(Tempo),
    /// Pass time. Delta-only; never zero once emitted.
    Delay { ticks: u32 },
    /// Begin a note.
    NoteOn {
        frequency_hz: f64,
        velocity: f64,
        instrument_index: u32,
    },
    /// End the currently sounding note on this track.
    NoteOff,
    /// Chip-global mode change.
    Configuration { option: ConfigOption, value: bool },
    /// Per-note modulation.
    Effect {
        pitchbend: Option<f64>,
        volume: Option<f64>,
    },
}

/// Chip-global configuration toggles (OPL status register bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    WaveSel,
    Opl3,
    DeepTremolo,
    DeepVibrato,
    Rhythm,
    /// Placeholder for a configuration bit that maps to no known option;
    /// never emitted by the parser, accepted (and ignored) on generate.
    Empty,
}

/// Where an event came from (or, for generation, where it should go).
///
/// A parallel array keyed by event index, not a field on `Event` — see
/// the cyclic-module design note for why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Tempo/Delay/global Configuration events: no single origin track.
    Global,
    Channel(u8),
    Rhythm(Rhythm),
}
