//! The `Music` container (spec §3): tempo, patches, track layout and
//! patterns, independent of any one file format.

use opl_core::{Event, ParseOutput, Patch, Tempo, TrackConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tracks::{merge_tracks, split_into_tracks};

/// Which kind of voice a track drives. OPL tracks carry the same
/// [`TrackConfig`] the core codec uses; MIDI tracks just name a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Opl(TrackConfig),
    Midi { channel: u8 },
}

/// One pattern: a list of tracks, each a list of events. Simple linear
/// formats (IMF, DRO, MID) have exactly one pattern.
pub type Pattern = Vec<Vec<Event>>;

/// Free-text metadata carried alongside the song; round-trips to/from
/// JSON for the dump tooling in `opl-cli`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub comment: Option<String>,
}

/// An abstract song: the format-independent representation every
/// `FormatHandler` parses into and generates from.
#[derive(Debug, Clone, PartialEq)]
pub struct Music {
    pub initial_tempo: Tempo,
    pub patches: Vec<Patch>,
    pub track_config: Vec<TrackKind>,
    pub patterns: Vec<Pattern>,
    pub pattern_sequence: Vec<usize>,
    pub loop_dest: Option<usize>,
    pub tags: Tags,
}

impl Music {
    /// A single-pattern song with no looping — the common case for IMF,
    /// WLF, DRO, SBI and MID files, none of which have a pattern sequence
    /// of their own.
    pub fn linear(
        initial_tempo: Tempo,
        patches: Vec<Patch>,
        track_config: Vec<TrackKind>,
        tracks: Vec<Vec<Event>>,
        tags: Tags,
    ) -> Self {
        Music {
            initial_tempo,
            patches,
            track_config,
            patterns: vec![tracks],
            pattern_sequence: vec![0],
            loop_dest: None,
            tags,
        }
    }

    /// Build a single-pattern `Music` from `opl_core::parse`'s output,
    /// splitting its flat origin-tagged event stream into one track per
    /// channel or rhythm voice that actually sounds a note.
    pub fn from_opl_parse(parsed: ParseOutput, tags: Tags) -> Music {
        let initial_tempo = match parsed.events.first() {
            Some(Event::Tempo(t)) => *t,
            _ => Tempo::default(),
        };
        let (track_config, tracks) = split_into_tracks(&parsed.events, &parsed.origins, &parsed.patches);
        Music::linear(initial_tempo, parsed.patches, track_config, tracks, tags)
    }

    /// Flatten one pattern's per-track event lists back into the single
    /// origin-ordered stream, tagged by track index, that
    /// [`opl_core::generate`] expects.
    pub fn merged_pattern(&self, pattern_index: usize) -> (Vec<Event>, Vec<usize>) {
        merge_tracks(&self.patterns[pattern_index])
    }

    /// Check the invariants spec §3 names: every pattern has
    /// `track_config.len()` tracks, every `pattern_sequence` entry
    /// references a real pattern, and every `NoteOn.instrument_index` is
    /// in range.
    pub fn validate(&self) -> Result<()> {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if pattern.len() != self.track_config.len() {
                return Err(Error::InvalidMusic(format!(
                    "pattern {i} has {} tracks, expected {} (track_config.len())",
                    pattern.len(),
                    self.track_config.len()
                )));
            }
        }
        for (i, &idx) in self.pattern_sequence.iter().enumerate() {
            if idx >= self.patterns.len() {
                return Err(Error::InvalidMusic(format!(
                    "pattern_sequence[{i}] = {idx} is out of range (only {} pattern(s))",
                    self.patterns.len()
                )));
            }
        }
        if let Some(dest) = self.loop_dest {
            if dest >= self.pattern_sequence.len() {
                return Err(Error::InvalidMusic(format!(
                    "loop_dest {dest} is out of range (pattern_sequence has {} entries)",
                    self.pattern_sequence.len()
                )));
            }
        }
        for pattern in &self.patterns {
            for track in pattern {
                for event in track {
                    if let Event::NoteOn { instrument_index, .. } = event {
                        if *instrument_index as usize >= self.patches.len() {
                            return Err(Error::InvalidMusic(format!(
                                "NoteOn.instrument_index {instrument_index} is out of range ({} patch(es))",
                                self.patches.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opl_core::Rhythm;
    use pretty_assertions::assert_eq;

    #[test]
    fn linear_builder_produces_one_pattern_with_no_loop() {
        let music = Music::linear(
            Tempo::default(),
            vec![],
            vec![TrackKind::Opl(TrackConfig::Oplt { channel: 0 })],
            vec![vec![]],
            Tags::default(),
        );
        assert_eq!(music.patterns.len(), 1);
        assert_eq!(music.pattern_sequence, vec![0]);
        assert!(music.loop_dest.is_none());
        music.validate().unwrap();
    }

    #[test]
    fn mismatched_track_count_fails_validation() {
        let mut music = Music::linear(
            Tempo::default(),
            vec![],
            vec![
                TrackKind::Opl(TrackConfig::Oplt { channel: 0 }),
                TrackKind::Opl(TrackConfig::Oplr { drum: Rhythm::Bd }),
            ],
            vec![vec![]],
            Tags::default(),
        );
        // only one track's worth of events for a two-track config
        music.patterns[0].pop();
        assert!(music.validate().is_err());
    }

    #[test]
    fn out_of_range_instrument_index_fails_validation() {
        let music = Music::linear(
            Tempo::default(),
            vec![],
            vec![TrackKind::Opl(TrackConfig::Oplt { channel: 0 })],
            vec![vec![Event::NoteOn {
                frequency_hz: 440.0,
                velocity: 1.0,
                instrument_index: 0,
            }]],
            Tags::default(),
        );
        assert!(music.validate().is_err());
    }

    #[test]
    fn out_of_range_pattern_sequence_fails_validation() {
        let mut music = Music::linear(Tempo::default(), vec![], vec![], vec![], Tags::default());
        music.pattern_sequence = vec![3];
        assert!(music.validate().is_err());
    }
}
