//! SBI: a single AdLib/OPL2 instrument timbre (spec §6).
//!
//! Unlike every other format in this crate, SBI carries no performance at
//! all — just one two-operator patch, optionally tagged as a rhythm-mode
//! voice by the five-byte `SBTimbre` extension some banks append:
//! `percType`, a signed `transpose`, `percNote`, and two pad bytes. `Music`
//! here always has an empty track layout; there is nothing to play.

use opl_core::{ChipState, Connection, OplPatch, Patch, Rhythm};

use crate::error::{Error, Result};
use crate::handler::{Content, FormatCaps, FormatHandler, FormatMetadata, Identification};
use crate::music::{Music, Tags};

const SIGNATURE: &[u8; 4] = b"SBI\x1A";
const TITLE_LEN: usize = 32;
const REGISTER_BLOCK_LEN: usize = 11;
const HEADER_LEN: usize = 4 + TITLE_LEN;

fn caps() -> FormatCaps {
    FormatCaps {
        channel_map: vec!["instrument".into()],
        tags: true,
        supported_events: Vec::new(),
        patch_names: true,
    }
}

fn percussion_byte(r: Rhythm) -> u8 {
    match r {
        Rhythm::No => 0,
        Rhythm::Bd => 1,
        Rhythm::Sd => 2,
        Rhythm::Tt => 3,
        Rhythm::Cy => 4,
        Rhythm::Hh => 5,
    }
}

fn percussion_from_byte(b: u8) -> Rhythm {
    match b {
        1 => Rhythm::Bd,
        2 => Rhythm::Sd,
        3 => Rhythm::Tt,
        4 => Rhythm::Cy,
        5 => Rhythm::Hh,
        _ => Rhythm::No,
    }
}

fn decode_patch(registers: &[u8; REGISTER_BLOCK_LEN], timbre: Option<[u8; 5]>) -> OplPatch {
    let mut chip = ChipState::new();
    chip.set(0x20, registers[0]);
    chip.set(0x23, registers[1]);
    chip.set(0x40, registers[2]);
    chip.set(0x43, registers[3]);
    chip.set(0x60, registers[4]);
    chip.set(0x63, registers[5]);
    chip.set(0x80, registers[6]);
    chip.set(0x83, registers[7]);
    chip.set(0xE0, registers[8]);
    chip.set(0xE3, registers[9]);
    chip.set(0xC0, registers[10]);

    let slot0 = chip.read_operator(ChipState::operator_offset(0, 0));
    let slot1 = chip.read_operator(ChipState::operator_offset(0, 1));
    let (feedback, connection_bit) = chip.read_feedback_connection(ChipState::channel_offset(0));

    let rhythm = timbre.map(|t| percussion_from_byte(t[0])).unwrap_or(Rhythm::No);
    let rhythm_transpose = timbre.map(|t| t[1] as i8).unwrap_or(0);
    let rhythm_note = timbre.map(|t| t[2]).unwrap_or(0);

    OplPatch {
        slots: [Some(slot0), Some(slot1), None, None],
        feedback,
        connection: if connection_bit == 0 { Connection::Fm } else { Connection::Am },
        rhythm,
        rhythm_note,
        rhythm_transpose,
    }
}

fn encode_patch(patch: &OplPatch) -> ([u8; REGISTER_BLOCK_LEN], Option<[u8; 5]>) {
    let mut chip = ChipState::new();
    let slot0 = patch.slots[0].unwrap_or(opl_core::OperatorParams {
        tremolo: false,
        vibrato: false,
        sustain: false,
        ksr: false,
        freq_mult: 0,
        scale_level: 0,
        output_level: 0x3F,
        attack_rate: 0,
        decay_rate: 0,
        sustain_rate: 0,
        release_rate: 0,
        wave_select: 0,
    });
    let slot1 = patch.slots[1].unwrap_or(slot0);
    chip.write_operator(ChipState::operator_offset(0, 0), &slot0);
    chip.write_operator(ChipState::operator_offset(0, 1), &slot1);
    chip.write_feedback_connection(
        ChipState::channel_offset(0),
        patch.feedback,
        if patch.connection == Connection::Am { 1 } else { 0 },
    );

    let registers = [
        chip.get(0x20),
        chip.get(0x23),
        chip.get(0x40),
        chip.get(0x43),
        chip.get(0x60),
        chip.get(0x63),
        chip.get(0x80),
        chip.get(0x83),
        chip.get(0xE0),
        chip.get(0xE3),
        chip.get(0xC0),
    ];

    let timbre = if patch.rhythm != Rhythm::No {
        Some([
            percussion_byte(patch.rhythm),
            patch.rhythm_transpose as u8,
            patch.rhythm_note,
            0,
            0,
        ])
    } else {
        None
    };

    (registers, timbre)
}

fn read_title(bytes: &[u8]) -> String {
    let nul_at = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..nul_at]).into_owned()
}

fn write_title(title: &str) -> [u8; TITLE_LEN] {
    let mut out = [0u8; TITLE_LEN];
    let bytes = title.as_bytes();
    let n = bytes.len().min(TITLE_LEN - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// A single AdLib/OPL2 instrument timbre.
pub struct Sbi;

impl FormatHandler for Sbi {
    fn metadata(&self) -> FormatMetadata {
        FormatMetadata {
            id: "sbi".into(),
            title: "AdLib Instrument (SBI)".into(),
            games: vec!["AdLib instrument banks".into()],
            glob: vec!["*.sbi".into()],
            caps: caps(),
        }
    }

    fn identify(&self, content: &Content, _filename: &str) -> Identification {
        if content.main.len() < HEADER_LEN + REGISTER_BLOCK_LEN {
            return Identification::no("too short for an SBI header and register block");
        }
        if &content.main[0..4] != SIGNATURE {
            return Identification::no("missing SBI signature");
        }
        let len = content.main.len();
        if len == HEADER_LEN + REGISTER_BLOCK_LEN || len == HEADER_LEN + REGISTER_BLOCK_LEN + 5 {
            Identification::yes("SBI signature and exact expected length")
        } else {
            Identification::maybe("SBI signature matches, but trailing bytes don't match a known timbre extension length")
        }
    }

    fn parse(&self, content: &Content) -> Result<Music> {
        if content.main.len() < HEADER_LEN + REGISTER_BLOCK_LEN {
            return Err(Error::TruncatedInput {
                expected: HEADER_LEN + REGISTER_BLOCK_LEN - content.main.len(),
            });
        }
        if &content.main[0..4] != SIGNATURE {
            return Err(Error::BadSignature {
                expected: "SBI\\x1A",
                found: String::from_utf8_lossy(&content.main[0..4]).into_owned(),
            });
        }
        let title = read_title(&content.main[4..HEADER_LEN]);
        let mut registers = [0u8; REGISTER_BLOCK_LEN];
        registers.copy_from_slice(&content.main[HEADER_LEN..HEADER_LEN + REGISTER_BLOCK_LEN]);

        let timbre_start = HEADER_LEN + REGISTER_BLOCK_LEN;
        let timbre = if content.main.len() >= timbre_start + 5 {
            let mut t = [0u8; 5];
            t.copy_from_slice(&content.main[timbre_start..timbre_start + 5]);
            Some(t)
        } else {
            None
        };

        let patch = decode_patch(&registers, timbre);
        let tags = Tags {
            title: Some(title).filter(|s| !s.is_empty()),
            artist: None,
            comment: None,
        };
        Ok(Music::linear(opl_core::Tempo::default(), vec![Patch::Opl(patch)], Vec::new(), Vec::new(), tags))
    }

    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)> {
        let issues = self.check_limits(music);
        if !issues.is_empty() {
            return Err(Error::InvalidMusic(issues.join("; ")));
        }
        let Patch::Opl(patch) = &music.patches[0] else {
            unreachable!("check_limits already confirmed an OPL patch");
        };
        let (registers, timbre) = encode_patch(patch);

        let mut bytes = Vec::with_capacity(HEADER_LEN + REGISTER_BLOCK_LEN + 5);
        bytes.extend_from_slice(SIGNATURE);
        bytes.extend_from_slice(&write_title(music.tags.title.as_deref().unwrap_or("")));
        bytes.extend_from_slice(&registers);
        if let Some(t) = timbre {
            bytes.extend_from_slice(&t);
        }

        Ok((Content::from_bytes(bytes), Vec::new()))
    }

    fn check_limits(&self, music: &Music) -> Vec<String> {
        let mut issues = Vec::new();
        if music.patches.len() != 1 {
            issues.push(format!("SBI holds exactly one instrument, found {}", music.patches.len()));
            return issues;
        }
        match &music.patches[0] {
            Patch::Opl(p) => {
                if p.slots[2].is_some() || p.slots[3].is_some() {
                    issues.push("SBI has no representation for four-operator patches".into());
                }
            }
            _ => issues.push("SBI only represents OPL patches".into()),
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_patch() -> OplPatch {
        OplPatch {
            slots: [
                Some(opl_core::OperatorParams {
                    tremolo: true,
                    vibrato: false,
                    sustain: true,
                    ksr: false,
                    freq_mult: 1,
                    scale_level: 2,
                    output_level: 40,
                    attack_rate: 10,
                    decay_rate: 5,
                    sustain_rate: 3,
                    release_rate: 2,
                    wave_select: 1,
                }),
                Some(opl_core::OperatorParams {
                    tremolo: false,
                    vibrato: true,
                    sustain: false,
                    ksr: true,
                    freq_mult: 2,
                    scale_level: 1,
                    output_level: 15,
                    attack_rate: 12,
                    decay_rate: 8,
                    sustain_rate: 6,
                    release_rate: 4,
                    wave_select: 3,
                }),
                None,
                None,
            ],
            feedback: 5,
            connection: Connection::Fm,
            rhythm: Rhythm::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        }
    }

    #[test]
    fn identify_accepts_exact_length_file() {
        let music = Music::linear(opl_core::Tempo::default(), vec![Patch::Opl(sample_patch())], Vec::new(), Vec::new(), Tags::default());
        let (content, _) = Sbi.generate(&music).unwrap();
        let id = Sbi.identify(&content, "lead.sbi");
        assert_eq!(id.valid, crate::handler::Validity::Yes);
    }

    #[test]
    fn identify_rejects_missing_signature() {
        let content = Content::from_bytes(vec![0; 60]);
        let id = Sbi.identify(&content, "lead.sbi");
        assert_eq!(id.valid, crate::handler::Validity::No);
    }

    #[test]
    fn patch_round_trips_through_generate_and_parse() {
        let music = Music::linear(opl_core::Tempo::default(), vec![Patch::Opl(sample_patch())], Vec::new(), Vec::new(), Tags::default());
        let (content, warnings) = Sbi.generate(&music).unwrap();
        assert!(warnings.is_empty());
        let reparsed = Sbi.parse(&content).unwrap();
        let Patch::Opl(p) = &reparsed.patches[0] else { panic!("expected an OPL patch") };
        assert!(p.equals(&sample_patch()));
    }

    #[test]
    fn rhythm_voice_round_trips_through_timbre_extension() {
        let mut patch = sample_patch();
        patch.rhythm = Rhythm::Sd;
        patch.rhythm_transpose = -12;
        patch.rhythm_note = 57;
        let music = Music::linear(opl_core::Tempo::default(), vec![Patch::Opl(patch)], Vec::new(), Vec::new(), Tags::default());
        let (content, _) = Sbi.generate(&music).unwrap();
        assert_eq!(content.main.len(), HEADER_LEN + REGISTER_BLOCK_LEN + 5);
        let reparsed = Sbi.parse(&content).unwrap();
        let Patch::Opl(p) = &reparsed.patches[0] else { panic!("expected an OPL patch") };
        assert_eq!(p.rhythm, Rhythm::Sd);
        assert_eq!(p.rhythm_transpose, -12);
        assert_eq!(p.rhythm_note, 57);
    }

    #[test]
    fn four_op_patch_is_rejected_by_check_limits() {
        let mut patch = sample_patch();
        patch.slots[2] = patch.slots[0];
        let music = Music::linear(opl_core::Tempo::default(), vec![Patch::Opl(patch)], Vec::new(), Vec::new(), Tags::default());
        assert!(!Sbi.check_limits(&music).is_empty());
        assert!(Sbi.generate(&music).is_err());
    }
}
