//! DRO v1: DOSBox's raw OPL capture format (spec §6).
//!
//! Bank-switched opcode stream at a fixed 1000 Hz tick rate. One
//! ambiguity in the header is worth calling out: `flagHW` is `u32le` in
//! newer captures but a bare `u8` in early ones (REDESIGN FLAG 9a) — the
//! reader rewinds when the naive `u32le` read comes back with a
//! high byte set, since a real hardware-type value is only ever 0, 1 or 2.

use opl_core::{parse, OplItem, Tempo};

use crate::error::{Error, Result};
use crate::handler::{Content, FormatCaps, FormatHandler, FormatMetadata, Identification};
use crate::io::{self, TagBlock};
use crate::music::{Music, Tags};
use crate::tracks::retime_to_fixed_tempo;

const SIGNATURE: &str = "DBRAWOPL";
const HZ: u32 = 1000;

fn caps() -> FormatCaps {
    FormatCaps {
        channel_map: (0..18).map(|c| format!("channel {c}")).collect(),
        tags: true,
        supported_events: vec![
            "Tempo".into(),
            "Delay".into(),
            "NoteOn".into(),
            "NoteOff".into(),
            "Configuration".into(),
        ],
        patch_names: false,
    }
}

struct Header {
    len_ms: u32,
    len_bytes: u32,
    flag_hw: u32,
    header_len: usize,
}

fn read_header(bytes: &[u8]) -> Result<Header> {
    let mut pos = 0;
    let sig = io::read_exact(bytes, &mut pos, 8)?;
    if sig != SIGNATURE.as_bytes() {
        return Err(Error::BadSignature {
            expected: SIGNATURE,
            found: String::from_utf8_lossy(sig).into_owned(),
        });
    }
    let version_major = io::read_u16le(bytes, &mut pos)?;
    let version_minor = io::read_u16le(bytes, &mut pos)?;
    if (version_major, version_minor) != (0, 1) {
        return Err(Error::UnsupportedVersion(format!("{version_major}.{version_minor}")));
    }
    let len_ms = io::read_u32le(bytes, &mut pos)?;
    let len_bytes = io::read_u32le(bytes, &mut pos)?;

    let flag_pos_before = pos;
    let flag_u32 = io::read_u32le(bytes, &mut pos)?;
    let flag_hw = if flag_u32 >> 8 != 0 {
        // Not a plausible hardware-type value as a u32 — this is a legacy
        // file where flagHW is one byte; rewind the extra three.
        pos = flag_pos_before + 1;
        bytes[flag_pos_before] as u32
    } else {
        flag_u32
    };

    Ok(Header {
        len_ms,
        len_bytes,
        flag_hw,
        header_len: pos,
    })
}

fn write_header(len_ms: u32, len_bytes: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE.as_bytes());
    io::write_u16le(&mut out, 0);
    io::write_u16le(&mut out, 1);
    io::write_u32le(&mut out, len_ms);
    io::write_u32le(&mut out, len_bytes);
    io::write_u32le(&mut out, 0); // hardware type: OPL2; not round-tripped
    out
}

fn decode_body(body: &[u8]) -> Result<Vec<OplItem>> {
    let mut items = Vec::new();
    let mut pos = 0;
    let mut bank: u16 = 0;
    while pos < body.len() {
        let opcode = io::read_u8(body, &mut pos)?;
        match opcode {
            0x00 => {
                let d = io::read_u8(body, &mut pos)?;
                items.push(OplItem::Delay { ticks: d as u32 + 1 });
            }
            0x01 => {
                let d = io::read_u16le(body, &mut pos)?;
                items.push(OplItem::Delay { ticks: d as u32 + 1 });
            }
            0x02 => bank = 0,
            0x03 => bank = 0x100,
            0x04 => {
                let reg = io::read_u8(body, &mut pos)? as u16;
                let val = io::read_u8(body, &mut pos)?;
                items.push(OplItem::Reg { reg: bank + reg, val });
            }
            reg_byte => {
                let val = io::read_u8(body, &mut pos)?;
                items.push(OplItem::Reg { reg: bank + reg_byte as u16, val });
            }
        }
    }
    Ok(items)
}

fn encode_body(items: &[OplItem]) -> (Vec<u8>, u32) {
    let mut out = Vec::new();
    let mut bank: u16 = 0;
    let mut total_ms: u64 = 0;
    for item in items {
        match item {
            OplItem::Reg { reg, val } => {
                let target_bank = reg & 0x100;
                if target_bank != bank {
                    bank = target_bank;
                    out.push(if bank == 0 { 0x02 } else { 0x03 });
                }
                let local = (*reg & 0xFF) as u8;
                if local <= 0x04 {
                    out.push(0x04);
                    out.push(local);
                    out.push(*val);
                } else {
                    out.push(local);
                    out.push(*val);
                }
            }
            OplItem::Delay { ticks } => {
                total_ms += *ticks as u64;
                let mut remaining = *ticks;
                while remaining > 0 {
                    if remaining <= 256 {
                        out.push(0x00);
                        out.push((remaining - 1) as u8);
                        remaining = 0;
                    } else {
                        let chunk = remaining.min(65536);
                        out.push(0x01);
                        io::write_u16le(&mut out, (chunk - 1) as u16);
                        remaining -= chunk;
                    }
                }
            }
            OplItem::Tempo(_) => {}
        }
    }
    (out, total_ms.min(u32::MAX as u64) as u32)
}

/// DOSBox's DRO v1 raw OPL capture.
pub struct Dro;

impl FormatHandler for Dro {
    fn metadata(&self) -> FormatMetadata {
        FormatMetadata {
            id: "dro-v1".into(),
            title: "DOSBox Raw OPL (DRO v1)".into(),
            games: vec!["DOSBox captures".into()],
            glob: vec!["*.dro".into()],
            caps: caps(),
        }
    }

    fn identify(&self, content: &Content, _filename: &str) -> Identification {
        match read_header(&content.main) {
            Ok(header) => {
                if header.header_len + header.len_bytes as usize > content.main.len() {
                    Identification::no("declared body length exceeds file size")
                } else {
                    Identification::yes("DBRAWOPL signature and version match")
                }
            }
            Err(Error::BadSignature { .. }) => Identification::no("missing DBRAWOPL signature"),
            Err(e) => Identification::no(format!("malformed header: {e}")),
        }
    }

    fn parse(&self, content: &Content) -> Result<Music> {
        let header = read_header(&content.main)?;
        let body_start = header.header_len;
        let body_end = (body_start + header.len_bytes as usize).min(content.main.len());
        let raw = &content.main[body_start..body_end];
        let rest = &content.main[body_end..];
        let tag = io::parse_tag_block_exact(rest);
        tracing::trace!(flag_hw = header.flag_hw, len_ms = header.len_ms, "dro header");

        let items = decode_body(raw)?;
        let parsed = parse(Tempo::new(4, 4, 192, 1, 1_000_000.0 / HZ as f64), items)?;
        let tags = tag
            .map(|t| Tags {
                title: Some(t.title).filter(|s| !s.is_empty()),
                artist: Some(t.artist).filter(|s| !s.is_empty()),
                comment: Some(t.comment).filter(|s| !s.is_empty()),
            })
            .unwrap_or_default();
        Ok(Music::from_opl_parse(parsed, tags))
    }

    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)> {
        let mut warnings = Vec::new();
        if music.pattern_sequence.len() > 1 || music.loop_dest.is_some() {
            warnings.push("pattern sequencing and looping are not representable in DRO; only the first pattern is written".into());
        }
        let pattern_index = music.pattern_sequence.first().copied().unwrap_or(0);
        let (events, track_indices) = music.merged_pattern(pattern_index);
        let target_us_per_tick = 1_000_000.0 / HZ as f64;
        let (events, track_indices) = retime_to_fixed_tempo(&events, &track_indices, music.initial_tempo, target_us_per_tick);

        let tracked: Vec<opl_core::TrackedEvent> = events
            .iter()
            .zip(track_indices.iter())
            .map(|(event, &track)| opl_core::TrackedEvent { event, track })
            .collect();
        let track_config: Vec<opl_core::TrackConfig> = music
            .track_config
            .iter()
            .map(|tk| match tk {
                crate::music::TrackKind::Opl(tc) => *tc,
                crate::music::TrackKind::Midi { .. } => opl_core::TrackConfig::Oplt { channel: 0 },
            })
            .collect();
        let out = opl_core::generate(&tracked, &track_config, &music.patches)?;
        warnings.extend(out.warnings.into_messages());

        let (body, len_ms) = encode_body(&out.items);
        let mut bytes = write_header(len_ms, body.len() as u32);
        bytes.extend_from_slice(&body);

        if let Some(title) = &music.tags.title {
            let tag = TagBlock {
                title: title.clone(),
                artist: music.tags.artist.clone().unwrap_or_default(),
                comment: music.tags.comment.clone().unwrap_or_default(),
                app: io::DEFAULT_APP_ID.to_string(),
            };
            bytes.extend_from_slice(&io::write_tag_block(&tag));
        }

        Ok((Content::from_bytes(bytes), warnings))
    }

    fn check_limits(&self, _music: &Music) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_body() -> Vec<u8> {
        vec![
            0x20, 0x01, // reg 0x20 = 0x01
            0x00, 0x09, // delay 10 ms
            0xB0, 0x20, // reg 0xB0 = 0x20 (keyon)
            0x00, 0x09, // delay 10 ms
            0xB0, 0x00, // keyoff
        ]
    }

    fn wrap(body: &[u8]) -> Vec<u8> {
        let mut bytes = write_header(20, body.len() as u32);
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn identify_accepts_valid_signature() {
        let content = Content::from_bytes(wrap(&sample_body()));
        let id = Dro.identify(&content, "song.dro");
        assert_eq!(id.valid, crate::handler::Validity::Yes);
    }

    #[test]
    fn identify_rejects_missing_signature() {
        let content = Content::from_bytes(vec![0; 32]);
        let id = Dro.identify(&content, "song.dro");
        assert_eq!(id.valid, crate::handler::Validity::No);
    }

    #[test]
    fn legacy_u8_flaghw_is_detected_and_rewound() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SIGNATURE.as_bytes());
        io::write_u16le(&mut bytes, 0);
        io::write_u16le(&mut bytes, 1);
        io::write_u32le(&mut bytes, 20);
        io::write_u32le(&mut bytes, sample_body().len() as u32);
        bytes.push(0); // one-byte flagHW
        bytes.extend_from_slice(&sample_body());
        let header = read_header(&bytes).unwrap();
        assert_eq!(header.flag_hw, 0);
        assert_eq!(&bytes[header.header_len..header.header_len + sample_body().len()], sample_body().as_slice());
    }

    #[test]
    fn parse_then_generate_preserves_note_count() {
        let content = Content::from_bytes(wrap(&sample_body()));
        let music = Dro.parse(&content).unwrap();
        music.validate().unwrap();
        let (regenerated, _warnings) = Dro.generate(&music).unwrap();
        let reparsed = Dro.parse(&regenerated).unwrap();
        assert_eq!(reparsed.track_config.len(), music.track_config.len());
    }

    #[test]
    fn bank_switch_opcode_round_trips_upper_bank_register() {
        let items = vec![
            OplItem::Reg { reg: 0x105, val: 0x01 },
            OplItem::Delay { ticks: 5 },
        ];
        let (body, _ms) = encode_body(&items);
        let decoded = decode_body(&body).unwrap();
        assert_eq!(decoded, items);
    }
}
