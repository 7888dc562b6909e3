//! IMF/WLF: the id Software register-log family (spec §6).
//!
//! Type-0 is a bare run of 4-byte `(reg, val, delay)` records at a fixed
//! hardware rate implied by the game, not the file. Type-1 prefixes the
//! same records with a `u16le` body length. Three type-0 variants (IMF
//! 560 Hz, WLF 700 Hz, Duke Nukem II's 280 Hz) and two type-1 variants
//! share one body codec, parameterized by tempo and glob.

use opl_core::{parse, ChipState, OplItem, Tempo};

use crate::error::{Error, Result};
use crate::handler::{Content, FormatCaps, FormatHandler, FormatMetadata, Identification};
use crate::io::{self, TagBlock};
use crate::music::{Music, Tags};
use crate::tracks::retime_to_fixed_tempo;

const RECORD_LEN: usize = 4;

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

fn decode_records(body: &[u8]) -> Result<Vec<OplItem>> {
    if body.len() % RECORD_LEN != 0 {
        return Err(Error::TruncatedInput { expected: RECORD_LEN - body.len() % RECORD_LEN });
    }
    let mut items = Vec::with_capacity(body.len() / RECORD_LEN);
    let mut pos = 0;
    while pos < body.len() {
        let reg = io::read_u8(body, &mut pos)? as u16;
        let val = io::read_u8(body, &mut pos)?;
        let delay = io::read_u16le(body, &mut pos)?;
        items.push(OplItem::Reg { reg, val });
        if delay > 0 {
            items.push(OplItem::Delay { ticks: delay as u32 });
        }
    }
    Ok(items)
}

fn encode_records(items: &[OplItem]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() * RECORD_LEN);
    let mut pending_delay: u32 = 0;
    for item in items {
        match item {
            OplItem::Reg { reg, val } => {
                out.push(*reg as u8);
                out.push(*val);
                io::write_u16le(&mut out, pending_delay.min(0xFFFF) as u16);
                pending_delay = 0;
            }
            OplItem::Delay { ticks } => pending_delay += ticks,
            OplItem::Tempo(_) => {}
        }
    }
    if pending_delay > 0 {
        // A trailing delay with no following register write: represent it
        // as a no-op register-0 write carrying the remaining ticks.
        out.push(0);
        out.push(0);
        io::write_u16le(&mut out, pending_delay.min(0xFFFF) as u16);
    }
    out
}

fn registers_look_sane(body: &[u8]) -> bool {
    if body.len() % RECORD_LEN != 0 {
        return false;
    }
    for (i, chunk) in body.chunks(RECORD_LEN).enumerate() {
        let reg = chunk[0] as u16;
        let delay = u16::from_le_bytes([chunk[2], chunk[3]]);
        if reg == 0 && i == 0 {
            continue;
        }
        if !ChipState::is_valid_register(reg) {
            return false;
        }
        if delay >= 0x8000 {
            return false;
        }
    }
    true
}

fn matches_glob(filename: &str, globs: &[&str]) -> bool {
    let lower = filename.to_ascii_lowercase();
    globs.iter().any(|g| {
        let ext = g.trim_start_matches("*.");
        lower.ends_with(&format!(".{ext}"))
    })
}

fn items_to_music(items: Vec<OplItem>, tempo: Tempo, tag: Option<TagBlock>) -> Result<Music> {
    let parsed = parse(tempo, items)?;
    let tags = tag
        .map(|t| Tags {
            title: Some(t.title).filter(|s| !s.is_empty()),
            artist: Some(t.artist).filter(|s| !s.is_empty()),
            comment: Some(t.comment).filter(|s| !s.is_empty()),
        })
        .unwrap_or_default();
    Ok(Music::from_opl_parse(parsed, tags))
}

fn music_to_content(music: &Music, hz: u32, extra_header: impl FnOnce(&mut Vec<u8>, &[u8])) -> Result<(Content, Vec<String>)> {
    let mut warnings = Vec::new();
    if music.pattern_sequence.len() > 1 || music.loop_dest.is_some() {
        warnings.push("pattern sequencing and looping are not representable in this format; only the first pattern is written".into());
    }
    let pattern_index = music.pattern_sequence.first().copied().unwrap_or(0);
    let (events, track_indices) = music.merged_pattern(pattern_index);
    let target_us_per_tick = 1_000_000.0 / hz as f64;
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

    let body = encode_records(&out.items);
    let mut bytes = Vec::new();
    extra_header(&mut bytes, &body);
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

/// A type-0 IMF/WLF variant: no header, just records and an optional tag.
pub struct ImfType0 {
    id: &'static str,
    title: &'static str,
    games: &'static [&'static str],
    globs: &'static [&'static str],
    hz: u32,
}

impl ImfType0 {
    pub fn standard() -> Self {
        ImfType0 { id: "imf-type0", title: "id Software IMF (type-0, 560 Hz)", games: &["Commander Keen"], globs: &["*.imf"], hz: 560 }
    }
    pub fn wolfenstein() -> Self {
        ImfType0 { id: "wlf-type0", title: "Wolfenstein 3D IMF (type-0, 700 Hz)", games: &["Wolfenstein 3D"], globs: &["*.wlf"], hz: 700 }
    }
    pub fn duke_nukem_2() -> Self {
        ImfType0 { id: "imf-nukem2", title: "Duke Nukem II IMF (type-0, 280 Hz)", games: &["Duke Nukem II"], globs: &["*.imf"], hz: 280 }
    }
}

impl FormatHandler for ImfType0 {
    fn metadata(&self) -> FormatMetadata {
        FormatMetadata {
            id: self.id.into(),
            title: self.title.into(),
            games: self.games.iter().map(|s| s.to_string()).collect(),
            glob: self.globs.iter().map(|s| s.to_string()).collect(),
            caps: caps(),
        }
    }

    fn identify(&self, content: &Content, filename: &str) -> Identification {
        let (body, _tag) = io::split_body_and_tag(&content.main, RECORD_LEN);
        if body.is_empty() && content.main.is_empty() {
            return Identification::no("empty file");
        }
        if !registers_look_sane(body) {
            return Identification::no("body is not a sequence of valid 4-byte OPL records");
        }
        if matches_glob(filename, self.globs) {
            Identification::yes("valid type-0 record stream and filename extension matches")
        } else {
            Identification::maybe("valid type-0 record stream, but tempo variant is not determinable from content alone")
        }
    }

    fn parse(&self, content: &Content) -> Result<Music> {
        let (body, tag) = io::split_body_and_tag(&content.main, RECORD_LEN);
        let items = decode_records(body)?;
        items_to_music(items, Tempo::new(4, 4, 192, 1, 1_000_000.0 / self.hz as f64), tag)
    }

    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)> {
        music_to_content(music, self.hz, |_header, _body| {})
    }

    fn check_limits(&self, music: &Music) -> Vec<String> {
        let mut issues = Vec::new();
        if music.patches.is_empty() && music.patterns.iter().any(|p| !p.iter().all(Vec::is_empty)) {
            issues.push("no patches defined but patterns contain notes".into());
        }
        issues
    }
}

/// A type-1 IMF/WLF variant: `u16le` body-length header precedes the
/// records.
pub struct ImfType1 {
    id: &'static str,
    title: &'static str,
    games: &'static [&'static str],
    globs: &'static [&'static str],
    hz: u32,
}

impl ImfType1 {
    pub fn standard() -> Self {
        ImfType1 { id: "imf-type1", title: "id Software IMF (type-1, 560 Hz)", games: &["Commander Keen"], globs: &["*.imf"], hz: 560 }
    }
    pub fn wolfenstein() -> Self {
        ImfType1 { id: "wlf-type1", title: "Wolfenstein 3D IMF (type-1, 700 Hz)", games: &["Wolfenstein 3D"], globs: &["*.wlf"], hz: 700 }
    }
}

impl FormatHandler for ImfType1 {
    fn metadata(&self) -> FormatMetadata {
        FormatMetadata {
            id: self.id.into(),
            title: self.title.into(),
            games: self.games.iter().map(|s| s.to_string()).collect(),
            glob: self.globs.iter().map(|s| s.to_string()).collect(),
            caps: caps(),
        }
    }

    fn identify(&self, content: &Content, filename: &str) -> Identification {
        if content.main.len() < 2 {
            return Identification::no("too short to hold a body-length header");
        }
        let mut pos = 0;
        let body_len = match io::read_u16le(&content.main, &mut pos) {
            Ok(v) => v as usize,
            Err(_) => return Identification::no("truncated header"),
        };
        let Some(raw) = content.main.get(2..2 + body_len) else {
            return Identification::no("declared body length exceeds file size");
        };
        if !registers_look_sane(raw) {
            return Identification::no("header body length doesn't bound a valid record stream");
        }
        if matches_glob(filename, self.globs) {
            Identification::yes("body-length header checks out and filename extension matches")
        } else {
            Identification::maybe("body-length header checks out, but tempo variant is not determinable from content alone")
        }
    }

    fn parse(&self, content: &Content) -> Result<Music> {
        let mut pos = 0;
        let body_len = io::read_u16le(&content.main, &mut pos)? as usize;
        let raw = io::read_exact(&content.main, &mut pos, body_len)?;
        let tag = io::parse_tag_block_exact(&content.main[pos..]);
        let items = decode_records(raw)?;
        items_to_music(items, Tempo::new(4, 4, 192, 1, 1_000_000.0 / self.hz as f64), tag)
    }

    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)> {
        music_to_content(music, self.hz, |header, body| {
            io::write_u16le(header, body.len().min(0xFFFF) as u16);
        })
    }

    fn check_limits(&self, music: &Music) -> Vec<String> {
        let mut issues = Vec::new();
        let body_len: usize = music
            .patterns
            .iter()
            .flat_map(|p| p.iter())
            .map(|track| track.len() * RECORD_LEN)
            .sum();
        if body_len > 0xFFFF {
            issues.push(format!("body length {body_len} exceeds the type-1 u16le header's range"));
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw_stream() -> Vec<u8> {
        vec![
            0x01, 0x20, 0x00, 0x00, // reg write, no delay
            0xB0, 0x20, 0x0A, 0x00, // keyon, delay 10
            0xB0, 0x00, 0x00, 0x00, // keyoff
        ]
    }

    #[test]
    fn type0_identify_accepts_sane_stream() {
        let handler = ImfType0::standard();
        let content = Content::from_bytes(raw_stream());
        let id = handler.identify(&content, "song.imf");
        assert_eq!(id.valid, crate::handler::Validity::Yes);
    }

    #[test]
    fn type0_identify_rejects_bad_length() {
        let handler = ImfType0::standard();
        let mut bytes = raw_stream();
        bytes.push(0xFF);
        let content = Content::from_bytes(bytes);
        let id = handler.identify(&content, "song.imf");
        assert_eq!(id.valid, crate::handler::Validity::No);
    }

    #[test]
    fn type0_parse_produces_one_note() {
        let handler = ImfType0::standard();
        let content = Content::from_bytes(raw_stream());
        let music = handler.parse(&content).unwrap();
        assert_eq!(music.track_config.len(), 1);
        music.validate().unwrap();
    }

    #[test]
    fn type0_generate_round_trips_note_count() {
        let handler = ImfType0::standard();
        let content = Content::from_bytes(raw_stream());
        let music = handler.parse(&content).unwrap();
        let (regenerated, warnings) = handler.generate(&music).unwrap();
        assert!(warnings.is_empty() || warnings.iter().all(|w| !w.contains("exceeds")));
        let reparsed = handler.parse(&regenerated).unwrap();
        assert_eq!(reparsed.track_config.len(), music.track_config.len());
    }

    #[test]
    fn type1_identify_rejects_oversized_header() {
        let handler = ImfType1::standard();
        let mut bytes = vec![0xFF, 0xFF]; // claims 65535 bytes of body
        bytes.extend_from_slice(&raw_stream());
        let content = Content::from_bytes(bytes);
        let id = handler.identify(&content, "song.imf");
        assert_eq!(id.valid, crate::handler::Validity::No);
    }

    #[test]
    fn type1_parse_reads_header_bounded_body() {
        let handler = ImfType1::standard();
        let body = raw_stream();
        let mut bytes = Vec::new();
        io::write_u16le(&mut bytes, body.len() as u16);
        bytes.extend_from_slice(&body);
        let content = Content::from_bytes(bytes);
        let music = handler.parse(&content).unwrap();
        music.validate().unwrap();
    }
}
