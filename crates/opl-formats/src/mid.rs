//! MID type-1: a Standard MIDI File, one track per channel plus a leading
//! tempo/meta track (spec §6). The wire codec itself — VLQ, running
//! status, the velocity-0 NoteOff trick — lives in `opl_core::midi`; this
//! module is just `MThd`/`MTrk` chunk framing plus the channel split a
//! multi-track SMF needs that a single flat event stream doesn't have.

use opl_core::midi::{decode_track, encode_track, from_events, lower_tempo_events, to_events, MidiEvent, TimedMidiEvent};
use opl_core::{Event, Origin, Patch, Tempo};

use crate::error::{Error, Result};
use crate::handler::{Content, FormatCaps, FormatHandler, FormatMetadata, Identification};
use crate::io;
use crate::music::{Music, Tags, TrackKind};
use crate::tracks::{merge_tracks, push_with_delay};

const HEADER_TAG: &[u8; 4] = b"MThd";
const TRACK_TAG: &[u8; 4] = b"MTrk";
const DEFAULT_DIVISION: u16 = 192;
const DEFAULT_US_PER_QUARTER: f64 = 500_000.0;

fn caps() -> FormatCaps {
    FormatCaps {
        channel_map: (0..16).map(|c| format!("MIDI channel {c}")).collect(),
        tags: false,
        supported_events: vec![
            "Tempo".into(),
            "Delay".into(),
            "NoteOn".into(),
            "NoteOff".into(),
            "Effect".into(),
        ],
        patch_names: false,
    }
}

fn read_chunk<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<(&'a [u8], &'a [u8])> {
    let tag = io::read_exact(bytes, pos, 4)?;
    let len = io::read_u32be(bytes, pos)? as usize;
    let body = io::read_exact(bytes, pos, len)?;
    Ok((tag, body))
}

fn track_order(origins: &[Origin]) -> Vec<u8> {
    let mut channels = std::collections::BTreeSet::new();
    for o in origins {
        if let Origin::Channel(c) = o {
            channels.insert(*c);
        }
    }
    channels.into_iter().collect()
}

/// Channel-only counterpart to [`crate::tracks::split_into_tracks`]: a MID
/// file has no rhythm-mode origins, so the split is just "one track per
/// channel that plays a note, plus a leading tempo/meta track". A song
/// that only changes `Tempo`/`Configuration` and never sounds a note on
/// any channel still needs that leading track, so one is allocated with a
/// stand-in `Midi { channel: 0 }` config in that case; it never receives
/// a `NoteOn`/`NoteOff` (`channel` is ignored entirely by `from_events`
/// for those two event kinds, so the placeholder is never observable).
fn split_into_midi_tracks(events: &[Event], origins: &[Origin]) -> (Vec<TrackKind>, Vec<Vec<Event>>) {
    let order = track_order(origins);
    let has_globals = events
        .iter()
        .any(|e| matches!(e, Event::Tempo(_) | Event::Configuration { .. }));
    if order.is_empty() && !has_globals {
        return (Vec::new(), Vec::new());
    }

    let track_config: Vec<TrackKind> = if order.is_empty() {
        vec![TrackKind::Midi { channel: 0 }]
    } else {
        order.iter().map(|&channel| TrackKind::Midi { channel }).collect()
    };
    let mut tracks: Vec<Vec<Event>> = vec![Vec::new(); track_config.len()];
    let mut last_flushed: Vec<u64> = vec![0; track_config.len()];
    let mut now: u64 = 0;

    for (event, origin) in events.iter().zip(origins.iter()) {
        match event {
            Event::Delay { ticks } => now += *ticks as u64,
            Event::Tempo(_) | Event::Configuration { .. } => {
                push_with_delay(&mut tracks[0], &mut last_flushed[0], now, event.clone());
            }
            _ => {
                if let Origin::Channel(c) = origin {
                    if let Some(idx) = order.iter().position(|x| x == c) {
                        push_with_delay(&mut tracks[idx], &mut last_flushed[idx], now, event.clone());
                    }
                }
            }
        }
    }

    for (idx, track) in tracks.iter_mut().enumerate() {
        let pending = now - last_flushed[idx];
        if pending > 0 {
            track.push(Event::Delay { ticks: pending as u32 });
        }
    }

    (track_config, tracks)
}

/// Merge every `MTrk`'s independently-timed events into one absolute-time
/// stream, dropping each track's own end-of-track marker so `to_events`
/// doesn't stop at the first (possibly very short) track.
fn merge_smf_tracks(tracks: Vec<Vec<TimedMidiEvent>>) -> Vec<TimedMidiEvent> {
    let mut absolute: Vec<(u64, MidiEvent)> = Vec::new();
    for track in tracks {
        let mut time: u64 = 0;
        for te in track {
            time += te.delta as u64;
            if matches!(te.event, MidiEvent::Meta { kind: 0x2F, .. }) {
                continue;
            }
            absolute.push((time, te.event));
        }
    }
    absolute.sort_by_key(|(t, _)| *t);

    let mut out = Vec::with_capacity(absolute.len() + 1);
    let mut last = 0u64;
    for (time, event) in absolute {
        out.push(TimedMidiEvent { delta: (time - last) as u32, event });
        last = time;
    }
    out.push(TimedMidiEvent { delta: 0, event: MidiEvent::Meta { kind: 0x2F, data: Vec::new() } });
    out
}

/// Inverse of [`merge_smf_tracks`]: bucket a flat event stream by channel
/// (tempo/meta events all land on a leading track) and give each bucket
/// its own deltas and end-of-track marker.
fn split_for_smf(flat: Vec<TimedMidiEvent>) -> Vec<Vec<TimedMidiEvent>> {
    let mut time: u64 = 0;
    let mut buckets: std::collections::BTreeMap<Option<u8>, Vec<(u64, MidiEvent)>> = std::collections::BTreeMap::new();

    for te in flat {
        time += te.delta as u64;
        let key = match &te.event {
            MidiEvent::Tempo(_) => None,
            MidiEvent::Meta { kind: 0x2F, .. } => continue,
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::NotePressure { channel, .. }
            | MidiEvent::Controller { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => Some(*channel),
            MidiEvent::Meta { .. } | MidiEvent::SysEx { .. } => None,
        };
        buckets.entry(key).or_default().push((time, te.event));
    }

    let mut tracks = Vec::with_capacity(buckets.len());
    let tempo_track = buckets.remove(&None).unwrap_or_default();
    tracks.push(to_smf_track(tempo_track));
    for (_channel, events) in buckets {
        tracks.push(to_smf_track(events));
    }
    tracks
}

fn to_smf_track(events: Vec<(u64, MidiEvent)>) -> Vec<TimedMidiEvent> {
    let mut out = Vec::with_capacity(events.len() + 1);
    let mut last = 0u64;
    for (time, event) in events {
        out.push(TimedMidiEvent { delta: (time - last) as u32, event });
        last = time;
    }
    out.push(TimedMidiEvent { delta: 0, event: MidiEvent::Meta { kind: 0x2F, data: Vec::new() } });
    out
}

/// Standard MIDI File, format 1 (one tempo track plus one track per
/// channel in use).
pub struct MidType1;

impl FormatHandler for MidType1 {
    fn metadata(&self) -> FormatMetadata {
        FormatMetadata {
            id: "mid-type1".into(),
            title: "Standard MIDI File (type 1)".into(),
            games: vec!["General MIDI".into()],
            glob: vec!["*.mid".into(), "*.midi".into()],
            caps: caps(),
        }
    }

    fn identify(&self, content: &Content, _filename: &str) -> Identification {
        let bytes = &content.main;
        if bytes.len() < 14 || &bytes[0..4] != HEADER_TAG.as_slice() {
            return Identification::no("missing MThd signature");
        }
        let mut pos = 4;
        let header_len = match io::read_u32be(bytes, &mut pos) {
            Ok(v) => v,
            Err(_) => return Identification::no("truncated MThd length"),
        };
        if header_len != 6 {
            return Identification::no("MThd length is not 6");
        }
        let format = match io::read_u16be(bytes, &mut pos) {
            Ok(v) => v,
            Err(_) => return Identification::no("truncated format field"),
        };
        match format {
            1 => Identification::yes("MThd declares format 1"),
            0 => Identification::maybe("MThd declares format 0, which this handler can still decode"),
            other => Identification::no(format!("unsupported SMF format {other}")),
        }
    }

    fn parse(&self, content: &Content) -> Result<Music> {
        let bytes = &content.main;
        let mut pos = 0;
        let (tag, header) = read_chunk(bytes, &mut pos)?;
        if tag != HEADER_TAG.as_slice() {
            return Err(Error::BadSignature {
                expected: "MThd",
                found: String::from_utf8_lossy(tag).into_owned(),
            });
        }
        if header.len() != 6 {
            return Err(Error::UnsupportedVersion(format!("MThd length {}", header.len())));
        }
        let mut hpos = 2; // skip format field, we decode either 0 or 1 the same way
        let ntrks = io::read_u16be(header, &mut hpos)?;
        let division = io::read_u16be(header, &mut hpos)?;
        if division & 0x8000 != 0 {
            return Err(Error::UnsupportedVersion("SMPTE-based division is not supported".into()));
        }

        let mut decoded_tracks = Vec::with_capacity(ntrks as usize);
        while pos < bytes.len() {
            let (tag, body) = read_chunk(bytes, &mut pos)?;
            if tag == TRACK_TAG.as_slice() {
                decoded_tracks.push(decode_track(body)?);
            }
        }

        let merged = merge_smf_tracks(decoded_tracks);
        let (events, origins, patches) = to_events(&merged)?;

        let division = if division == 0 { DEFAULT_DIVISION } else { division };
        let default_tempo = Tempo::new(4, 4, division as u32, 1, DEFAULT_US_PER_QUARTER / division as f64);
        let initial_tempo = match events.first() {
            Some(Event::Tempo(t)) => *t,
            _ => default_tempo,
        };
        let (track_config, tracks) = split_into_midi_tracks(&events, &origins);
        Ok(Music::linear(initial_tempo, patches, track_config, tracks, Tags::default()))
    }

    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)> {
        let mut warnings = Vec::new();
        if music.pattern_sequence.len() > 1 || music.loop_dest.is_some() {
            warnings.push("pattern sequencing and looping are not representable in a Standard MIDI File; only the first pattern is written".into());
        }
        let pattern_index = music.pattern_sequence.first().copied().unwrap_or(0);
        let (events, track_indices) = music.merged_pattern(pattern_index);

        let origins: Vec<Origin> = track_indices
            .iter()
            .map(|&t| match music.track_config.get(t) {
                Some(TrackKind::Midi { channel }) => Origin::Channel(*channel),
                _ => Origin::Global,
            })
            .collect();

        let flat = from_events(&events, &origins, &music.patches);
        let flat = lower_tempo_events(flat);
        let smf_tracks = split_for_smf(flat);

        let ntrks = smf_tracks.len() as u16;
        if smf_tracks.len() > 0xFFFF {
            return Err(Error::InvalidMusic(format!("{} tracks exceeds the u16le MThd track count", smf_tracks.len())));
        }
        let division = (music.initial_tempo.ticks_per_quarter_note().min(0x7FFF as u32)) as u16;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(HEADER_TAG);
        io::write_u32be(&mut bytes, 6);
        io::write_u16be(&mut bytes, 1);
        io::write_u16be(&mut bytes, ntrks);
        io::write_u16be(&mut bytes, division);

        for track in &smf_tracks {
            let body = encode_track(track);
            bytes.extend_from_slice(TRACK_TAG);
            io::write_u32be(&mut bytes, body.len() as u32);
            bytes.extend_from_slice(&body);
        }

        Ok((Content::from_bytes(bytes), warnings))
    }

    fn check_limits(&self, music: &Music) -> Vec<String> {
        let mut issues = Vec::new();
        if music.track_config.len() + 1 > 0xFFFF {
            issues.push(format!("{} channel tracks plus the tempo track exceeds the u16le MThd track count", music.track_config.len()));
        }
        issues
    }
}
