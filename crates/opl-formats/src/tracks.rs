//! The "event splitter / track assigner" and its inverse "merge-and-retime"
//! step named in the data-flow diagram (spec §2): translating between the
//! flat, origin-tagged stream `opl_core::parse` emits and the per-track
//! event lists [`crate::music::Music`] stores.
//!
//! Global events (`Tempo`, `Configuration`) ride on the first track, the
//! same convention a type-1 Standard MIDI File uses for its tempo map.

use opl_core::{Event, Origin, Patch, Rhythm, Tempo, TrackConfig};

use crate::music::TrackKind;

fn track_order(origins: &[Origin]) -> Vec<Origin> {
    let mut channels = std::collections::BTreeSet::new();
    let mut rhythms: Vec<Rhythm> = Vec::new();
    for origin in origins {
        match origin {
            Origin::Channel(c) => {
                channels.insert(*c);
            }
            Origin::Rhythm(r) => {
                if !rhythms.contains(r) {
                    rhythms.push(*r);
                }
            }
            Origin::Global => {}
        }
    }
    let mut order: Vec<Origin> = channels.into_iter().map(Origin::Channel).collect();
    for r in [Rhythm::Bd, Rhythm::Sd, Rhythm::Tt, Rhythm::Cy, Rhythm::Hh] {
        if rhythms.contains(&r) {
            order.push(Origin::Rhythm(r));
        }
    }
    order
}

fn is_four_op(origin: Origin, events: &[Event], origins: &[Origin], patches: &[Patch]) -> bool {
    events.iter().zip(origins.iter()).any(|(event, o)| {
        *o == origin
            && matches!(event, Event::NoteOn { instrument_index, .. }
                if matches!(
                    patches.get(*instrument_index as usize),
                    Some(Patch::Opl(p)) if p.slots[2].is_some() || p.slots[3].is_some()
                ))
    })
}

fn track_kind_for(origin: Origin, events: &[Event], origins: &[Origin], patches: &[Patch]) -> TrackKind {
    match origin {
        Origin::Channel(channel) => {
            if is_four_op(origin, events, origins, patches) {
                TrackKind::Opl(TrackConfig::Oplf { channel })
            } else {
                TrackKind::Opl(TrackConfig::Oplt { channel })
            }
        }
        Origin::Rhythm(drum) => TrackKind::Opl(TrackConfig::Oplr { drum }),
        Origin::Global => unreachable!("a global origin is never its own track"),
    }
}

pub(crate) fn push_with_delay(track: &mut Vec<Event>, last_flushed: &mut u64, now: u64, event: Event) {
    let pending = now - *last_flushed;
    if pending > 0 {
        track.push(Event::Delay { ticks: pending as u32 });
    }
    track.push(event);
    *last_flushed = now;
}

/// Split a flat, origin-tagged event stream into one track per channel or
/// rhythm voice that actually carries a note, each with its own local
/// `Delay` events. Channels sort ascending; rhythm tracks follow in
/// BD/SD/TT/CY/HH order. `Tempo`/`Configuration` events always ride on
/// track 0, even when no channel or rhythm voice ever sounds a note — a
/// stand-in `Oplt { channel: 0 }` track config is allocated for it in that
/// case, the same placeholder `imf.rs`/`dro.rs` already use for a track
/// that carries no real voice; it never receives a `NoteOn`/`NoteOff`.
pub fn split_into_tracks(
    events: &[Event],
    origins: &[Origin],
    patches: &[Patch],
) -> (Vec<TrackKind>, Vec<Vec<Event>>) {
    let order = track_order(origins);
    let has_globals = events
        .iter()
        .any(|e| matches!(e, Event::Tempo(_) | Event::Configuration { .. }));
    if order.is_empty() && !has_globals {
        return (Vec::new(), Vec::new());
    }

    let track_config: Vec<TrackKind> = if order.is_empty() {
        vec![TrackKind::Opl(TrackConfig::Oplt { channel: 0 })]
    } else {
        order.iter().map(|o| track_kind_for(*o, events, origins, patches)).collect()
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
                if let Some(idx) = order.iter().position(|o| o == origin) {
                    push_with_delay(&mut tracks[idx], &mut last_flushed[idx], now, event.clone());
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

/// Merge per-track event lists back into one flat stream tagged by track
/// index, synchronizing each track's independent `Delay` events against a
/// shared clock. Inverse of [`split_into_tracks`].
pub fn merge_tracks(tracks: &[Vec<Event>]) -> (Vec<Event>, Vec<usize>) {
    let n = tracks.len();
    let mut cursor = vec![0usize; n];
    let mut pending = vec![0u32; n];
    let mut out_events = Vec::new();
    let mut out_tracks = Vec::new();

    loop {
        let mut drained_any = true;
        while drained_any {
            drained_any = false;
            for i in 0..n {
                if pending[i] == 0 {
                    if let Some(event) = tracks[i].get(cursor[i]) {
                        match event {
                            Event::Delay { ticks } => pending[i] = *ticks,
                            other => {
                                out_events.push(other.clone());
                                out_tracks.push(i);
                                cursor[i] += 1;
                                drained_any = true;
                            }
                        }
                    }
                }
            }
        }

        let min_pending = (0..n).filter(|&i| pending[i] > 0).map(|i| pending[i]).min();
        match min_pending {
            Some(step) => {
                out_events.push(Event::Delay { ticks: step });
                out_tracks.push(0);
                for i in 0..n {
                    if pending[i] > 0 {
                        pending[i] -= step;
                        if pending[i] == 0 {
                            cursor[i] += 1;
                        }
                    }
                }
            }
            None => break,
        }
    }

    (out_events, out_tracks)
}

/// Same retiming [`opl_core::fixed_tempo`] does, adapted to the
/// `(events, track indices)` shape [`merge_tracks`] produces instead of
/// the core codec's `(events, origins)`. Fixed-rate formats (IMF, WLF,
/// DRO) need this before generating, since they have nowhere to put a
/// mid-song tempo change.
pub fn retime_to_fixed_tempo(
    events: &[Event],
    track_indices: &[usize],
    initial_tempo: Tempo,
    target_us_per_tick: f64,
) -> (Vec<Event>, Vec<usize>) {
    let mut factor = initial_tempo.us_per_tick() / target_us_per_tick;
    let mut out_events = Vec::with_capacity(events.len());
    let mut out_tracks = Vec::with_capacity(track_indices.len());

    for (event, &track) in events.iter().zip(track_indices.iter()) {
        match event {
            Event::Tempo(tempo) => {
                factor = tempo.us_per_tick() / target_us_per_tick;
            }
            Event::Delay { ticks } => {
                let scaled = (*ticks as f64 * factor).round() as u32;
                out_events.push(Event::Delay { ticks: scaled });
                out_tracks.push(track);
            }
            other => {
                out_events.push(other.clone());
                out_tracks.push(track);
            }
        }
    }

    (out_events, out_tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opl_core::{Connection, OplPatch, Rhythm as R};
    use pretty_assertions::assert_eq;

    fn note_on(idx: u32) -> Event {
        Event::NoteOn {
            frequency_hz: 440.0,
            velocity: 1.0,
            instrument_index: idx,
        }
    }

    fn two_op_patch() -> Patch {
        Patch::Opl(OplPatch {
            slots: [
                Some(opl_core::OperatorParams {
                    tremolo: false,
                    vibrato: false,
                    sustain: false,
                    ksr: false,
                    freq_mult: 1,
                    scale_level: 0,
                    output_level: 10,
                    attack_rate: 4,
                    decay_rate: 4,
                    sustain_rate: 4,
                    release_rate: 4,
                    wave_select: 0,
                }),
                None,
                None,
                None,
            ],
            feedback: 0,
            connection: Connection::Fm,
            rhythm: R::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        })
    }

    #[test]
    fn split_and_merge_round_trips_two_channels() {
        let patches = vec![two_op_patch()];
        let events = vec![
            Event::Tempo(opl_core::Tempo::default()),
            note_on(0),
            Event::Delay { ticks: 5 },
            Event::NoteOff,
            note_on(0),
            Event::Delay { ticks: 5 },
            Event::NoteOff,
        ];
        let origins = vec![
            Origin::Global,
            Origin::Channel(0),
            Origin::Global,
            Origin::Channel(0),
            Origin::Channel(1),
            Origin::Global,
            Origin::Channel(1),
        ];
        let (track_config, tracks) = split_into_tracks(&events, &origins, &patches);
        assert_eq!(
            track_config,
            vec![
                TrackKind::Opl(TrackConfig::Oplt { channel: 0 }),
                TrackKind::Opl(TrackConfig::Oplt { channel: 1 }),
            ]
        );
        assert_eq!(tracks.len(), 2);

        let (merged_events, merged_tracks) = merge_tracks(&tracks);
        assert_eq!(merged_events.len(), events.len());
        assert_eq!(merged_tracks.len(), events.len());

        let total_ticks: u32 = merged_events
            .iter()
            .filter_map(|e| match e {
                Event::Delay { ticks } => Some(*ticks),
                _ => None,
            })
            .sum();
        assert_eq!(total_ticks, 10);
    }

    #[test]
    fn rhythm_tracks_sort_in_bd_sd_tt_cy_hh_order() {
        let events = vec![note_on(0), note_on(0), note_on(0)];
        let origins = vec![Origin::Rhythm(R::Hh), Origin::Rhythm(R::Bd), Origin::Rhythm(R::Sd)];
        let patches = vec![Patch::Midi { bank: 0, program: 0 }];
        let (track_config, _tracks) = split_into_tracks(&events, &origins, &patches);
        assert_eq!(
            track_config,
            vec![
                TrackKind::Opl(TrackConfig::Oplr { drum: R::Bd }),
                TrackKind::Opl(TrackConfig::Oplr { drum: R::Sd }),
                TrackKind::Opl(TrackConfig::Oplr { drum: R::Hh }),
            ]
        );
    }

    #[test]
    fn global_only_stream_still_gets_a_track_for_tempo_and_configuration() {
        let events = vec![
            Event::Tempo(opl_core::Tempo::default()),
            Event::Delay { ticks: 3 },
            Event::Configuration { option: opl_core::ConfigOption::Rhythm, value: true },
            Event::Delay { ticks: 4 },
            Event::Tempo(opl_core::Tempo::new(4, 4, 192, 1, 2_000.0)),
        ];
        let origins = vec![Origin::Global; events.len()];
        let (track_config, tracks) = split_into_tracks(&events, &origins, &[]);
        assert_eq!(track_config, vec![TrackKind::Opl(TrackConfig::Oplt { channel: 0 })]);
        assert_eq!(tracks.len(), 1);
        let non_delay_count = tracks[0].iter().filter(|e| !matches!(e, Event::Delay { .. })).count();
        assert_eq!(non_delay_count, 3, "both tempo changes and the configuration toggle must survive");
    }

    #[test]
    fn truly_empty_event_stream_yields_no_tracks() {
        let (track_config, tracks) = split_into_tracks(&[], &[], &[]);
        assert!(track_config.is_empty());
        assert!(tracks.is_empty());
    }
}
