//! Fixed-tempo retiming: collapse interleaved `Tempo` changes into a
//! single target tick rate.

use crate::event::{Event, Origin};
use crate::tempo::Tempo;

/// Retime `events` to `target_us_per_tick`: every `Tempo` event is
/// dropped, and every `Delay` is rescaled so its elapsed microseconds are
/// unchanged. `factor` starts at `initial_tempo.us_per_tick /
/// target_us_per_tick`, not `1` — the source events carry no tempo until
/// their first explicit `Tempo` event, so the initial tempo has to seed
/// the conversion.
pub fn fixed_tempo(
    events: &[Event],
    origins: &[Origin],
    initial_tempo: Tempo,
    target_us_per_tick: f64,
) -> (Vec<Event>, Vec<Origin>) {
    let mut factor = initial_tempo.us_per_tick() / target_us_per_tick;
    let mut out_events = Vec::with_capacity(events.len());
    let mut out_origins = Vec::with_capacity(origins.len());

    for (event, origin) in events.iter().zip(origins.iter()) {
        match event {
            Event::Tempo(tempo) => {
                factor = tempo.us_per_tick() / target_us_per_tick;
            }
            Event::Delay { ticks } => {
                let scaled = (*ticks as f64 * factor).round() as u32;
                out_events.push(Event::Delay { ticks: scaled });
                out_origins.push(*origin);
            }
            other => {
                out_events.push(other.clone());
                out_origins.push(*origin);
            }
        }
    }

    (out_events, out_origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn drops_tempo_events_and_scales_delays() {
        let t1 = Tempo::new(4, 4, 192, 1, 1000.0);
        let t2 = Tempo::new(4, 4, 192, 1, 2000.0);
        let events = vec![
            Event::Tempo(t1),
            Event::Delay { ticks: 10 },
            Event::Tempo(t2),
            Event::Delay { ticks: 10 },
        ];
        let origins = vec![Origin::Global; events.len()];
        let (out, _) = fixed_tempo(&events, &origins, t1, 1000.0);
        assert_eq!(
            out,
            vec![Event::Delay { ticks: 10 }, Event::Delay { ticks: 20 }]
        );
    }

    #[test]
    fn total_elapsed_microseconds_is_preserved() {
        let t1 = Tempo::new(4, 4, 192, 1, 500.0);
        let events = vec![Event::Delay { ticks: 100 }];
        let origins = vec![Origin::Global];
        let (out, _) = fixed_tempo(&events, &origins, t1, 1000.0);
        let original_us = 100.0 * 500.0;
        let scaled_us = match out[0] {
            Event::Delay { ticks } => ticks as f64 * 1000.0,
            _ => panic!("expected a Delay"),
        };
        assert!((original_us - scaled_us).abs() < 1000.0);
    }
}
