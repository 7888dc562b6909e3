//! Canonical tempo state and its derived setters/getters.
//!
//! `us_per_tick` is the only value that actually controls playback speed;
//! everything else is notation sugar that `bpm`/`hertz`/`module_*` mutate
//! it through.

/// Playback-rate and notation state, independent of any one song.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    beats_per_bar: u8,
    beat_length: u8,
    ticks_per_quarter_note: u32,
    frames_per_tick: u8,
    us_per_tick: f64,
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            beats_per_bar: 4,
            beat_length: 4,
            ticks_per_quarter_note: 192,
            frames_per_tick: 1,
            us_per_tick: 1000.0,
        }
    }
}

fn clamp_beats_per_bar(v: u8) -> u8 {
    v.clamp(1, 16)
}

fn clamp_beat_length(v: u8) -> u8 {
    // nearest valid power of two in {1,2,4,8,16}
    [1, 2, 4, 8, 16]
        .into_iter()
        .min_by_key(|candidate| (*candidate as i16 - v as i16).abs())
        .unwrap_or(4)
}

fn clamp_frames_per_tick(v: u8) -> u8 {
    v.clamp(1, 64)
}

fn clamp_us_per_tick(v: f64) -> f64 {
    v.clamp(f64::MIN_POSITIVE, 6.0e8)
}

impl Tempo {
    pub fn new(
        beats_per_bar: u8,
        beat_length: u8,
        ticks_per_quarter_note: u32,
        frames_per_tick: u8,
        us_per_tick: f64,
    ) -> Self {
        Tempo {
            beats_per_bar: clamp_beats_per_bar(beats_per_bar),
            beat_length: clamp_beat_length(beat_length),
            ticks_per_quarter_note: ticks_per_quarter_note.max(1),
            frames_per_tick: clamp_frames_per_tick(frames_per_tick),
            us_per_tick: clamp_us_per_tick(us_per_tick),
        }
    }

    pub fn beats_per_bar(&self) -> u8 {
        self.beats_per_bar
    }

    pub fn set_beats_per_bar(&mut self, v: u8) {
        self.beats_per_bar = clamp_beats_per_bar(v);
    }

    pub fn beat_length(&self) -> u8 {
        self.beat_length
    }

    pub fn set_beat_length(&mut self, v: u8) {
        self.beat_length = clamp_beat_length(v);
    }

    pub fn ticks_per_quarter_note(&self) -> u32 {
        self.ticks_per_quarter_note
    }

    pub fn set_ticks_per_quarter_note(&mut self, v: u32) {
        self.ticks_per_quarter_note = v.max(1);
    }

    pub fn frames_per_tick(&self) -> u8 {
        self.frames_per_tick
    }

    pub fn us_per_tick(&self) -> f64 {
        self.us_per_tick
    }

    pub fn set_us_per_tick(&mut self, v: f64) {
        self.us_per_tick = clamp_us_per_tick(v);
    }

    /// Microseconds per quarter note, unrounded (the MIDI meta event rounds it).
    pub fn us_per_quarter_note(&self) -> f64 {
        self.us_per_tick * self.ticks_per_quarter_note as f64
    }

    pub fn set_us_per_quarter_note(&mut self, us: f64) {
        self.set_us_per_tick(us / self.ticks_per_quarter_note as f64);
    }

    /// Beats (quarter notes) per minute, rounded to the nearest integer.
    pub fn bpm(&self) -> u32 {
        (60_000_000.0 / self.us_per_quarter_note()).round() as u32
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        let us_per_quarter = 60_000_000.0 / bpm.max(1) as f64;
        self.set_us_per_quarter_note(us_per_quarter);
    }

    /// Ticks per second, rounded to the nearest integer.
    pub fn hertz(&self) -> u32 {
        (1_000_000.0 / self.us_per_tick).round() as u32
    }

    pub fn set_hertz(&mut self, hz: u32) {
        self.set_us_per_tick(1_000_000.0 / hz.max(1) as f64);
    }

    /// Tracker-style "speed": frames (audio ticks) per row, holding the
    /// per-frame duration constant while rescaling the row duration.
    pub fn set_module_speed(&mut self, speed: u8) {
        let per_frame = self.us_per_tick / self.frames_per_tick as f64;
        self.frames_per_tick = clamp_frames_per_tick(speed);
        self.set_us_per_tick(per_frame * self.frames_per_tick as f64);
    }

    /// Tracker-style "tempo": classic MOD formula, `us_per_frame = 2_500_000 / tempo`.
    pub fn set_module_tempo(&mut self, tempo: u32) {
        let per_frame = 2_500_000.0 / tempo.max(1) as f64;
        self.set_us_per_tick(per_frame * self.frames_per_tick as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn bpm_and_hertz_scenario() {
        let mut t = Tempo::new(4, 4, 48, 1, 1000.0);
        t.set_bpm(120);
        assert!(
            approx(t.us_per_tick(), 10416.67, 0.1),
            "got {}",
            t.us_per_tick()
        );

        t.set_hertz(560);
        assert!(
            approx(t.us_per_tick(), 1785.71, 0.1),
            "got {}",
            t.us_per_tick()
        );
    }

    #[test]
    fn bpm_roundtrips_through_rounding() {
        let mut t = Tempo::default();
        t.set_bpm(140);
        assert_eq!(t.bpm(), 140);
    }

    #[test]
    fn module_speed_rescales_without_changing_frame_rate() {
        let mut t = Tempo::default();
        t.set_module_tempo(125);
        let per_frame_before = t.us_per_tick() / t.frames_per_tick() as f64;
        t.set_module_speed(6);
        let per_frame_after = t.us_per_tick() / t.frames_per_tick() as f64;
        assert!(approx(per_frame_before, per_frame_after, 1e-6));
        assert_eq!(t.frames_per_tick(), 6);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let t = Tempo::new(99, 3, 48, 200, -5.0);
        assert_eq!(t.beats_per_bar(), 16);
        assert_eq!(t.beat_length(), 2);
        assert_eq!(t.frames_per_tick(), 64);
        assert!(t.us_per_tick() > 0.0);
    }
}
