//! Instrument definitions.
//!
//! `Patch` is a tagged variant rather than a class hierarchy: `OPL` patches
//! carry FM operator state, `MIDI` patches a bank/program pair, `PCM` a
//! sample. Equality dispatches on the tag, and for `OPL` patches excludes
//! the "velocity slot"'s output level — see [`OplPatch::equals`].

/// One of the four operators ("slots") an OPL channel can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorParams {
    pub tremolo: bool,
    pub vibrato: bool,
    pub sustain: bool,
    pub ksr: bool,
    pub freq_mult: u8,
    pub scale_level: u8,
    pub output_level: u8,
    pub attack_rate: u8,
    pub decay_rate: u8,
    pub sustain_rate: u8,
    pub release_rate: u8,
    pub wave_select: u8,
}

impl OperatorParams {
    /// Structural equality, optionally ignoring `output_level`.
    fn equals(&self, other: &OperatorParams, ignore_output_level: bool) -> bool {
        self.tremolo == other.tremolo
            && self.vibrato == other.vibrato
            && self.sustain == other.sustain
            && self.ksr == other.ksr
            && self.freq_mult == other.freq_mult
            && self.scale_level == other.scale_level
            && (ignore_output_level || self.output_level == other.output_level)
            && self.attack_rate == other.attack_rate
            && self.decay_rate == other.decay_rate
            && self.sustain_rate == other.sustain_rate
            && self.release_rate == other.release_rate
            && self.wave_select == other.wave_select
    }
}

/// OPL channel connection topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Fm = 0,
    Am = 1,
}

/// Which rhythm-mode drum voice (if any) a patch or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rhythm {
    No,
    Hh,
    Cy,
    Tt,
    Sd,
    Bd,
}

impl Rhythm {
    /// Bit mask within register 0xBD that carries this drum's keyon bit.
    pub fn bit_mask(self) -> u8 {
        match self {
            Rhythm::Hh => 1 << 0,
            Rhythm::Cy => 1 << 1,
            Rhythm::Tt => 1 << 2,
            Rhythm::Sd => 1 << 3,
            Rhythm::Bd => 1 << 4,
            Rhythm::No => 0,
        }
    }

    /// `(channel, operator slots)` this drum's voice lives on. Channels 6,
    /// 7 and 8 are shared: BD gets both slots of channel 6, HH/SD split
    /// channel 7, TT/CY split channel 8.
    pub fn channel_slots(self) -> (u8, &'static [u8]) {
        match self {
            Rhythm::Bd => (6, &[0, 1]),
            Rhythm::Hh => (7, &[0]),
            Rhythm::Sd => (7, &[1]),
            Rhythm::Tt => (8, &[0]),
            Rhythm::Cy => (8, &[1]),
            Rhythm::No => (0, &[]),
        }
    }
}

/// An OPL FM instrument: up to four operators plus channel-level state.
#[derive(Debug, Clone, PartialEq)]
pub struct OplPatch {
    pub slots: [Option<OperatorParams>; 4],
    pub feedback: u8,
    pub connection: Connection,
    pub rhythm: Rhythm,
    /// Fixed playback note for a rhythm-mode voice (SBI's `percNote`).
    /// Meaningless when `rhythm == Rhythm::No`.
    pub rhythm_note: u8,
    /// Semitone transpose applied on top of `rhythm_note` (SBI's signed
    /// `transpose` byte). Meaningless when `rhythm == Rhythm::No`.
    pub rhythm_transpose: i8,
}

impl OplPatch {
    /// Index of the "velocity slot": slot 1 if present, else slot 0.
    fn velocity_slot(&self) -> usize {
        if self.slots[1].is_some() {
            1
        } else {
            0
        }
    }

    /// Semantic equality: every operator slot matches structurally, except
    /// the velocity slot's `output_level`, which is treated as per-note
    /// velocity rather than part of the instrument's identity. A slot
    /// present on one side and absent on the other always forces
    /// inequality.
    pub fn equals(&self, other: &OplPatch) -> bool {
        if self.feedback != other.feedback
            || self.connection != other.connection
            || self.rhythm != other.rhythm
            || self.rhythm_note != other.rhythm_note
            || self.rhythm_transpose != other.rhythm_transpose
        {
            return false;
        }
        let velocity_slot = self.velocity_slot();
        for i in 0..4 {
            match (self.slots[i], other.slots[i]) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if !a.equals(&b, i == velocity_slot) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

/// An instrument definition: OPL FM state, a MIDI bank/program pair, or a
/// PCM sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Opl(OplPatch),
    Midi { bank: u8, program: u8 },
    Pcm {
        rate: u32,
        samples: Vec<i16>,
        loop_point: Option<u32>,
    },
}

impl Patch {
    /// Semantic equality, used by [`crate::patch_table::PatchTable`] to
    /// deduplicate instruments.
    pub fn equals(&self, other: &Patch) -> bool {
        match (self, other) {
            (Patch::Opl(a), Patch::Opl(b)) => a.equals(b),
            (Patch::Midi { bank: b1, program: p1 }, Patch::Midi { bank: b2, program: p2 }) => {
                b1 == b2 && p1 == p2
            }
            (
                Patch::Pcm {
                    rate: r1,
                    samples: s1,
                    loop_point: l1,
                },
                Patch::Pcm {
                    rate: r2,
                    samples: s2,
                    loop_point: l2,
                },
            ) => r1 == r2 && s1 == s2 && l1 == l2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(output_level: u8) -> OperatorParams {
        OperatorParams {
            tremolo: false,
            vibrato: false,
            sustain: false,
            ksr: false,
            freq_mult: 1,
            scale_level: 0,
            output_level,
            attack_rate: 4,
            decay_rate: 4,
            sustain_rate: 4,
            release_rate: 4,
            wave_select: 0,
        }
    }

    fn two_op_patch(slot0_ol: u8, slot1_ol: u8) -> OplPatch {
        OplPatch {
            slots: [Some(op(slot0_ol)), Some(op(slot1_ol)), None, None],
            feedback: 3,
            connection: Connection::Fm,
            rhythm: Rhythm::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        }
    }

    #[test]
    fn equality_ignores_velocity_slot_output_level() {
        let a = two_op_patch(10, 20);
        let b = two_op_patch(10, 63);
        assert!(a.equals(&b), "slot 1 output_level should be ignored");
    }

    #[test]
    fn equality_considers_non_velocity_slot_output_level() {
        let a = two_op_patch(10, 20);
        let b = two_op_patch(11, 20);
        assert!(!a.equals(&b), "slot 0 output_level should matter");
    }

    #[test]
    fn missing_slot_forces_inequality() {
        let a = two_op_patch(10, 20);
        let mut b = a.clone();
        b.slots[1] = None;
        assert!(!a.equals(&b));
    }

    #[test]
    fn equals_is_reflexive() {
        let a = two_op_patch(10, 20);
        assert!(a.equals(&a.clone()));
    }

    #[test]
    fn one_op_patch_uses_slot_zero_as_velocity_slot() {
        let mut a = OplPatch {
            slots: [Some(op(5)), None, None, None],
            feedback: 0,
            connection: Connection::Fm,
            rhythm: Rhythm::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        };
        let mut b = a.clone();
        b.slots[0] = Some(op(63));
        assert!(a.equals(&b));

        a.slots[0].as_mut().unwrap().attack_rate = 9;
        assert!(!a.equals(&b));
    }
}
