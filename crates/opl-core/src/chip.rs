//! Flat 512-byte model of an OPL3's two register banks.
//!
//! Bank 0 lives at 0x000-0x0FF, bank 1 (the OPL3 extension) at
//! 0x100-0x1FF. Both chips are represented as one array; there is no
//! separate "chip A"/"chip B" type.

use crate::patch::OperatorParams;

/// Conversion constant between `(fnum, block)` and Hz (datasheet value).
pub const FNUM_CONV: f64 = 49716.0;

/// Result of converting a frequency back to `(fnum, block)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FnumBlock {
    pub fnum: u16,
    pub block: u8,
    pub clip: bool,
}

/// 512-byte OPL2/OPL3 register file.
#[derive(Debug, Clone)]
pub struct ChipState {
    regs: [u8; 512],
}

impl Default for ChipState {
    fn default() -> Self {
        ChipState { regs: [0; 512] }
    }
}

impl ChipState {
    pub fn new() -> Self {
        ChipState::default()
    }

    pub fn get(&self, reg: u16) -> u8 {
        self.regs[reg as usize & 0x1FF]
    }

    pub fn set(&mut self, reg: u16, val: u8) {
        self.regs[reg as usize & 0x1FF] = val;
    }

    pub fn as_slice(&self) -> &[u8; 512] {
        &self.regs
    }

    /// True iff `reg` is a register the real chip implements. Upper-bank
    /// (0x100-0x1FF) registers mirror the same local-offset rules.
    pub fn is_valid_register(reg: u16) -> bool {
        if reg >= 512 {
            return false;
        }
        let local = reg & 0xFF;
        !matches!(local,
            0x06 | 0x07
            | 0x09..=0x1F
            | 0x36..=0x3F
            | 0x56..=0x5F
            | 0x76..=0x7F
            | 0x96..=0x9F
            | 0xA9..=0xAF
            | 0xB9..=0xBC
            | 0xBE..=0xBF
            | 0xC9..=0xDF
        ) && local < 0xF6
    }

    /// Register offset for operator `slot` (0..=3) of channel `c` (0..=17),
    /// to be added to one of the 0x20/0x40/0x60/0x80/0xE0 operator bases.
    pub fn operator_offset(c: u8, slot: u8) -> u16 {
        let bank = 0x100 * (c as u16 / 9);
        let local_c = c as u16 % 9;
        bank + (local_c / 3) * 8 + (local_c % 3) + slot as u16 * 3 + (slot as u16 / 2) * 2
    }

    /// Register offset for channel `c`'s 0xA0/0xB0/0xC0 registers.
    pub fn channel_offset(c: u8) -> u16 {
        let bank = 0x100 * (c as u16 / 9);
        let local_c = c as u16 % 9;
        bank + local_c
    }

    /// Bit index within register 0x104 that enables four-operator mode for
    /// the channel pair headed by `primary`, or `None` if `primary` isn't a
    /// four-op-capable channel (0,1,2,9,10,11).
    pub fn four_op_bit_index(primary: u8) -> Option<u8> {
        match primary {
            0 => Some(0),
            1 => Some(1),
            2 => Some(2),
            9 => Some(3),
            10 => Some(4),
            11 => Some(5),
            _ => None,
        }
    }

    /// Read the twelve FM parameters of the operator at `offset`.
    pub fn read_operator(&self, offset: u16) -> OperatorParams {
        let am_vib = self.get(0x20 + offset);
        let ksl_tl = self.get(0x40 + offset);
        let ar_dr = self.get(0x60 + offset);
        let sl_rr = self.get(0x80 + offset);
        let ws = self.get(0xE0 + offset);
        OperatorParams {
            tremolo: am_vib & 0x80 != 0,
            vibrato: am_vib & 0x40 != 0,
            sustain: am_vib & 0x20 != 0,
            ksr: am_vib & 0x10 != 0,
            freq_mult: am_vib & 0x0F,
            scale_level: (ksl_tl >> 6) & 0x03,
            output_level: ksl_tl & 0x3F,
            attack_rate: (ar_dr >> 4) & 0x0F,
            decay_rate: ar_dr & 0x0F,
            sustain_rate: (sl_rr >> 4) & 0x0F,
            release_rate: sl_rr & 0x0F,
            wave_select: ws & 0x07,
        }
    }

    pub fn write_operator(&mut self, offset: u16, op: &OperatorParams) {
        let am_vib = ((op.tremolo as u8) << 7)
            | ((op.vibrato as u8) << 6)
            | ((op.sustain as u8) << 5)
            | ((op.ksr as u8) << 4)
            | (op.freq_mult & 0x0F);
        let ksl_tl = ((op.scale_level & 0x03) << 6) | (op.output_level & 0x3F);
        let ar_dr = ((op.attack_rate & 0x0F) << 4) | (op.decay_rate & 0x0F);
        let sl_rr = ((op.sustain_rate & 0x0F) << 4) | (op.release_rate & 0x0F);
        self.set(0x20 + offset, am_vib);
        self.set(0x40 + offset, ksl_tl);
        self.set(0x60 + offset, ar_dr);
        self.set(0x80 + offset, sl_rr);
        self.set(0xE0 + offset, op.wave_select & 0x07);
    }

    /// `(feedback, connection_bit)` from a channel's 0xC0 register.
    pub fn read_feedback_connection(&self, channel_offset: u16) -> (u8, u8) {
        let byte = self.get(0xC0 + channel_offset);
        ((byte >> 1) & 0x07, byte & 0x01)
    }

    pub fn write_feedback_connection(&mut self, channel_offset: u16, feedback: u8, connection: u8) {
        let byte = ((feedback & 0x07) << 1) | (connection & 0x01);
        self.set(0xC0 + channel_offset, byte);
    }

    /// `fnum`/`block` to Hz: `conv * fnum * 2^(block - 20)`.
    pub fn fnum_to_frequency(fnum: u16, block: u8) -> f64 {
        FNUM_CONV * fnum as f64 * 2f64.powi(block as i32 - 20)
    }

    /// Inverse of [`ChipState::fnum_to_frequency`].
    ///
    /// `current_block`, if given, is tried first: if it yields an `fnum`
    /// in `(100, 900)`, it's kept to avoid pitch jitter on a held note.
    pub fn frequency_to_fnum(freq_hz: f64, current_block: Option<u8>) -> FnumBlock {
        if freq_hz == 0.0 {
            return FnumBlock {
                fnum: 0,
                block: current_block.unwrap_or(0),
                clip: false,
            };
        }
        if freq_hz > 6208.431 {
            return FnumBlock {
                fnum: 1023,
                block: 7,
                clip: true,
            };
        }

        if let Some(block) = current_block {
            let fnum = (freq_hz / (FNUM_CONV * 2f64.powi(block as i32 - 20))).round();
            if fnum > 100.0 && fnum < 900.0 {
                return FnumBlock {
                    fnum: fnum as u16,
                    block,
                    clip: false,
                };
            }
        }

        for block in 0u8..=7 {
            let fnum = (freq_hz / (FNUM_CONV * 2f64.powi(block as i32 - 20))).round();
            if fnum < 1024.0 {
                return FnumBlock {
                    fnum: fnum as u16,
                    block,
                    clip: false,
                };
            }
        }

        FnumBlock {
            fnum: 1023,
            block: 7,
            clip: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn invalid_registers_are_rejected() {
        assert!(!ChipState::is_valid_register(0x06));
        assert!(!ChipState::is_valid_register(0x1F));
        assert!(!ChipState::is_valid_register(0xF6));
        assert!(!ChipState::is_valid_register(0x106)); // mirrored in upper bank
        assert!(ChipState::is_valid_register(0x20));
        assert!(ChipState::is_valid_register(0xBD));
        assert!(ChipState::is_valid_register(0x104));
    }

    #[test]
    fn operator_offset_matches_datasheet_layout() {
        // Channel 0 slot 0 -> offset 0; slot 1 -> offset 3.
        assert_eq!(ChipState::operator_offset(0, 0), 0);
        assert_eq!(ChipState::operator_offset(0, 1), 3);
        // Channel 3 (local_c=3) starts the second group of three channels.
        assert_eq!(ChipState::operator_offset(3, 0), 8);
        // Channel 9 is the first channel of bank 1.
        assert_eq!(ChipState::operator_offset(9, 0), 0x100);
    }

    #[test]
    fn channel_offset_is_bank_plus_local() {
        assert_eq!(ChipState::channel_offset(0), 0);
        assert_eq!(ChipState::channel_offset(8), 8);
        assert_eq!(ChipState::channel_offset(9), 0x100);
        assert_eq!(ChipState::channel_offset(17), 0x108);
    }

    #[test]
    fn fnum_to_frequency_scenario() {
        let freq = ChipState::fnum_to_frequency(580, 4);
        assert!((freq - 439.991).abs() < 0.01, "got {freq}");
    }

    #[test]
    fn frequency_to_fnum_fast_path_keeps_current_block() {
        let fb = ChipState::frequency_to_fnum(439.991, Some(4));
        assert_eq!(fb, FnumBlock { fnum: 580, block: 4, clip: false });
    }

    #[test]
    fn frequency_to_fnum_clips_above_max() {
        let fb = ChipState::frequency_to_fnum(6209.431, Some(0));
        assert_eq!(fb, FnumBlock { fnum: 1023, block: 7, clip: true });
    }

    #[test]
    fn frequency_to_fnum_zero_keeps_block() {
        let fb = ChipState::frequency_to_fnum(0.0, Some(3));
        assert_eq!(fb.fnum, 0);
        assert_eq!(fb.block, 3);
    }

    #[test]
    fn operator_read_write_roundtrip() {
        let mut chip = ChipState::new();
        let op = OperatorParams {
            tremolo: true,
            vibrato: false,
            sustain: true,
            ksr: false,
            freq_mult: 5,
            scale_level: 2,
            output_level: 42,
            attack_rate: 9,
            decay_rate: 3,
            sustain_rate: 7,
            release_rate: 1,
            wave_select: 4,
        };
        chip.write_operator(0x11, &op);
        assert_eq!(chip.read_operator(0x11), op);
    }
}
