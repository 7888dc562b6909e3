//! `generateOPL`: abstract events back to a minimal raw-register stream.
//!
//! Mirrors [`crate::parser`]: the same two register snapshots, the same
//! five global-mode bits, the same rhythm/four-op channel tables — just
//! run in the write direction.

use crate::chip::ChipState;
use crate::error::{Error, Result};
use crate::event::{ConfigOption, Event};
use crate::parser::OplItem;
use crate::patch::{Connection, OplPatch, Patch, Rhythm};
use crate::warnings::GeneratorWarnings;

/// Which OPL channel a track drives.
///
/// `Oplt`/`Oplf` carry the melodic channel number directly rather than an
/// opaque index — see the design note on replacing `custom` scratch with
/// a tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackConfig {
    /// Two-operator melodic channel 0..=17.
    Oplt { channel: u8 },
    /// Four-operator melodic channel; must be a four-op-capable primary
    /// (0, 1, 2, 9, 10, 11).
    Oplf { channel: u8 },
    /// A rhythm-mode drum voice.
    Oplr { drum: Rhythm },
}

pub struct GenerateOutput {
    pub items: Vec<OplItem>,
    pub warnings: GeneratorWarnings,
}

struct VoiceRegs {
    keyon_reg: u16,
    keyon_mask: u8,
    channel_offset: u16,
    operator_offsets: Vec<(usize, u16)>,
}

fn voice_registers(tc: &TrackConfig) -> VoiceRegs {
    match *tc {
        TrackConfig::Oplt { channel } => {
            let channel_offset = ChipState::channel_offset(channel);
            VoiceRegs {
                keyon_reg: 0xB0 + channel_offset,
                keyon_mask: 0x20,
                channel_offset,
                operator_offsets: vec![
                    (0, ChipState::operator_offset(channel, 0)),
                    (1, ChipState::operator_offset(channel, 1)),
                ],
            }
        }
        TrackConfig::Oplf { channel } => {
            let channel_offset = ChipState::channel_offset(channel);
            let secondary = channel + 3;
            VoiceRegs {
                keyon_reg: 0xB0 + channel_offset,
                keyon_mask: 0x20,
                channel_offset,
                operator_offsets: vec![
                    (0, ChipState::operator_offset(channel, 0)),
                    (1, ChipState::operator_offset(channel, 1)),
                    (2, ChipState::operator_offset(secondary, 0)),
                    (3, ChipState::operator_offset(secondary, 1)),
                ],
            }
        }
        TrackConfig::Oplr { drum } => {
            let (channel, slots) = drum.channel_slots();
            let channel_offset = ChipState::channel_offset(channel);
            VoiceRegs {
                keyon_reg: 0xBD,
                keyon_mask: drum.bit_mask(),
                channel_offset,
                operator_offsets: slots
                    .iter()
                    .map(|&s| (s as usize, ChipState::operator_offset(channel, s)))
                    .collect(),
            }
        }
    }
}

struct Generator {
    state: ChipState,
    prev: ChipState,
    items: Vec<OplItem>,
    warnings: GeneratorWarnings,
}

impl Generator {
    fn new() -> Self {
        Generator {
            state: ChipState::new(),
            prev: ChipState::new(),
            items: Vec::new(),
            warnings: GeneratorWarnings::new(),
        }
    }

    fn apply_configuration(&mut self, option: ConfigOption, value: bool) {
        let (reg, mask) = match option {
            ConfigOption::WaveSel => (0x01, 0x20),
            ConfigOption::Opl3 => (0x105, 0x01),
            ConfigOption::DeepTremolo => (0xBD, 0x80),
            ConfigOption::DeepVibrato => (0xBD, 0x40),
            ConfigOption::Rhythm => (0xBD, 0x20),
            ConfigOption::Empty => return,
        };
        let mut byte = self.state.get(reg);
        if value {
            byte |= mask;
        } else {
            byte &= !mask;
        }
        self.state.set(reg, byte);
    }

    fn apply_note_off(&mut self, tc: &TrackConfig) {
        let regs = voice_registers(tc);
        let byte = self.state.get(regs.keyon_reg) & !regs.keyon_mask;
        self.state.set(regs.keyon_reg, byte);
    }

    fn apply_note_on(
        &mut self,
        tc: &TrackConfig,
        frequency_hz: f64,
        velocity: f64,
        patch: &OplPatch,
    ) -> Result<()> {
        let regs = voice_registers(tc);

        if matches!(tc, TrackConfig::Oplf { .. }) {
            if let TrackConfig::Oplf { channel } = *tc {
                if let Some(bit) = ChipState::four_op_bit_index(channel) {
                    let byte = self.state.get(0x104) | (1 << bit);
                    self.state.set(0x104, byte);
                }
            }
        }

        for (slot, offset) in &regs.operator_offsets {
            if let Some(op) = patch.slots[*slot] {
                let mut op = op;
                if *slot == velocity_slot(patch) {
                    op.output_level = velocity_to_output_level(velocity);
                }
                self.state.write_operator(*offset, &op);
            }
        }
        if !matches!(tc, TrackConfig::Oplr { .. }) {
            self.state
                .write_feedback_connection(regs.channel_offset, patch.feedback, patch.connection as u8);
        }

        let old_keyon_bit = self.prev.get(regs.keyon_reg) & regs.keyon_mask != 0;
        let cur_keyon_bit = self.state.get(regs.keyon_reg) & regs.keyon_mask != 0;
        if !cur_keyon_bit && old_keyon_bit {
            // A NoteOff accumulated without an intervening Delay: make it
            // visible in the stream now, or the parser will never see the
            // keyon bit drop and will merge this retrigger into nothing.
            self.items.push(OplItem::Reg {
                reg: regs.keyon_reg,
                val: self.state.get(regs.keyon_reg),
            });
            // Commit the transient value into `prev` now: otherwise the
            // keyon write a few lines down lands back on the same bits
            // `prev` already holds from before the NoteOff, the delay-time
            // diff sees no change, and the retrigger's keyon write never
            // makes it into the stream.
            self.prev.set(regs.keyon_reg, self.state.get(regs.keyon_reg));
        }

        let current_block = if regs.keyon_reg == 0xBD {
            None
        } else {
            Some((self.state.get(regs.keyon_reg) >> 2) & 0x07)
        };
        let fb = ChipState::frequency_to_fnum(frequency_hz, current_block);
        if fb.clip {
            self.warnings.clipped_frequency(frequency_hz);
        }

        self.state.set(0xA0 + regs.channel_offset, (fb.fnum & 0xFF) as u8);
        let fnum_hi = ((fb.fnum >> 8) & 0x03) as u8;
        let block_bits = (fb.block & 0x07) << 2;

        if regs.keyon_reg == 0xBD {
            let byte = self.state.get(regs.keyon_reg) | regs.keyon_mask;
            self.state.set(regs.keyon_reg, byte);
            let b_reg = 0xB0 + regs.channel_offset;
            self.state.set(b_reg, block_bits | fnum_hi);
        } else {
            self.state
                .set(regs.keyon_reg, 0x20 | block_bits | fnum_hi);
        }
        Ok(())
    }

    fn flush_delay(&mut self, ticks: u32) {
        for reg in 0u16..512 {
            if !ChipState::is_valid_register(reg) {
                continue;
            }
            let old = self.prev.get(reg);
            let new = self.state.get(reg);
            if old != new {
                self.items.push(OplItem::Reg { reg, val: new });
            }
        }
        match self.items.last_mut() {
            Some(OplItem::Delay { ticks: t }) => *t += ticks,
            _ => self.items.push(OplItem::Delay { ticks }),
        }
        self.prev = self.state.clone();
    }
}

fn velocity_slot(patch: &OplPatch) -> usize {
    if patch.slots[1].is_some() {
        1
    } else {
        0
    }
}

/// Inverse of the parser's velocity formula: `outputLevel = round(64^(1 -
/// velocity) - 1)`, clamped to `[0,63]`.
fn velocity_to_output_level(velocity: f64) -> u8 {
    let velocity = velocity.clamp(0.0, 1.0);
    let ol = (64f64.powf(1.0 - velocity) - 1.0).round();
    ol.clamp(0.0, 63.0) as u8
}

/// One event tagged with the track (by index into `track_config`) it
/// came from. `Delay`/`Tempo` events ignore `track` since they're global.
#[derive(Debug, Clone, Copy)]
pub struct TrackedEvent<'a> {
    pub event: &'a Event,
    pub track: usize,
}

/// Generate minimal `(reg,val)`/`delay`/`tempo` items from a flat,
/// track-tagged event list and the patch table those events'
/// `instrument_index`es refer to.
pub fn generate(
    events: &[TrackedEvent],
    track_config: &[TrackConfig],
    patches: &[Patch],
) -> Result<GenerateOutput> {
    let mut g = Generator::new();

    for te in events {
        match te.event {
            Event::Tempo(tempo) => g.items.push(OplItem::Tempo(*tempo)),
            Event::Delay { ticks } => {
                if *ticks > 0 {
                    g.flush_delay(*ticks);
                }
            }
            Event::Configuration { option, value } => g.apply_configuration(*option, *value),
            Event::NoteOff => {
                let tc = track_config
                    .get(te.track)
                    .ok_or(Error::UnsupportedEvent("NoteOff on unknown track"))?;
                g.apply_note_off(tc);
            }
            Event::NoteOn {
                frequency_hz,
                velocity,
                instrument_index,
            } => {
                let tc = track_config
                    .get(te.track)
                    .ok_or(Error::UnsupportedEvent("NoteOn on unknown track"))?;
                let patch = patches
                    .get(*instrument_index as usize)
                    .ok_or(Error::MissingInstrument(*instrument_index))?;
                match patch {
                    Patch::Opl(p) => g.apply_note_on(tc, *frequency_hz, *velocity, p)?,
                    _ => g.warnings.dropped_unsupported_event("non-OPL instrument on OPL track"),
                }
            }
            Event::Effect { .. } => {
                g.warnings.dropped_unsupported_event("Effect");
            }
        }
    }

    Ok(GenerateOutput {
        items: g.items,
        warnings: g.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::OperatorParams;
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

    #[test]
    fn scenario_5_config_and_delay_merging() {
        let events = vec![
            Event::Configuration {
                option: ConfigOption::WaveSel,
                value: true,
            },
            Event::Delay { ticks: 10 },
            Event::Configuration {
                option: ConfigOption::WaveSel,
                value: false,
            },
            Event::Delay { ticks: 20 },
            Event::Configuration {
                option: ConfigOption::WaveSel,
                value: false,
            },
            Event::Delay { ticks: 30 },
        ];
        let tracked: Vec<TrackedEvent> = events
            .iter()
            .map(|e| TrackedEvent { event: e, track: 0 })
            .collect();
        let out = generate(&tracked, &[], &[]).unwrap();
        assert_eq!(
            out.items,
            vec![
                OplItem::Reg { reg: 0x01, val: 0x20 },
                OplItem::Delay { ticks: 10 },
                OplItem::Reg { reg: 0x01, val: 0x00 },
                OplItem::Delay { ticks: 50 },
            ]
        );
    }

    #[test]
    fn note_on_writes_patch_and_keyon() {
        let patch = Patch::Opl(OplPatch {
            slots: [Some(op(10)), Some(op(20)), None, None],
            feedback: 3,
            connection: Connection::Fm,
            rhythm: Rhythm::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        });
        let events = vec![
            Event::NoteOn {
                frequency_hz: 439.991,
                velocity: 0.5,
                instrument_index: 0,
            },
            Event::Delay { ticks: 5 },
        ];
        let tracked: Vec<TrackedEvent> = events
            .iter()
            .map(|e| TrackedEvent { event: e, track: 0 })
            .collect();
        let track_config = vec![TrackConfig::Oplt { channel: 0 }];
        let out = generate(&tracked, &track_config, std::slice::from_ref(&patch)).unwrap();
        let has_keyon = out.items.iter().any(|i| match i {
            OplItem::Reg { reg: 0xB0, val } => val & 0x20 != 0,
            _ => false,
        });
        assert!(has_keyon);
    }

    #[test]
    fn retrigger_before_delay_emits_explicit_keyoff_write() {
        let patch = Patch::Opl(OplPatch {
            slots: [Some(op(10)), None, None, None],
            feedback: 0,
            connection: Connection::Fm,
            rhythm: Rhythm::No,
            rhythm_note: 0,
            rhythm_transpose: 0,
        });
        let events = vec![
            Event::NoteOn {
                frequency_hz: 440.0,
                velocity: 1.0,
                instrument_index: 0,
            },
            Event::Delay { ticks: 5 },
            Event::NoteOff,
            Event::NoteOn {
                frequency_hz: 440.0,
                velocity: 1.0,
                instrument_index: 0,
            },
            Event::Delay { ticks: 5 },
        ];
        let tracked: Vec<TrackedEvent> = events
            .iter()
            .map(|e| TrackedEvent { event: e, track: 0 })
            .collect();
        let track_config = vec![TrackConfig::Oplt { channel: 0 }];
        let out = generate(&tracked, &track_config, std::slice::from_ref(&patch)).unwrap();
        // the transient keyoff must appear as its own write, not be silently
        // absorbed into the next keyon write.
        let keyoff_writes = out
            .items
            .iter()
            .filter(|i| matches!(i, OplItem::Reg { reg: 0xB0, val } if val & 0x20 == 0))
            .count();
        assert!(keyoff_writes >= 1, "expected an explicit transient keyoff write");
    }
}
