//! `parseOPL`: raw `(register, value, delay)` writes to abstract events.
//!
//! This is the hardest part of the codec. The chip exposes no "note on"
//! concept — only a keyon bit inside a per-channel register — so a note
//! boundary has to be inferred from how that bit changes across a burst
//! of zero-delay writes, and an instrument has to be reconstructed from
//! whatever register state happens to be sitting around at the moment
//! the bit flips on.

use std::collections::HashMap;

use tracing::trace;

use crate::chip::ChipState;
use crate::error::{Error, Result};
use crate::event::{ConfigOption, Event, Origin};
use crate::patch::{Connection, OperatorParams, OplPatch, Patch, Rhythm};
use crate::patch_table::PatchTable;
use crate::tempo::Tempo;

/// One item from the raw OPL write stream. Each item carries exactly one
/// of a register write, a delay, or a tempo change — the type itself
/// rules out the `FormatConflict` spec.md warns about; a format wrapper
/// that reads an ambiguous on-disk record reports that conflict before
/// it ever becomes an `OplItem`.
#[derive(Debug, Clone, PartialEq)]
pub enum OplItem {
    Reg { reg: u16, val: u8 },
    Delay { ticks: u32 },
    Tempo(Tempo),
}

/// Output of [`parse`]: the abstract event list, the origin of every
/// event (a parallel array, not a field on `Event`), and the deduplicated
/// instrument table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    pub events: Vec<Event>,
    pub origins: Vec<Origin>,
    pub patches: Vec<Patch>,
}

const MELODIC_CHANNELS: u8 = 18;
const RHYTHM_ORDER: [Rhythm; 5] = [Rhythm::Hh, Rhythm::Cy, Rhythm::Tt, Rhythm::Sd, Rhythm::Bd];

/// `(register, bit mask, ConfigOption)` triples for the chip-global mode
/// bits the parser watches.
const GLOBAL_MODE_BITS: [(u16, u8, ConfigOption); 5] = [
    (0x01, 0x20, ConfigOption::WaveSel),
    (0x105, 0x01, ConfigOption::Opl3),
    (0xBD, 0x80, ConfigOption::DeepTremolo),
    (0xBD, 0x40, ConfigOption::DeepVibrato),
    (0xBD, 0x20, ConfigOption::Rhythm),
];

fn four_op_bit_index(primary: u8) -> Option<u8> {
    ChipState::four_op_bit_index(primary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VoiceId {
    Channel(u8),
    Rhythm(Rhythm),
}

struct Parser {
    state: ChipState,
    prev: ChipState,
    has_key_on: HashMap<VoiceId, bool>,
    events: Vec<Event>,
    origins: Vec<Origin>,
    patches: PatchTable,
    seen_first_item: bool,
}

impl Parser {
    fn new() -> Self {
        Parser {
            state: ChipState::new(),
            prev: ChipState::new(),
            has_key_on: HashMap::new(),
            events: Vec::new(),
            origins: Vec::new(),
            patches: PatchTable::new(),
            seen_first_item: false,
        }
    }

    fn push(&mut self, event: Event, origin: Origin) {
        self.events.push(event);
        self.origins.push(origin);
    }

    fn handle_reg(&mut self, reg: u16, val: u8) -> Result<()> {
        let is_first = !self.seen_first_item;
        if reg == 0 && !is_first {
            return Err(Error::InvalidRegister(reg));
        }
        if reg != 0 && !ChipState::is_valid_register(reg) {
            return Err(Error::InvalidRegister(reg));
        }

        let old = self.state.get(reg);
        self.state.set(reg, val);

        if old ^ val != 0 {
            if let Some(channel) = keyon_register_channel(reg) {
                if old & 0x20 == 0 && val & 0x20 != 0 {
                    self.has_key_on.insert(VoiceId::Channel(channel), true);
                }
            }
            if reg == 0xBD {
                for r in RHYTHM_ORDER {
                    let mask = r.bit_mask();
                    if old & mask == 0 && val & mask != 0 {
                        self.has_key_on.insert(VoiceId::Rhythm(r), true);
                    }
                }
            }
        }
        trace!(reg, val, "opl register write");
        Ok(())
    }

    fn handle_delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        self.flush();
        match self.events.last_mut() {
            Some(Event::Delay { ticks: t }) => *t += ticks,
            _ => self.push(Event::Delay { ticks }, Origin::Global),
        }
        self.has_key_on.clear();
    }

    fn handle_tempo(&mut self, tempo: Tempo) {
        if let Some(Event::Tempo(t)) = self.events.last_mut() {
            *t = tempo;
        } else {
            self.push(Event::Tempo(tempo), Origin::Global);
        }
    }

    /// `appendOPLEvents`: diff `state` against `prev`, emit the events
    /// that diff implies, then let `prev` catch up to `state`.
    fn flush(&mut self) {
        for (reg, mask, option) in GLOBAL_MODE_BITS {
            let old_bit = self.prev.get(reg) & mask != 0;
            let new_bit = self.state.get(reg) & mask != 0;
            if old_bit != new_bit {
                self.push(
                    Event::Configuration {
                        option,
                        value: new_bit,
                    },
                    Origin::Global,
                );
            }
        }

        let rhythm_enabled = self.state.get(0xBD) & 0x20 != 0;

        for c in 0..MELODIC_CHANNELS {
            if rhythm_enabled && (c == 6 || c == 7 || c == 8) {
                continue;
            }
            if is_four_op_secondary(&self.state, c) {
                continue;
            }
            self.resolve_channel_voice(c);
        }

        if rhythm_enabled {
            for r in RHYTHM_ORDER {
                self.resolve_rhythm_voice(r);
            }
        }

        self.prev = self.state.clone();
    }

    fn resolve_channel_voice(&mut self, c: u8) {
        let reg = 0xB0 + ChipState::channel_offset(c);
        let old_bit = self.prev.get(reg) & 0x20 != 0;
        let new_bit = self.state.get(reg) & 0x20 != 0;
        let key_change = old_bit != new_bit;
        let voice = VoiceId::Channel(c);
        let has_key_on = *self.has_key_on.get(&voice).unwrap_or(&false);
        let immediate_retrigger = has_key_on && new_bit && !key_change;

        if !key_change && !immediate_retrigger {
            return;
        }

        if old_bit || immediate_retrigger {
            self.push(Event::NoteOff, Origin::Channel(c));
        }

        if new_bit {
            let slots = four_op_slots(&self.state, c);
            let (feedback, connection_bit) = self
                .state
                .read_feedback_connection(ChipState::channel_offset(c));
            let connection = if connection_bit != 0 { Connection::Am } else { Connection::Fm };
            let patch = self.read_opl_patch(&slots, feedback, connection, Rhythm::No);
            let velocity = velocity_from_patch(&patch);
            let (fnum, block) = read_fnum_block(&self.state, ChipState::channel_offset(c));
            let frequency_hz = ChipState::fnum_to_frequency(fnum, block);
            let instrument_index = self.patches.find_or_append(Patch::Opl(patch));
            self.push(
                Event::NoteOn {
                    frequency_hz,
                    velocity,
                    instrument_index,
                },
                Origin::Channel(c),
            );
        }
    }

    fn resolve_rhythm_voice(&mut self, r: Rhythm) {
        let mask = r.bit_mask();
        let old_bit = self.prev.get(0xBD) & mask != 0;
        let new_bit = self.state.get(0xBD) & mask != 0;
        let key_change = old_bit != new_bit;
        let voice = VoiceId::Rhythm(r);
        let has_key_on = *self.has_key_on.get(&voice).unwrap_or(&false);
        let immediate_retrigger = has_key_on && new_bit && !key_change;

        if !key_change && !immediate_retrigger {
            return;
        }

        if old_bit || immediate_retrigger {
            self.push(Event::NoteOff, Origin::Rhythm(r));
        }

        if new_bit {
            let (channel, slot_indices) = r.channel_slots();
            let mut slots: [Option<u16>; 4] = [None, None, None, None];
            for &s in slot_indices {
                slots[s as usize] = Some(ChipState::operator_offset(channel, s));
            }
            let (feedback, connection_bit) = self
                .state
                .read_feedback_connection(ChipState::channel_offset(channel));
            let connection = if connection_bit != 0 { Connection::Am } else { Connection::Fm };
            let patch = self.read_opl_patch(&slots, feedback, connection, r);
            let velocity = velocity_from_patch(&patch);
            let (fnum, block) = read_fnum_block(&self.state, ChipState::channel_offset(channel));
            let frequency_hz = ChipState::fnum_to_frequency(fnum, block);
            let instrument_index = self.patches.find_or_append(Patch::Opl(patch));
            self.push(
                Event::NoteOn {
                    frequency_hz,
                    velocity,
                    instrument_index,
                },
                Origin::Rhythm(r),
            );
        }
    }

    fn read_opl_patch(
        &self,
        slots: &[Option<u16>; 4],
        feedback: u8,
        connection: Connection,
        rhythm: Rhythm,
    ) -> OplPatch {
        let mut params: [Option<OperatorParams>; 4] = [None, None, None, None];
        for (i, slot) in slots.iter().enumerate() {
            if let Some(offset) = slot {
                params[i] = Some(self.state.read_operator(*offset));
            }
        }
        OplPatch {
            slots: params,
            feedback,
            connection,
            rhythm,
            rhythm_note: 0,
            rhythm_transpose: 0,
        }
    }
}

fn keyon_register_channel(reg: u16) -> Option<u8> {
    // 0xB0..0xB8 (bank 0) and 0x1B0..0x1B8 (bank 1) are per-channel keyon
    // registers; everything else doesn't carry a keyon bit.
    let bank = reg & 0x100;
    let local = reg & 0xFF;
    if (0xB0..=0xB8).contains(&local) {
        let local_c = (local - 0xB0) as u8;
        Some(local_c + if bank != 0 { 9 } else { 0 })
    } else {
        None
    }
}

fn is_four_op_secondary(state: &ChipState, c: u8) -> bool {
    let primary = match c {
        3 => 0,
        4 => 1,
        5 => 2,
        12 => 9,
        13 => 10,
        14 => 11,
        _ => return false,
    };
    match four_op_bit_index(primary) {
        Some(bit) => state.get(0x104) & (1 << bit) != 0,
        None => false,
    }
}

/// Operator offsets for channel `c`'s up to four slots: two for a normal
/// two-operator voice, or four when `c` is a four-op primary with its
/// pair's bit set in 0x104.
fn four_op_slots(state: &ChipState, c: u8) -> [Option<u16>; 4] {
    let mut slots = [None, None, None, None];
    slots[0] = Some(ChipState::operator_offset(c, 0));
    slots[1] = Some(ChipState::operator_offset(c, 1));

    let four_op_primary = matches!(c, 0 | 1 | 2 | 9 | 10 | 11);
    if four_op_primary {
        if let Some(bit) = four_op_bit_index(c) {
            if state.get(0x104) & (1 << bit) != 0 {
                let secondary = c + 3;
                slots[2] = Some(ChipState::operator_offset(secondary, 0));
                slots[3] = Some(ChipState::operator_offset(secondary, 1));
            }
        }
    }
    slots
}

fn read_fnum_block(state: &ChipState, channel_offset: u16) -> (u16, u8) {
    let lo = state.get(0xA0 + channel_offset);
    let hi = state.get(0xB0 + channel_offset);
    let fnum = ((hi as u16 & 0x03) << 8) | lo as u16;
    let block = (hi >> 2) & 0x07;
    (fnum, block)
}

/// The "carrier" operator used for per-note velocity: slot 1 if present,
/// else slot 0 — the same rule [`OplPatch::equals`] uses to pick the
/// velocity slot.
fn velocity_from_patch(patch: &OplPatch) -> f64 {
    let slot = if patch.slots[1].is_some() { 1 } else { 0 };
    let output_level = patch.slots[slot].map(|op| op.output_level).unwrap_or(63);
    1.0 - ((1 + output_level) as f64).ln() / 64f64.ln()
}

/// Parse a finite stream of `(reg,val)`/`delay`/`tempo` items into an
/// event list and instrument table. The first event is always the
/// caller-supplied `initial_tempo`.
pub fn parse(initial_tempo: Tempo, items: impl IntoIterator<Item = OplItem>) -> Result<ParseOutput> {
    let mut p = Parser::new();
    p.push(Event::Tempo(initial_tempo), Origin::Global);

    for item in items {
        match item {
            OplItem::Reg { reg, val } => p.handle_reg(reg, val)?,
            OplItem::Delay { ticks } => p.handle_delay(ticks),
            OplItem::Tempo(t) => p.handle_tempo(t),
        }
        p.seen_first_item = true;
    }

    // Final implicit flush: a trailing keyoff (or other state change) with
    // no following delay must still be observable.
    p.flush();

    Ok(ParseOutput {
        events: p.events,
        origins: p.origins,
        patches: p.patches.into_vec(),
    })
}
