// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use bit_field::BitField;
use log::debug;

use crate::mem::Memory;

// Design:
//   The emulated machine scans an 8x8 key matrix through the F4 port
//   group: it writes an inverted row-selection mask to F4W.A and reads the
//   combined column lines back from F4R.B, with modifier lines routed into
//   the upper nibble of F4R.C. The host feeds translated key codes through
//   a bounded queue; a synthesized press stays visible for a fixed number
//   of steps, then releases.

pub const KEYBOARD_QUEUE_SIZE: usize = 16;

// Steps a synthesized key press remains visible to the emulated machine.
const PRESS_VISIBILITY: u32 = 10_000;

/// Internal 7-bit key code: bit 6 marks a modifier latch, bits 5:3 the
/// matrix row and bits 2:0 the column.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Key(pub u8);

impl Key {
    pub const HOME: Key = Key(0x00);
    pub const CLEAR: Key = Key(0x01);
    pub const ESC: Key = Key(0x02);
    pub const F1: Key = Key(0x03);
    pub const F2: Key = Key(0x04);
    pub const F3: Key = Key(0x05);
    pub const F4: Key = Key(0x06);
    pub const F5: Key = Key(0x07);
    pub const TAB: Key = Key(0x08);
    pub const LINEFEED: Key = Key(0x09);
    pub const ENTER: Key = Key(0x0a);
    pub const BACKSPACE: Key = Key(0x0b);
    pub const LEFT: Key = Key(0x0c);
    pub const UP: Key = Key(0x0d);
    pub const RIGHT: Key = Key(0x0e);
    pub const DOWN: Key = Key(0x0f);
    pub const NUM_0: Key = Key(0x10);
    pub const COLON: Key = Key(0x1a);
    pub const SEMICOLON: Key = Key(0x1b);
    pub const COMMA: Key = Key(0x1c);
    pub const MINUS: Key = Key(0x1d);
    pub const PERIOD: Key = Key(0x1e);
    pub const SLASH: Key = Key(0x1f);
    pub const AT: Key = Key(0x20);
    pub const A: Key = Key(0x21);
    pub const LEFT_BRACKET: Key = Key(0x3b);
    pub const BACKSLASH: Key = Key(0x3c);
    pub const RIGHT_BRACKET: Key = Key(0x3d);
    pub const CARET: Key = Key(0x3e);
    pub const SPACE: Key = Key(0x3f);
    pub const US: Key = Key(0x42);
    pub const SS: Key = Key(0x44);
    pub const RUS: Key = Key(0x48);

    pub fn row(self) -> usize {
        ((self.0 >> 3) & 0x07) as usize
    }

    pub fn col(self) -> u8 {
        self.0 & 0x07
    }

    pub fn is_modifier(self) -> bool {
        self.0 & 0x40 != 0
    }
}

/// Host-side keyboard event delivered through the queue.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum KeyEvent {
    Press(Key),
    Tracing(bool),
}

// Multi-byte escape sequences accumulate into one code, prefix bytes in
// the high positions.
const SEQ_UP: u32 = 0x1b5b41;
const SEQ_DOWN: u32 = 0x1b5b42;
const SEQ_RIGHT: u32 = 0x1b5b43;
const SEQ_LEFT: u32 = 0x1b5b44;
const SEQ_END: u32 = 0x1b5b46;
const SEQ_HOME: u32 = 0x1b5b48;
const SEQ_F1: u32 = 0x1b4f50;
const SEQ_F2: u32 = 0x1b4f51;
const SEQ_F3: u32 = 0x1b4f52;
const SEQ_F4: u32 = 0x1b4f53;
const CODE_RUS: u32 = 0x0109;

/// Translate an accumulated host key code. Returns None for codes with no
/// mapping.
pub fn translate_key(code: u32) -> Option<KeyEvent> {
    let key = match code {
        SEQ_UP => Key::UP,
        SEQ_DOWN => Key::DOWN,
        SEQ_RIGHT => Key::RIGHT,
        SEQ_LEFT => Key::LEFT,
        SEQ_F1 => Key::F1,
        SEQ_F2 => Key::F2,
        SEQ_F3 => Key::F3,
        SEQ_F4 => Key::F4,
        SEQ_HOME => return Some(KeyEvent::Tracing(true)),
        SEQ_END => return Some(KeyEvent::Tracing(false)),
        CODE_RUS => Key::RUS,
        _ if code <= 0xff => match code as u8 {
            b'[' => Key::LEFT_BRACKET,
            b']' => Key::RIGHT_BRACKET,
            b'\\' => Key::BACKSLASH,
            b'@' => Key::AT,
            b' ' => Key::SPACE,
            b':' => Key::COLON,
            b';' => Key::SEMICOLON,
            b',' => Key::COMMA,
            b'.' => Key::PERIOD,
            b'`' => Key::ESC,
            0x08 => Key::BACKSPACE,
            0x09 => Key::TAB,
            0x0a => Key::ENTER,
            c @ b'0'..=b'9' => Key(Key::NUM_0.0 + (c - b'0')),
            c @ b'a'..=b'z' => Key(Key::A.0 + (c - b'a')),
            _ => {
                debug!(target: "kbd", "unknown key: 0x{:02x}", code);
                return None;
            }
        },
        _ => {
            debug!(target: "kbd", "unknown key: 0x{:02x}", code);
            return None;
        }
    };
    Some(KeyEvent::Press(key))
}

pub struct Keyboard {
    fields: [u8; 8],
    flags: u8,
    count: u32,
    tracing: bool,
    queue: Receiver<KeyEvent>,
}

impl Keyboard {
    pub fn new() -> (Self, SyncSender<KeyEvent>) {
        let (tx, rx) = sync_channel(KEYBOARD_QUEUE_SIZE);
        let keyboard = Self {
            fields: [0; 8],
            flags: 0xff,
            count: 0,
            tracing: false,
            queue: rx,
        };
        (keyboard, tx)
    }

    pub fn reset(&mut self) {
        self.fields = [0; 8];
        self.flags = 0xff;
        self.count = 0;
        self.tracing = false;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// Latch a key into the matrix (or the modifier lines) and arm the
    /// press-visibility countdown.
    pub fn key_press(&mut self, key: Key) {
        if key.is_modifier() {
            self.flags = !(key.0 << 4) & 0xf0;
        } else {
            self.fields[key.row()] = 1 << key.col();
        }
        self.count = PRESS_VISIBILITY;
    }

    /// Runs once per emulated instruction: age the active press, pull the
    /// next host event when idle, and answer a pending matrix scan.
    pub fn step(&mut self, mem: &mut Memory) {
        if self.count > 0 {
            self.count -= 1;
            if self.count == 0 {
                self.fields = [0; 8];
                self.flags = mem.port_f4w().c | 0xf0;
                mem.port_f4r_mut().b = 0xff;
            }
            let composed = (mem.port_f4w().c & 0x0f) | self.flags;
            mem.port_f4r_mut().c = composed;
        } else if let Ok(event) = self.queue.try_recv() {
            match event {
                KeyEvent::Press(key) => self.key_press(key),
                KeyEvent::Tracing(enabled) => self.tracing = enabled,
            }
        }

        if mem.take_keyboard_strobe() {
            // Row-selection mask arrives inverted: a zero bit selects.
            let selected = !mem.port_f4w().a;
            let mut columns = 0u8;
            for (row, field) in self.fields.iter().enumerate() {
                if selected.get_bit(row) {
                    columns |= field;
                }
            }
            mem.port_f4r_mut().b = !columns;
        }
    }
}
