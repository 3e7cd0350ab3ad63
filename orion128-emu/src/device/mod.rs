// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod keyboard;

pub use self::keyboard::{translate_key, Key, KeyEvent, Keyboard, KEYBOARD_QUEUE_SIZE};
