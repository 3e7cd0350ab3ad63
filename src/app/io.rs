// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::io::{self, Read};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};

use log::debug;
use orion128_emu::device::{translate_key, KeyEvent};

// Keys arrive as single bytes or ESC [ / ESC O sequences; prefix bytes
// shift left so a whole sequence accumulates into one code before it is
// translated. The send blocks when the queue is full.

pub fn spawn_reader(sender: SyncSender<KeyEvent>) -> JoinHandle<()> {
    thread::spawn(move || read_keys(io::stdin(), sender))
}

fn read_keys<R: Read>(reader: R, sender: SyncSender<KeyEvent>) {
    let mut code: u32 = 0;
    for byte in reader.bytes() {
        let byte = match byte {
            Ok(byte) => byte,
            Err(err) => {
                debug!(target: "app::io", "stdin closed: {}", err);
                break;
            }
        };
        code |= u32::from(byte);
        if code == 0x1b || code == 0x1b5b || code == 0x1b4f {
            code <<= 8;
            continue;
        }
        if let Some(event) = translate_key(code) {
            if sender.send(event).is_err() {
                break;
            }
        }
        code = 0;
    }
}
