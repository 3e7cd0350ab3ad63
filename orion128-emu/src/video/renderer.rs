// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use log::{log_enabled, trace, Level};
use orion128_core::{Bitmap, DisplaySink, Rect, Shared};

use super::color::{Color, Palette};
use super::dirty::{DirtyTracker, FULL_REFRESH, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::mem::Memory;

// Design:
//   The refresh worker owns the consumer end of the invalidation queue.
//   While addresses keep arriving it only grows the dirty box; when the
//   queue goes quiet for a tick, or the box would grow past its span
//   limits, the box is rendered. Rendering tiles the rectangle into
//   bitmaps of at most 64x64 pixels, decodes each against the current
//   memory state and ships it to the display sink, centered on the
//   physical canvas. The worker exits when the producer disconnects.

pub const VIDEO_QUEUE_SIZE: usize = 0x1000;

const BLOCK_SIZE: u32 = 64;
const DRAIN_TICK: Duration = Duration::from_millis(1);

/// One queued video-memory invalidation. The word marker is captured when
/// the CPU step that produced the write finishes, so a 16-bit store
/// invalidates the successor address as well.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Invalidation {
    pub addr: u16,
    pub word: bool,
}

/// Decode eight pixels from a pair of plane bytes into packed 4-bit
/// palette indices, most significant nibble first.
pub fn decode_colors(mut page0: u8, mut page1: u8, mode: u8) -> u32 {
    let mut colors = 0u32;
    match mode & 7 {
        0 => {
            for _ in 0..8 {
                let color = if page0 & 1 != 0 {
                    Color::Green
                } else {
                    Color::Black
                };
                colors = colors << 4 | u32::from(color.index());
                page0 >>= 1;
            }
        }
        1 => {
            for _ in 0..8 {
                let color = if page0 & 1 != 0 {
                    Color::LightCyan
                } else {
                    Color::LightBlue
                };
                colors = colors << 4 | u32::from(color.index());
                page0 >>= 1;
            }
        }
        // Blanked.
        2 | 3 => {}
        4 | 5 => {
            for _ in 0..8 {
                let color = if page1 & 1 != 0 {
                    if page0 & 1 != 0 {
                        Color::Blue
                    } else {
                        Color::Red
                    }
                } else if page0 & 1 != 0 {
                    Color::Green
                } else {
                    Color::Black
                };
                colors = colors << 4 | u32::from(color.index());
                page0 >>= 1;
                page1 >>= 1;
            }
        }
        _ => {
            let lo = u32::from(page1 & 0x0f);
            let hi = u32::from((page1 >> 4) & 0x0f);
            for _ in 0..8 {
                let nibble = if page0 & 1 != 0 { lo } else { hi };
                colors = colors << 4 | nibble;
                page0 >>= 1;
            }
        }
    }
    colors
}

// Offset of a canvas pixel within the RAM pages: the column lands in bits
// 13-8, the row in the low byte and the plane selection in the top two
// bits, inverted by the XOR.
fn video_offset(plane: u8, x: u32, y: u32) -> u16 {
    ((u16::from(plane & 3) << 14) | ((x as u16) << 5) & 0x3f00 | (y as u16 & 0xff)) ^ 0xc000
}

pub struct RefreshWorker {
    mem: Shared<Memory>,
    sink: Shared<dyn DisplaySink + Send>,
    queue: Receiver<Invalidation>,
    tracker: DirtyTracker,
    palette: [u16; 16],
    origin: (u32, u32),
}

impl RefreshWorker {
    pub fn new(
        mem: Shared<Memory>,
        sink: Shared<dyn DisplaySink + Send>,
        queue: Receiver<Invalidation>,
    ) -> Self {
        let dim = sink.lock().unwrap().dimension();
        let origin = (
            dim.width.saturating_sub(SCREEN_WIDTH) / 2,
            dim.height.saturating_sub(SCREEN_HEIGHT) / 2,
        );
        Self {
            mem,
            sink,
            queue,
            tracker: DirtyTracker::new(),
            palette: Palette::rgb555(),
            origin,
        }
    }

    pub fn run(mut self) {
        loop {
            match self.queue.recv_timeout(DRAIN_TICK) {
                Ok(invalidation) => self.process(invalidation),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(dirty) = self.tracker.flush() {
                        self.refresh_window(dirty.to_screen_rect());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(dirty) = self.tracker.flush() {
                        self.refresh_window(dirty.to_screen_rect());
                    }
                    break;
                }
            }
        }
    }

    fn process(&mut self, invalidation: Invalidation) {
        if invalidation.addr == FULL_REFRESH {
            self.refresh_window(Rect::new(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT));
            self.tracker.reset();
            return;
        }
        if let Some(dirty) = self.tracker.apply(invalidation.addr) {
            self.refresh_window(dirty.to_screen_rect());
        }
        if invalidation.word {
            if let Some(dirty) = self.tracker.apply(invalidation.addr.wrapping_add(1)) {
                self.refresh_window(dirty.to_screen_rect());
            }
        }
    }

    fn refresh_window(&mut self, window: Rect) {
        if log_enabled!(Level::Trace) {
            trace!(target: "video::refresh", "window {:?}", window);
        }
        let mut left = window.left;
        let mut width = window.width;
        while width > 0 {
            let dw = width.min(BLOCK_SIZE);
            let mut top = window.top;
            let mut height = window.height;
            while height > 0 {
                let dh = height.min(BLOCK_SIZE);
                self.refresh_block(Rect::new(left, top, dw, dh));
                top += dh;
                height -= dh;
            }
            left += dw;
            width -= dw;
        }
    }

    fn refresh_block(&mut self, block: Rect) {
        let bitmap = {
            let mem = self.mem.lock().unwrap();
            let mode = mem.video_mode();
            let plane = mem.video_plane();
            let mut bitmap = Bitmap::new(block.offset(self.origin.0, self.origin.1));
            for y in 0..block.height {
                let mut colors = 0u32;
                for x in 0..block.width {
                    let sx = block.left + x;
                    let sy = block.top + y;
                    if x == 0 || sx & 7 == 0 {
                        let (page0, page1) = mem.video_pair(video_offset(plane, sx, sy));
                        colors = decode_colors(page0, page1, mode);
                    }
                    let index = (colors >> (28 - 4 * (sx & 7))) & 0x0f;
                    bitmap.put(x, y, self.palette[index as usize]);
                }
            }
            bitmap
        };
        self.sink.lock().unwrap().refresh(&bitmap);
    }
}
