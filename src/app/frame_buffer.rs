// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use orion128_core::{Bitmap, Dimension, DisplaySink};
use orion128_emu::system::{Config, Orientation};

/// Memory-backed RGB555 display sink. The physical LCD drivers live on
/// the other side of the DisplaySink interface; this sink applies the
/// same presentation options they would (orientation and mirroring) and
/// keeps the composed frame addressable for inspection.
pub struct FrameBuffer {
    dim: Dimension,
    flip_vertically: bool,
    flip_horizontally: bool,
    pixels: Vec<u16>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, config: &Config) -> Self {
        let dim = match config.orientation {
            Orientation::Landscape => Dimension::new(width, height),
            Orientation::Portrait => Dimension::new(height, width),
        };
        Self {
            dim,
            flip_vertically: config.flip_vertically,
            flip_horizontally: config.flip_horizontally,
            pixels: vec![0; (dim.width * dim.height) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        self.pixels[(y * self.dim.width + x) as usize]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        let px = if self.flip_horizontally {
            self.dim.width - 1 - x
        } else {
            x
        };
        let py = if self.flip_vertically {
            self.dim.height - 1 - y
        } else {
            y
        };
        (py * self.dim.width + px) as usize
    }
}

impl DisplaySink for FrameBuffer {
    fn dimension(&self) -> Dimension {
        self.dim
    }

    fn refresh(&mut self, bitmap: &Bitmap) {
        let bounds = bitmap.bounds;
        for y in 0..bounds.height {
            for x in 0..bounds.width {
                let px = bounds.left + x;
                let py = bounds.top + y;
                // A canvas wider than the display (portrait) is clipped.
                if px >= self.dim.width || py >= self.dim.height {
                    continue;
                }
                let index = self.index(px, py);
                self.pixels[index] = bitmap.pixels[(y * bounds.width + x) as usize];
            }
        }
    }
}
