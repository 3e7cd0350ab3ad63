// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use orion128_core::Rect;

// Design:
//   Byte invalidations from the CPU arrive one address at a time; the
//   tracker folds them into a single bounding box in byte coordinates
//   (x = address high byte, one unit per 8-pixel column; y = low byte).
//   When a new address would stretch the box past 8 columns or 64 rows,
//   the current box is emitted and a fresh one is seeded from the new
//   address, which bounds the size of any single refresh.

pub const SCREEN_WIDTH: u32 = 384;
pub const SCREEN_HEIGHT: u32 = 256;

/// Sentinel invalidation address: repaint the whole screen.
pub const FULL_REFRESH: u16 = 0xffff;

const MAX_SPAN_X: u8 = 7;
const MAX_SPAN_Y: u8 = 63;

/// Dirty bounding box in video byte coordinates, inclusive on both ends.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DirtyRect {
    pub min_x: u8,
    pub min_y: u8,
    pub max_x: u8,
    pub max_y: u8,
}

impl DirtyRect {
    fn seed(x: u8, y: u8) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn union(&self, x: u8, y: u8) -> Self {
        Self {
            min_x: self.min_x.min(x),
            min_y: self.min_y.min(y),
            max_x: self.max_x.max(x),
            max_y: self.max_y.max(y),
        }
    }

    /// Convert to pixel coordinates: columns are 8 pixels wide.
    pub fn to_screen_rect(self) -> Rect {
        Rect::new(
            u32::from(self.min_x) << 3,
            u32::from(self.min_y),
            (u32::from(self.max_x - self.min_x) + 1) << 3,
            u32::from(self.max_y - self.min_y) + 1,
        )
    }
}

pub struct DirtyTracker {
    bounds: Option<DirtyRect>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self { bounds: None }
    }

    /// Fold one invalidated address into the box. Returns the previously
    /// accumulated box when the union would exceed the span limits; the
    /// new address then seeds a fresh box.
    pub fn apply(&mut self, addr: u16) -> Option<DirtyRect> {
        let addr = addr & 0x3fff;
        let x = (addr >> 8) as u8;
        let y = addr as u8;
        match self.bounds {
            None => {
                self.bounds = Some(DirtyRect::seed(x, y));
                None
            }
            Some(current) => {
                let union = current.union(x, y);
                if union.max_x - union.min_x > MAX_SPAN_X
                    || union.max_y - union.min_y > MAX_SPAN_Y
                {
                    self.bounds = Some(DirtyRect::seed(x, y));
                    Some(current)
                } else {
                    self.bounds = Some(union);
                    None
                }
            }
        }
    }

    /// Emit whatever is pending; used when the invalidation queue drains.
    pub fn flush(&mut self) -> Option<DirtyRect> {
        self.bounds.take()
    }

    pub fn reset(&mut self) {
        self.bounds = None;
    }
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_address_seeds_the_box() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(None, tracker.apply(0x0102));
        assert_eq!(
            Some(DirtyRect {
                min_x: 1,
                min_y: 2,
                max_x: 1,
                max_y: 2
            }),
            tracker.flush()
        );
        assert_eq!(None, tracker.flush());
    }

    #[test]
    fn nearby_addresses_coalesce() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(None, tracker.apply(0x0100));
        assert_eq!(None, tracker.apply(0x0103));
        assert_eq!(None, tracker.apply(0x0301));
        assert_eq!(
            Some(DirtyRect {
                min_x: 1,
                min_y: 0,
                max_x: 3,
                max_y: 3
            }),
            tracker.flush()
        );
    }

    #[test]
    fn tall_union_emits_current_box_and_reseeds() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(None, tracker.apply(0x0100));
        assert_eq!(None, tracker.apply(0x0103));
        // Union with (5, 0x40) spans 0x40 rows, past the 64-row limit.
        assert_eq!(
            Some(DirtyRect {
                min_x: 1,
                min_y: 0,
                max_x: 1,
                max_y: 3
            }),
            tracker.apply(0x0540)
        );
        assert_eq!(
            Some(DirtyRect {
                min_x: 5,
                min_y: 0x40,
                max_x: 5,
                max_y: 0x40
            }),
            tracker.flush()
        );
    }

    #[test]
    fn wide_union_emits_current_box_and_reseeds() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(None, tracker.apply(0x0000));
        assert_eq!(None, tracker.apply(0x0700));
        assert_eq!(
            Some(DirtyRect {
                min_x: 0,
                min_y: 0,
                max_x: 7,
                max_y: 0
            }),
            tracker.apply(0x0800)
        );
    }

    #[test]
    fn address_is_masked_to_fourteen_bits() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(None, tracker.apply(0xc102));
        assert_eq!(
            Some(DirtyRect {
                min_x: 1,
                min_y: 2,
                max_x: 1,
                max_y: 2
            }),
            tracker.flush()
        );
    }

    #[test]
    fn screen_rect_scales_columns() {
        let rect = DirtyRect {
            min_x: 1,
            min_y: 0,
            max_x: 1,
            max_y: 3,
        }
        .to_screen_rect();
        assert_eq!(Rect::new(8, 0, 8, 4), rect);
    }
}
