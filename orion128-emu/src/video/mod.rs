// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod color;
mod dirty;
mod renderer;

pub use self::color::{Color, Palette};
pub use self::dirty::{DirtyRect, DirtyTracker, FULL_REFRESH, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use self::renderer::{decode_colors, Invalidation, RefreshWorker, VIDEO_QUEUE_SIZE};
