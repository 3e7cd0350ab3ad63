// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod memory;

pub use self::memory::{Memory, PortGroup, RAM_PAGE0_SIZE, RAM_PAGE1_SIZE};
