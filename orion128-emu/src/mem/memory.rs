// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::{ByteOrder, LittleEndian};
use log::{log_enabled, trace, Level};
use orion128_core::{Bus, Error, Ram, Rom};

// Design:
//   The fabric resolves every 16-bit address to one of: RAM page 0, RAM
//   page 1, the boot ROM mirror, a PPI port group, a scalar port, or a
//   discard sink. Until the first write to port F8 (rom_init) the read map
//   collapses to ROM so the machine boots from the monitor; the write map
//   is always live, since that first F8 write has to land somewhere.
//   Port writes latch side-effect events that the keyboard, video and
//   ROM-disk logic drain once per machine step.

/// Page 0 backs 0x0000-0xefff plus the low part of the 0xf000 window.
pub const RAM_PAGE0_SIZE: usize = 0xf400;
/// Page 1 backs 0x0000-0xefff in the alternate bank.
pub const RAM_PAGE1_SIZE: usize = 0xf000;

const ROM_MASK: u16 = 0x07ff;

/// One PPI-style group of four sub-ports selected by the low two address
/// bits.
#[derive(Copy, Clone, Debug)]
pub struct PortGroup {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub ctrl: u8,
}

impl PortGroup {
    fn new() -> Self {
        Self {
            a: 0xff,
            b: 0xff,
            c: 0xff,
            ctrl: 0xff,
        }
    }

    fn read(&self, address: u16) -> u8 {
        match address & 0x03 {
            0 => self.a,
            1 => self.b,
            2 => self.c,
            _ => self.ctrl,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address & 0x03 {
            0 => self.a = value,
            1 => self.b = value,
            2 => self.c = value,
            _ => self.ctrl = value,
        }
    }
}

pub struct Memory {
    // Backing stores
    ram_page0: Ram,
    ram_page1: Ram,
    rom: Rom,
    rom_disk: Vec<u8>,
    // Port registers
    port_f4r: PortGroup,
    port_f4w: PortGroup,
    port_f5: PortGroup,
    port_f6: PortGroup,
    port_f7: PortGroup,
    port_f8: u8,
    port_f9: u8,
    port_fa: u8,
    port_fb: u8,
    // Events since the last step
    rom_init: bool,
    set_keyboard: bool,
    set_video_mode: bool,
    set_ram_page: bool,
    set_video_buf: bool,
    set_rom_disk: bool,
    video_addr: u16,
}

impl Memory {
    pub fn new(rom_image: &[u8], rom_disk: &[u8]) -> Result<Self, Error> {
        if rom_image.is_empty() {
            return Err(Error::InvalidState("boot ROM image is empty"));
        }
        let mut mem = Self {
            ram_page0: Ram::new(RAM_PAGE0_SIZE),
            ram_page1: Ram::new(RAM_PAGE1_SIZE),
            rom: Rom::new(rom_image, ROM_MASK),
            rom_disk: rom_disk.to_vec(),
            port_f4r: PortGroup::new(),
            port_f4w: PortGroup::new(),
            port_f5: PortGroup::new(),
            port_f6: PortGroup::new(),
            port_f7: PortGroup::new(),
            port_f8: 0,
            port_f9: 0,
            port_fa: 0,
            port_fb: 0,
            rom_init: false,
            set_keyboard: false,
            set_video_mode: false,
            set_ram_page: false,
            set_video_buf: false,
            set_rom_disk: false,
            video_addr: 0,
        };
        mem.reset();
        Ok(mem)
    }

    pub fn reset(&mut self) {
        self.port_f4r = PortGroup::new();
        self.port_f4w = PortGroup::new();
        self.port_f5 = PortGroup::new();
        self.port_f6 = PortGroup::new();
        self.port_f7 = PortGroup::new();
        self.port_f8 = 0;
        self.port_f9 = 0;
        self.port_fa = 0;
        self.port_fb = 0;
        self.rom_init = false;
        self.set_keyboard = false;
        self.set_video_mode = false;
        self.set_ram_page = false;
        self.set_video_buf = false;
        self.set_rom_disk = false;
        self.video_addr = 0;
    }

    /// Load the initial RAM image into page 1, truncated to its capacity.
    pub fn load_ram(&mut self, image: &[u8]) {
        self.ram_page1.load(image);
    }

    /// Service events the fabric handles itself: the ROM-disk address
    /// latch answers combinationally through port F5, and a page switch
    /// is only worth a trace line.
    pub fn step(&mut self) {
        if self.set_rom_disk {
            self.set_rom_disk = false;
            let addr = LittleEndian::read_u16(&[self.port_f5.b, self.port_f5.c]);
            self.port_f5.a = self.rom_disk.get(addr as usize).copied().unwrap_or(0xff);
        }
        if self.take_ram_page() && log_enabled!(Level::Trace) {
            trace!(target: "mem::banks", "switching to page {}", self.port_f9 & 3);
        }
    }

    // -- Event accessors; all drain on read.

    pub fn take_keyboard_strobe(&mut self) -> bool {
        std::mem::replace(&mut self.set_keyboard, false)
    }

    pub fn take_video_mode(&mut self) -> bool {
        std::mem::replace(&mut self.set_video_mode, false)
    }

    pub fn take_video_buf(&mut self) -> bool {
        std::mem::replace(&mut self.set_video_buf, false)
    }

    pub fn take_ram_page(&mut self) -> bool {
        std::mem::replace(&mut self.set_ram_page, false)
    }

    /// Address of the last write that landed in the active video plane,
    /// if any since the previous call.
    pub fn take_video_addr(&mut self) -> Option<u16> {
        if self.video_addr != 0 {
            Some(std::mem::replace(&mut self.video_addr, 0))
        } else {
            None
        }
    }

    // -- Port accessors

    pub fn is_rom_init(&self) -> bool {
        self.rom_init
    }

    pub fn port_f4w(&self) -> &PortGroup {
        &self.port_f4w
    }

    pub fn port_f4r(&self) -> &PortGroup {
        &self.port_f4r
    }

    pub fn port_f4r_mut(&mut self) -> &mut PortGroup {
        &mut self.port_f4r
    }

    pub fn port_f5(&self) -> &PortGroup {
        &self.port_f5
    }

    /// Low three bits select the pixel decoding mode.
    pub fn video_mode(&self) -> u8 {
        self.port_f8
    }

    /// Low two bits select the RAM quadrant scanned out to the screen.
    pub fn video_plane(&self) -> u8 {
        self.port_fa
    }

    /// Both pages at the same offset; multi-color modes combine them.
    pub fn video_pair(&self, offset: u16) -> (u8, u8) {
        (self.ram_page0.read(offset), self.ram_page1.read(offset))
    }
}

impl Bus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        if !self.rom_init {
            return self.rom.read(address);
        }
        match address & 0xfc00 {
            0xf000 => self.ram_page0.read(address),
            0xf400 => match address & 0x0300 {
                0x0000 => self.port_f4r.read(address),
                0x0100 => self.port_f5.read(address),
                0x0200 => self.port_f6.read(address),
                _ => self.port_f7.read(address),
            },
            0xf800 | 0xfc00 => self.rom.read(address),
            _ => match self.port_f9 & 3 {
                0 => self.ram_page0.read(address),
                1 => self.ram_page1.read(address),
                _ => 0xff,
            },
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address & 0xfc00 {
            0xf000 => self.ram_page0.write(address, value),
            0xf400 => match address & 0x0300 {
                0x0000 => {
                    self.set_keyboard = true;
                    self.port_f4w.write(address, value);
                }
                0x0100 => {
                    self.set_rom_disk = true;
                    self.port_f5.write(address, value);
                }
                0x0200 => self.port_f6.write(address, value),
                _ => self.port_f7.write(address, value),
            },
            0xf800 => match address & 0x0300 {
                0x0000 => {
                    self.rom_init = true;
                    self.set_video_mode = true;
                    self.port_f8 = value;
                }
                0x0100 => {
                    self.set_ram_page = true;
                    self.port_f9 = value;
                }
                0x0200 => {
                    self.set_video_buf = true;
                    self.port_fa = value;
                }
                _ => self.port_fb = value,
            },
            // ROM mirror; the write is absorbed.
            0xfc00 => {}
            _ => {
                if self.rom_init
                    && address & 0xc000 == u16::from((self.port_fa & 3) ^ 3) << 14
                    && address & 0x3000 != 0x3000
                {
                    self.video_addr = address;
                }
                match self.port_f9 & 3 {
                    0 => self.ram_page0.write(address, value),
                    1 => self.ram_page1.write(address, value),
                    _ => {}
                }
            }
        }
    }
}
