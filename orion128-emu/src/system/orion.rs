// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::info;
use orion128_core::{new_shared, DisplaySink, Error, Shared};

use crate::cpu::Cpu8080;
use crate::device::{KeyEvent, Keyboard};
use crate::mem::Memory;
use crate::system::Config;
use crate::video::{Invalidation, RefreshWorker, FULL_REFRESH, VIDEO_QUEUE_SIZE};

// Design:
//   Orion128 represents the machine itself: it owns the CPU, the memory
//   fabric and the keyboard adapter, and runs the video refresh worker on
//   its own thread. Each step executes one instruction, then services the
//   subsystems in a fixed order: video events are drained before the
//   keyboard and the fabric run, so an invalidated address is captured
//   before anything can clear it. The blocking enqueue into the bounded
//   video queue happens after the memory lock is released; a full queue
//   must not stall a worker that needs the lock to render.

const SPEED_REPORT_CYCLES: u64 = 5_000_000;

struct SpeedMeter {
    last_cycles: u64,
    timestamp: Instant,
}

impl SpeedMeter {
    fn new() -> Self {
        Self {
            last_cycles: 0,
            timestamp: Instant::now(),
        }
    }

    fn update(&mut self, cycles: u64) {
        if cycles.wrapping_sub(self.last_cycles) >= SPEED_REPORT_CYCLES {
            let elapsed = self.timestamp.elapsed().as_micros().max(1) as f64;
            let mhz = (cycles - self.last_cycles) as f64 / elapsed;
            info!(target: "system::speed", "speed: {:.2}MHz", mhz);
            self.last_cycles = cycles;
            self.timestamp = Instant::now();
        }
    }
}

pub struct Orion128 {
    config: Config,
    cpu: Cpu8080,
    mem: Shared<Memory>,
    keyboard: Keyboard,
    key_sender: SyncSender<KeyEvent>,
    video_sender: Option<SyncSender<Invalidation>>,
    video_worker: Option<JoinHandle<()>>,
    pending: Vec<Invalidation>,
    keyboard_tracing: bool,
    speed: SpeedMeter,
}

impl Orion128 {
    pub fn new(
        config: Config,
        sink: Shared<dyn DisplaySink + Send>,
        rom: &[u8],
        rom_disk: &[u8],
        ram_image: &[u8],
    ) -> Result<Self, Error> {
        let mut mem = Memory::new(rom, rom_disk)?;
        mem.load_ram(ram_image);
        let mem = new_shared(mem);
        let (keyboard, key_sender) = Keyboard::new();
        let (video_sender, video_receiver) = sync_channel(VIDEO_QUEUE_SIZE);
        let worker = RefreshWorker::new(mem.clone(), sink, video_receiver);
        let video_worker = thread::spawn(move || worker.run());
        let mut cpu = Cpu8080::new();
        cpu.set_tracing(config.trace);
        Ok(Self {
            config,
            cpu,
            mem,
            keyboard,
            key_sender,
            video_sender: Some(video_sender),
            video_worker: Some(video_worker),
            pending: Vec::new(),
            keyboard_tracing: false,
            speed: SpeedMeter::new(),
        })
    }

    /// Producer end of the keyboard queue, handed to the host-side key
    /// acquisition thread.
    pub fn key_sender(&self) -> SyncSender<KeyEvent> {
        self.key_sender.clone()
    }

    pub fn cpu(&self) -> &Cpu8080 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu8080 {
        &mut self.cpu
    }

    pub fn memory(&self) -> Shared<Memory> {
        self.mem.clone()
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.set_tracing(self.config.trace);
        self.mem.lock().unwrap().reset();
        self.keyboard.reset();
        self.keyboard_tracing = false;
    }

    /// Run one emulated instruction and service the machine:
    /// CPU, video, keyboard, memory, strictly in that order.
    pub fn step(&mut self) {
        {
            let mut mem = self.mem.lock().unwrap();
            self.cpu.step(&mut *mem);
            if mem.take_video_mode() {
                self.pending.push(Invalidation {
                    addr: FULL_REFRESH,
                    word: false,
                });
            }
            if mem.take_video_buf() {
                self.pending.push(Invalidation {
                    addr: FULL_REFRESH,
                    word: false,
                });
            }
            if let Some(addr) = mem.take_video_addr() {
                self.pending.push(Invalidation {
                    addr,
                    word: self.cpu.is_word_write(),
                });
            }
            self.keyboard.step(&mut mem);
            mem.step();
        }
        if self.keyboard.is_tracing() != self.keyboard_tracing {
            self.keyboard_tracing = self.keyboard.is_tracing();
            self.cpu.set_tracing(self.keyboard_tracing || self.config.trace);
        }
        if !self.pending.is_empty() {
            if let Some(sender) = &self.video_sender {
                for invalidation in self.pending.drain(..) {
                    sender.send(invalidation).ok();
                }
            }
        }
        if self.config.cycles {
            self.speed.update(self.cpu.get_cycles());
        }
    }
}

impl Drop for Orion128 {
    fn drop(&mut self) {
        // Disconnect the queue so the worker flushes and exits.
        self.video_sender.take();
        if let Some(worker) = self.video_worker.take() {
            worker.join().ok();
        }
    }
}
