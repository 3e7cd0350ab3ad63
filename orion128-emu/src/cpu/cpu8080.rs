// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::Level;
use orion128_core::Bus;

use super::disassembler;

// Spec: Intel 8080 Assembly Language Programming Manual
// Design:
//   The CPU decodes one instruction per step by splitting the opcode into
//   quadrant (bits 7:6), dst (bits 5:3) and src (bits 2:0) fields. All
//   memory traffic goes through the Bus capability passed to step, so the
//   register file never aliases backing storage. Pairs BC/DE/HL/PSW are
//   composed little-endian from adjacent file bytes.

// Instruction-encoding register index of the memory operand.
const REG_M: usize = 6;

// Register file slots. Pair aliasing dictates the layout: the low byte of
// each pair sits at the even slot.
const FILE_C: usize = 0;
const FILE_B: usize = 1;
const FILE_E: usize = 2;
const FILE_D: usize = 3;
const FILE_L: usize = 4;
const FILE_H: usize = 5;
const FILE_FLAGS: usize = 6;
const FILE_A: usize = 7;

// Register index to file slot. Entries 6 and 7 both name A; the M path is
// gated by an explicit index test before this table is consulted.
const REG_FILE: [usize; 8] = [
    FILE_B, FILE_C, FILE_D, FILE_E, FILE_H, FILE_L, FILE_A, FILE_A,
];

const RP_BC: usize = 0;
const RP_DE: usize = 1;
const RP_HL: usize = 2;
const RP_SP: usize = 3;

enum Flag {
    Carry = 0x01,
    Parity = 0x04,
    AuxCarry = 0x10,
    Zero = 0x40,
    Sign = 0x80,
}

#[derive(Copy, Clone, Debug)]
pub enum Register {
    B,
    C,
    D,
    E,
    H,
    L,
    Flags,
    A,
}

impl Register {
    fn file_slot(self) -> usize {
        match self {
            Register::B => FILE_B,
            Register::C => FILE_C,
            Register::D => FILE_D,
            Register::E => FILE_E,
            Register::H => FILE_H,
            Register::L => FILE_L,
            Register::Flags => FILE_FLAGS,
            Register::A => FILE_A,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum RegisterPair {
    BC,
    DE,
    HL,
    SP,
    PSW,
}

// Base cycle count per opcode; taken conditional branches add 6.
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
//  0   1   2   3   4   5   6   7
    4,  10, 7,  5,  5,  5,  7,  4,  // 0x00
    4,  10, 7,  5,  5,  5,  7,  4,  // 0x08
    4,  10, 7,  5,  5,  5,  7,  4,  // 0x10
    4,  10, 7,  5,  5,  5,  7,  4,  // 0x18
    4,  10, 16, 5,  5,  5,  7,  4,  // 0x20
    4,  10, 16, 5,  5,  5,  7,  4,  // 0x28
    4,  10, 13, 5,  10, 10, 10, 4,  // 0x30
    4,  10, 13, 5,  5,  5,  7,  4,  // 0x38

    5,  5,  5,  5,  5,  5,  7,  5,  // 0x40
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x48
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x50
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x58
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x60
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x68
    7,  7,  7,  7,  7,  7,  7,  7,  // 0x70
    5,  5,  5,  5,  5,  5,  7,  5,  // 0x78

    4,  4,  4,  4,  4,  4,  7,  4,  // 0x80
    4,  4,  4,  4,  4,  4,  7,  4,  // 0x88
    4,  4,  4,  4,  4,  4,  7,  4,  // 0x90
    4,  4,  4,  4,  4,  4,  7,  4,  // 0x98
    4,  4,  4,  4,  4,  4,  7,  4,  // 0xa0
    4,  4,  4,  4,  4,  4,  7,  4,  // 0xa8
    4,  4,  4,  4,  4,  4,  7,  4,  // 0xb0
    4,  4,  4,  4,  4,  4,  7,  4,  // 0xb8

    5,  10, 10, 10, 11, 11, 7,  11, // 0xc0
    5,  10, 10, 10, 11, 11, 7,  11, // 0xc8
    5,  10, 10, 10, 11, 11, 7,  11, // 0xd0
    5,  10, 10, 10, 11, 11, 7,  11, // 0xd8
    5,  10, 10, 18, 11, 11, 7,  11, // 0xe0
    5,  5,  10, 5,  11, 11, 7,  11, // 0xe8
    5,  10, 10, 4,  11, 11, 7,  11, // 0xf0
    5,  5,  10, 4,  11, 11, 7,  11, // 0xf8
];

// parity[v] == 1 iff popcount(v) is even.
#[rustfmt::skip]
const PARITY: [u8; 256] = [
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
];

struct Registers {
    file: [u8; 8],
    pc: u16,
    sp: u16,
}

impl Registers {
    fn new() -> Self {
        Self {
            file: [0; 8],
            pc: 0,
            sp: 0,
        }
    }

    fn reset(&mut self) {
        self.file = [0; 8];
        self.pc = 0;
        self.sp = 0;
    }
}

pub struct Cpu8080 {
    regs: Registers,
    opcode: u8,
    is_word: bool,
    invalid: bool,
    cycles: u64,
    tracing: bool,
}

impl Cpu8080 {
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            opcode: 0,
            is_word: false,
            invalid: false,
            cycles: 0,
            tracing: false,
        }
    }

    pub fn reset(&mut self) {
        self.regs.reset();
        self.opcode = 0;
        self.is_word = false;
        self.invalid = false;
        self.cycles = 0;
    }

    // -- Getters/Setters

    pub fn get_register(&self, reg: Register) -> u8 {
        self.regs.file[reg.file_slot()]
    }

    pub fn set_register(&mut self, reg: Register, value: u8) {
        self.regs.file[reg.file_slot()] = value;
    }

    pub fn get_pair(&self, pair: RegisterPair) -> u16 {
        match pair {
            RegisterPair::BC => self.pair(RP_BC),
            RegisterPair::DE => self.pair(RP_DE),
            RegisterPair::HL => self.pair(RP_HL),
            RegisterPair::SP => self.regs.sp,
            RegisterPair::PSW => self.stack_pair(3),
        }
    }

    pub fn set_pair(&mut self, pair: RegisterPair, value: u16) {
        match pair {
            RegisterPair::BC => self.set_pair_raw(RP_BC, value),
            RegisterPair::DE => self.set_pair_raw(RP_DE, value),
            RegisterPair::HL => self.set_pair_raw(RP_HL, value),
            RegisterPair::SP => self.regs.sp = value,
            RegisterPair::PSW => self.set_stack_pair(3, value),
        }
    }

    pub fn get_pc(&self) -> u16 {
        self.regs.pc
    }

    pub fn set_pc(&mut self, value: u16) {
        self.regs.pc = value;
    }

    pub fn get_sp(&self) -> u16 {
        self.regs.sp
    }

    pub fn set_sp(&mut self, value: u16) {
        self.regs.sp = value;
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycles
    }

    /// True when the last executed instruction performed a 16-bit memory
    /// write (SHLD, PUSH, CALL, taken conditional call, RST). The video
    /// tracker uses this to invalidate two consecutive bytes.
    pub fn is_word_write(&self) -> bool {
        self.is_word
    }

    pub fn set_tracing(&mut self, enabled: bool) {
        self.tracing = enabled;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// Decode and execute one instruction at PC.
    pub fn step(&mut self, bus: &mut dyn Bus) {
        let save_pc = self.regs.pc;
        self.opcode = self.fetch_byte(bus);
        self.is_word = false;
        self.invalid = false;
        self.cycles += u64::from(CYCLES[self.opcode as usize]);
        let dst = ((self.opcode >> 3) & 0x07) as usize;
        let src = (self.opcode & 0x07) as usize;
        match self.opcode & 0xc0 {
            0x00 => match src {
                0 => {
                    // 0x00 is NOP; the remaining slots of this column are
                    // decode holes and execute as NOP.
                    if dst != 0 {
                        self.invalid = true;
                    }
                }
                1 => {
                    if dst & 1 != 0 {
                        self.cmd_dad(dst >> 1);
                    } else {
                        self.cmd_lxi(bus, dst >> 1);
                    }
                }
                2 => match dst {
                    0 => self.cmd_stax(bus, RP_BC),
                    1 => self.cmd_ldax(bus, RP_BC),
                    2 => self.cmd_stax(bus, RP_DE),
                    3 => self.cmd_ldax(bus, RP_DE),
                    4 => self.cmd_shld(bus),
                    5 => self.cmd_lhld(bus),
                    6 => self.cmd_sta(bus),
                    _ => self.cmd_lda(bus),
                },
                3 => {
                    if dst & 1 != 0 {
                        self.cmd_dcx(dst >> 1);
                    } else {
                        self.cmd_inx(dst >> 1);
                    }
                }
                4 => self.cmd_inr(bus, dst),
                5 => self.cmd_dcr(bus, dst),
                6 => self.cmd_mvi(bus, dst),
                _ => match dst {
                    0 => self.cmd_rlc(),
                    1 => self.cmd_rrc(),
                    2 => self.cmd_ral(),
                    3 => self.cmd_rar(),
                    4 => self.cmd_daa(),
                    5 => self.cmd_cma(),
                    6 => self.cmd_stc(),
                    _ => self.cmd_cmc(),
                },
            },
            0x40 => self.cmd_mov(bus, dst, src),
            0x80 => self.cmd_alu(bus, dst, src),
            _ => match src {
                0 => self.cmd_r(bus, dst),
                1 => {
                    if dst & 1 != 0 {
                        match dst >> 1 {
                            0 => self.cmd_ret(bus),
                            1 => self.invalid = true,
                            2 => self.cmd_pchl(),
                            _ => self.cmd_sphl(),
                        }
                    } else {
                        self.cmd_pop(bus, dst >> 1);
                    }
                }
                2 => self.cmd_j(bus, dst),
                3 => match dst {
                    0 => self.cmd_jmp(bus),
                    1 => self.invalid = true,
                    2 => self.cmd_out(bus),
                    3 => self.cmd_in(bus),
                    4 => self.cmd_xthl(bus),
                    5 => self.cmd_xchg(),
                    6 => self.cmd_di(),
                    _ => self.cmd_ei(),
                },
                4 => self.cmd_c(bus, dst),
                5 => {
                    if dst & 1 != 0 {
                        if dst == 1 {
                            self.cmd_call(bus);
                        } else {
                            self.invalid = true;
                        }
                    } else {
                        self.cmd_push(bus, dst >> 1);
                    }
                }
                6 => self.cmd_i(bus, dst),
                _ => self.cmd_rst(bus, dst),
            },
        }
        if self.tracing && log::log_enabled!(Level::Trace) {
            self.trace(bus, save_pc);
        }
    }

    // -- Fetch/Operand Ops

    fn fetch_byte(&mut self, bus: &mut dyn Bus) -> u8 {
        let byte = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self, bus: &mut dyn Bus) -> u16 {
        let word = bus.read_word(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(2);
        word
    }

    fn get_src(&mut self, bus: &mut dyn Bus, idx: usize) -> u8 {
        if idx == REG_M {
            bus.read(self.pair(RP_HL))
        } else {
            self.regs.file[REG_FILE[idx]]
        }
    }

    fn set_dst(&mut self, bus: &mut dyn Bus, idx: usize, value: u8) {
        if idx == REG_M {
            bus.write(self.pair(RP_HL), value);
        } else {
            self.regs.file[REG_FILE[idx]] = value;
        }
    }

    fn pair(&self, idx: usize) -> u16 {
        if idx == RP_SP {
            self.regs.sp
        } else {
            let lo = self.regs.file[idx * 2];
            let hi = self.regs.file[idx * 2 + 1];
            u16::from(hi) << 8 | u16::from(lo)
        }
    }

    fn set_pair_raw(&mut self, idx: usize, value: u16) {
        if idx == RP_SP {
            self.regs.sp = value;
        } else {
            self.regs.file[idx * 2] = value as u8;
            self.regs.file[idx * 2 + 1] = (value >> 8) as u8;
        }
    }

    // PUSH/POP address the PSW pair instead of SP at index 3: flags in the
    // low byte, A in the high byte.
    fn stack_pair(&self, idx: usize) -> u16 {
        let lo = self.regs.file[idx * 2];
        let hi = self.regs.file[idx * 2 + 1];
        u16::from(hi) << 8 | u16::from(lo)
    }

    fn set_stack_pair(&mut self, idx: usize, value: u16) {
        self.regs.file[idx * 2] = value as u8;
        self.regs.file[idx * 2 + 1] = (value >> 8) as u8;
    }

    // -- Flag Ops

    fn set_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.regs.file[FILE_FLAGS] |= flag as u8;
        } else {
            self.regs.file[FILE_FLAGS] &= !(flag as u8);
        }
    }

    fn test_flag(&self, flag: Flag) -> bool {
        (self.regs.file[FILE_FLAGS] & (flag as u8)) != 0
    }

    fn update_flags_zsp(&mut self, value: u8) {
        self.set_flag(Flag::Zero, value == 0);
        self.set_flag(Flag::Sign, value & 0x80 != 0);
        self.set_flag(Flag::Parity, PARITY[value as usize] != 0);
    }

    fn condition(&self, idx: usize) -> bool {
        match idx {
            0 => !self.test_flag(Flag::Zero),
            1 => self.test_flag(Flag::Zero),
            2 => !self.test_flag(Flag::Carry),
            3 => self.test_flag(Flag::Carry),
            4 => !self.test_flag(Flag::Parity),
            5 => self.test_flag(Flag::Parity),
            6 => !self.test_flag(Flag::Sign),
            _ => self.test_flag(Flag::Sign),
        }
    }

    // -- Execution: 00 quadrant

    fn cmd_lxi(&mut self, bus: &mut dyn Bus, rp: usize) {
        let value = self.fetch_word(bus);
        self.set_pair_raw(rp, value);
    }

    fn cmd_dad(&mut self, rp: usize) {
        let res = u32::from(self.pair(RP_HL)) + u32::from(self.pair(rp));
        self.set_pair_raw(RP_HL, res as u16);
        self.set_flag(Flag::Carry, res & 0x1_0000 != 0);
    }

    fn cmd_stax(&mut self, bus: &mut dyn Bus, rp: usize) {
        let addr = self.pair(rp);
        let value = self.regs.file[FILE_A];
        bus.write(addr, value);
    }

    fn cmd_ldax(&mut self, bus: &mut dyn Bus, rp: usize) {
        let addr = self.pair(rp);
        self.regs.file[FILE_A] = bus.read(addr);
    }

    fn cmd_shld(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        bus.write_word(addr, self.pair(RP_HL));
        self.is_word = true;
    }

    fn cmd_lhld(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        let value = bus.read_word(addr);
        self.set_pair_raw(RP_HL, value);
    }

    fn cmd_sta(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        bus.write(addr, self.regs.file[FILE_A]);
    }

    fn cmd_lda(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        self.regs.file[FILE_A] = bus.read(addr);
    }

    fn cmd_inx(&mut self, rp: usize) {
        let value = self.pair(rp).wrapping_add(1);
        self.set_pair_raw(rp, value);
    }

    fn cmd_dcx(&mut self, rp: usize) {
        let value = self.pair(rp).wrapping_sub(1);
        self.set_pair_raw(rp, value);
    }

    fn cmd_inr(&mut self, bus: &mut dyn Bus, idx: usize) {
        let result = self.get_src(bus, idx).wrapping_add(1);
        self.set_dst(bus, idx, result);
        self.update_flags_zsp(result);
    }

    fn cmd_dcr(&mut self, bus: &mut dyn Bus, idx: usize) {
        let result = self.get_src(bus, idx).wrapping_sub(1);
        self.set_dst(bus, idx, result);
        self.update_flags_zsp(result);
    }

    fn cmd_mvi(&mut self, bus: &mut dyn Bus, idx: usize) {
        let value = self.fetch_byte(bus);
        self.set_dst(bus, idx, value);
    }

    fn cmd_rlc(&mut self) {
        let a = self.regs.file[FILE_A];
        let carry = a & 0x80 != 0;
        self.regs.file[FILE_A] = a << 1 | if carry { 0x01 } else { 0x00 };
        self.set_flag(Flag::Carry, carry);
    }

    fn cmd_rrc(&mut self) {
        let a = self.regs.file[FILE_A];
        let carry = a & 0x01 != 0;
        self.regs.file[FILE_A] = a >> 1 | if carry { 0x80 } else { 0x00 };
        self.set_flag(Flag::Carry, carry);
    }

    fn cmd_ral(&mut self) {
        let a = self.regs.file[FILE_A];
        let carry = a & 0x80 != 0;
        let carry_in = if self.test_flag(Flag::Carry) { 0x01 } else { 0x00 };
        self.regs.file[FILE_A] = a << 1 | carry_in;
        self.set_flag(Flag::Carry, carry);
    }

    fn cmd_rar(&mut self) {
        let a = self.regs.file[FILE_A];
        let carry = a & 0x01 != 0;
        let carry_in = if self.test_flag(Flag::Carry) { 0x80 } else { 0x00 };
        self.regs.file[FILE_A] = a >> 1 | carry_in;
        self.set_flag(Flag::Carry, carry);
    }

    fn cmd_daa(&mut self) {
        // Nonstandard adjustment kept for compatibility with the firmware
        // this core runs: both branches add, the constants are 0x09/0x90,
        // AC gates both conditions and no flags are written back.
        let a = self.regs.file[FILE_A];
        if (a & 0x0f) > 0x09 || self.test_flag(Flag::AuxCarry) {
            self.regs.file[FILE_A] = a.wrapping_add(0x09);
        } else if (a & 0xf0) > 0x90 || self.test_flag(Flag::AuxCarry) {
            self.regs.file[FILE_A] = a.wrapping_add(0x90);
        }
    }

    fn cmd_cma(&mut self) {
        self.regs.file[FILE_A] ^= 0xff;
    }

    fn cmd_stc(&mut self) {
        self.set_flag(Flag::Carry, true);
    }

    fn cmd_cmc(&mut self) {
        self.regs.file[FILE_FLAGS] ^= Flag::Carry as u8;
    }

    // -- Execution: 01 quadrant

    fn cmd_mov(&mut self, bus: &mut dyn Bus, dst: usize, src: usize) {
        let value = self.get_src(bus, src);
        self.set_dst(bus, dst, value);
    }

    // -- Execution: 10 quadrant

    fn cmd_alu(&mut self, bus: &mut dyn Bus, op: usize, idx: usize) {
        let operand = self.get_src(bus, idx);
        self.alu(op, operand);
    }

    fn alu(&mut self, op: usize, operand: u8) {
        let a = u16::from(self.regs.file[FILE_A]);
        let operand = u16::from(operand);
        match op {
            0 => {
                let res = a + operand;
                self.store_arith(res);
            }
            1 => {
                let res = a + operand + self.carry_in();
                self.store_arith(res);
            }
            2 => {
                let res = a.wrapping_sub(operand);
                self.store_arith(res);
            }
            3 => {
                let res = a.wrapping_sub(operand).wrapping_sub(self.carry_in());
                self.store_arith(res);
            }
            4 => self.store_logic((a & operand) as u8),
            5 => self.store_logic((a ^ operand) as u8),
            6 => self.store_logic((a | operand) as u8),
            _ => {
                // CMP leaves A untouched; flags come from the difference.
                let res = a.wrapping_sub(operand);
                self.update_flags_zsp(res as u8);
                self.set_flag(Flag::Carry, res & 0x100 != 0);
            }
        }
    }

    fn carry_in(&self) -> u16 {
        if self.test_flag(Flag::Carry) {
            1
        } else {
            0
        }
    }

    fn store_arith(&mut self, res: u16) {
        self.regs.file[FILE_A] = res as u8;
        self.update_flags_zsp(res as u8);
        self.set_flag(Flag::Carry, res & 0x100 != 0);
    }

    fn store_logic(&mut self, res: u8) {
        self.regs.file[FILE_A] = res;
        self.update_flags_zsp(res);
        self.set_flag(Flag::Carry, false);
    }

    // -- Execution: 11 quadrant

    fn cmd_r(&mut self, bus: &mut dyn Bus, idx: usize) {
        if self.condition(idx) {
            let addr = bus.read_word(self.regs.sp);
            self.regs.sp = self.regs.sp.wrapping_add(2);
            self.regs.pc = addr;
            self.cycles += 6;
        }
    }

    fn cmd_pop(&mut self, bus: &mut dyn Bus, rp: usize) {
        let value = bus.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        self.set_stack_pair(rp, value);
    }

    fn cmd_ret(&mut self, bus: &mut dyn Bus) {
        let addr = bus.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        self.regs.pc = addr;
    }

    fn cmd_pchl(&mut self) {
        self.regs.pc = self.pair(RP_HL);
    }

    fn cmd_sphl(&mut self) {
        self.regs.sp = self.pair(RP_HL);
    }

    fn cmd_j(&mut self, bus: &mut dyn Bus, idx: usize) {
        let addr = self.fetch_word(bus);
        if self.condition(idx) {
            self.regs.pc = addr;
            self.cycles += 6;
        }
    }

    fn cmd_jmp(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        self.regs.pc = addr;
    }

    // OUT/IN reach the memory-mapped peripherals by placing the port
    // number in the high address byte.
    fn cmd_out(&mut self, bus: &mut dyn Bus) {
        let port = self.fetch_byte(bus);
        bus.write(u16::from(port) << 8, self.regs.file[FILE_A]);
    }

    fn cmd_in(&mut self, bus: &mut dyn Bus) {
        let port = self.fetch_byte(bus);
        self.regs.file[FILE_A] = bus.read(u16::from(port) << 8);
    }

    fn cmd_xthl(&mut self, bus: &mut dyn Bus) {
        let tmp = bus.read_word(self.regs.sp);
        bus.write_word(self.regs.sp, self.pair(RP_HL));
        self.set_pair_raw(RP_HL, tmp);
    }

    fn cmd_xchg(&mut self) {
        let de = self.pair(RP_DE);
        let hl = self.pair(RP_HL);
        self.set_pair_raw(RP_DE, hl);
        self.set_pair_raw(RP_HL, de);
    }

    // The machine being emulated polls its peripherals, so the interrupt
    // enable state has nothing to drive.
    fn cmd_di(&mut self) {}

    fn cmd_ei(&mut self) {}

    fn cmd_c(&mut self, bus: &mut dyn Bus, idx: usize) {
        let addr = self.fetch_word(bus);
        if self.condition(idx) {
            self.regs.sp = self.regs.sp.wrapping_sub(2);
            bus.write_word(self.regs.sp, self.regs.pc);
            self.regs.pc = addr;
            self.is_word = true;
            self.cycles += 6;
        }
    }

    fn cmd_push(&mut self, bus: &mut dyn Bus, rp: usize) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        let value = self.stack_pair(rp);
        bus.write_word(self.regs.sp, value);
        self.is_word = true;
    }

    fn cmd_call(&mut self, bus: &mut dyn Bus) {
        let addr = self.fetch_word(bus);
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        bus.write_word(self.regs.sp, self.regs.pc);
        self.regs.pc = addr;
        self.is_word = true;
    }

    fn cmd_i(&mut self, bus: &mut dyn Bus, op: usize) {
        let value = self.fetch_byte(bus);
        self.alu(op, value);
    }

    fn cmd_rst(&mut self, bus: &mut dyn Bus, idx: usize) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        bus.write_word(self.regs.sp, self.regs.pc);
        self.regs.pc = (idx as u16) << 3;
        self.is_word = true;
    }

    // -- Tracing

    fn trace(&mut self, bus: &mut dyn Bus, save_pc: u16) {
        if self.invalid {
            log::trace!(
                target: "cpu::ins",
                "{:04x}: invalid instruction 0x{:02x}",
                save_pc,
                self.opcode
            );
            return;
        }
        let mnemonic = disassembler::disassemble(bus, save_pc);
        log::trace!(
            target: "cpu::ins",
            "{:04x}: {:<14} // BC={:04x}, DE={:04x}, HL={:04x}, SP={:04x}, A={:02x}, {}{}{}{}{}",
            save_pc,
            mnemonic,
            self.pair(RP_BC),
            self.pair(RP_DE),
            self.pair(RP_HL),
            self.regs.sp,
            self.regs.file[FILE_A],
            if self.test_flag(Flag::Sign) { 'S' } else { 's' },
            if self.test_flag(Flag::Zero) { 'Z' } else { 'z' },
            if self.test_flag(Flag::AuxCarry) { 'A' } else { 'a' },
            if self.test_flag(Flag::Parity) { 'P' } else { 'p' },
            if self.test_flag(Flag::Carry) { 'C' } else { 'c' },
        );
    }
}

impl Default for Cpu8080 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion128_core::Ram;

    struct MockMemory {
        ram: Ram,
    }

    impl MockMemory {
        fn new() -> Self {
            Self {
                ram: Ram::new(0x10000),
            }
        }
    }

    impl Bus for MockMemory {
        fn read(&mut self, address: u16) -> u8 {
            self.ram.read(address)
        }

        fn write(&mut self, address: u16, value: u8) {
            self.ram.write(address, value);
        }
    }

    fn setup() -> (Cpu8080, MockMemory) {
        let mut cpu = Cpu8080::new();
        cpu.reset();
        (cpu, MockMemory::new())
    }

    fn load(mem: &mut MockMemory, code: &[u8]) {
        for (i, byte) in code.iter().enumerate() {
            mem.write(i as u16, *byte);
        }
    }

    fn flags(cpu: &Cpu8080) -> u8 {
        cpu.get_register(Register::Flags)
    }

    #[test]
    fn parity_table_matches_popcount() {
        for value in 0..256usize {
            let expected = (value.count_ones() % 2 == 0) as u8;
            assert_eq!(expected, PARITY[value], "parity of {:02x}", value);
        }
    }

    #[test]
    fn mvi_loads_immediate() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x3e, 0x42]);
        cpu.step(&mut mem);
        assert_eq!(2, cpu.get_pc());
        assert_eq!(0x42, cpu.get_register(Register::A));
        assert_eq!(0x00, flags(&cpu));
    }

    #[test]
    fn add_is_commutative_in_flags() {
        for (x, y) in [(0x12u8, 0xf0u8), (0x80, 0x80), (0x0f, 0x01), (0xff, 0xff)] {
            let (mut cpu, mut mem) = setup();
            load(&mut mem, &[0x80]); // ADD B
            cpu.set_register(Register::A, x);
            cpu.set_register(Register::B, y);
            cpu.step(&mut mem);
            let f1 = flags(&cpu);

            let (mut cpu, mut mem) = setup();
            load(&mut mem, &[0x80]);
            cpu.set_register(Register::A, y);
            cpu.set_register(Register::B, x);
            cpu.step(&mut mem);
            assert_eq!(f1, flags(&cpu), "ADD {:02x},{:02x}", x, y);
        }
    }

    #[test]
    fn sub_and_cmp_produce_identical_flags() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x90]); // SUB B
        cpu.set_register(Register::A, 0x10);
        cpu.set_register(Register::B, 0x20);
        cpu.step(&mut mem);
        let sub_flags = flags(&cpu);
        assert_eq!(0xf0, cpu.get_register(Register::A));

        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xb8]); // CMP B
        cpu.set_register(Register::A, 0x10);
        cpu.set_register(Register::B, 0x20);
        cpu.step(&mut mem);
        assert_eq!(sub_flags, flags(&cpu));
        assert_eq!(0x10, cpu.get_register(Register::A));
    }

    #[test]
    fn sub_sets_borrow() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xd6, 0x01]); // SUI 1
        cpu.set_register(Register::A, 0x00);
        cpu.step(&mut mem);
        assert_eq!(0xff, cpu.get_register(Register::A));
        assert_eq!(
            Flag::Carry as u8 | Flag::Sign as u8 | Flag::Parity as u8,
            flags(&cpu)
        );
    }

    #[test]
    fn logic_ops_clear_carry() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x37, 0xe6, 0xff]); // STC; ANI 0xff
        cpu.set_register(Register::A, 0x0f);
        cpu.step(&mut mem);
        assert!(cpu.test_flag(Flag::Carry));
        cpu.step(&mut mem);
        assert!(!cpu.test_flag(Flag::Carry));
        assert_eq!(0x0f, cpu.get_register(Register::A));
    }

    #[test]
    fn inr_does_not_touch_carry() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x37, 0x3c]); // STC; INR A
        cpu.set_register(Register::A, 0xff);
        cpu.step(&mut mem);
        cpu.step(&mut mem);
        assert_eq!(0x00, cpu.get_register(Register::A));
        assert!(cpu.test_flag(Flag::Carry));
        assert!(cpu.test_flag(Flag::Zero));
    }

    #[test]
    fn dad_sets_carry_only() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x09]); // DAD BC
        cpu.set_pair(RegisterPair::HL, 0xffff);
        cpu.set_pair(RegisterPair::BC, 0x0001);
        cpu.set_register(Register::Flags, Flag::Zero as u8 | Flag::Sign as u8);
        cpu.step(&mut mem);
        assert_eq!(0x0000, cpu.get_pair(RegisterPair::HL));
        assert!(cpu.test_flag(Flag::Carry));
        assert!(cpu.test_flag(Flag::Zero));
        assert!(cpu.test_flag(Flag::Sign));
    }

    #[test]
    fn daa_adjusts_low_nibble_by_nine() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x27]);
        cpu.set_register(Register::A, 0x0a);
        cpu.step(&mut mem);
        assert_eq!(0x13, cpu.get_register(Register::A));
    }

    #[test]
    fn daa_adjusts_high_nibble_by_ninety() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x27]);
        cpu.set_register(Register::A, 0xa0);
        cpu.step(&mut mem);
        assert_eq!(0x30, cpu.get_register(Register::A));
    }

    #[test]
    fn rlc_eight_times_is_identity() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x07; 8]);
        cpu.set_register(Register::A, 0xb7);
        for _ in 0..8 {
            cpu.step(&mut mem);
        }
        assert_eq!(0xb7, cpu.get_register(Register::A));
    }

    #[test]
    fn rrc_eight_times_is_identity() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x0f; 8]);
        cpu.set_register(Register::A, 0x2d);
        for _ in 0..8 {
            cpu.step(&mut mem);
        }
        assert_eq!(0x2d, cpu.get_register(Register::A));
    }

    #[test]
    fn ral_shifts_through_carry() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x17, 0x17]);
        cpu.set_register(Register::A, 0x80);
        cpu.step(&mut mem);
        assert_eq!(0x00, cpu.get_register(Register::A));
        assert!(cpu.test_flag(Flag::Carry));
        cpu.step(&mut mem);
        assert_eq!(0x01, cpu.get_register(Register::A));
        assert!(!cpu.test_flag(Flag::Carry));
    }

    #[test]
    fn push_pop_roundtrip_preserves_pairs_and_sp() {
        // PUSH B/D/H/PSW followed by the matching POPs in reverse.
        let (mut cpu, mut mem) = setup();
        load(
            &mut mem,
            &[0xc5, 0xd5, 0xe5, 0xf5, 0xf1, 0xe1, 0xd1, 0xc1],
        );
        cpu.set_sp(0x8000);
        cpu.set_pair(RegisterPair::BC, 0x1234);
        cpu.set_pair(RegisterPair::DE, 0x5678);
        cpu.set_pair(RegisterPair::HL, 0x9abc);
        cpu.set_register(Register::A, 0x55);
        cpu.set_register(Register::Flags, 0x81);
        for _ in 0..8 {
            cpu.step(&mut mem);
        }
        assert_eq!(0x1234, cpu.get_pair(RegisterPair::BC));
        assert_eq!(0x5678, cpu.get_pair(RegisterPair::DE));
        assert_eq!(0x9abc, cpu.get_pair(RegisterPair::HL));
        assert_eq!(0x55, cpu.get_register(Register::A));
        assert_eq!(0x81, cpu.get_register(Register::Flags));
        assert_eq!(0x8000, cpu.get_sp());
    }

    #[test]
    fn push_psw_layout_keeps_flags_in_low_byte() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xf5]); // PUSH PSW
        cpu.set_sp(0x8000);
        cpu.set_register(Register::A, 0xaa);
        cpu.set_register(Register::Flags, 0x41);
        cpu.step(&mut mem);
        assert_eq!(0x41, mem.read(0x7ffe));
        assert_eq!(0xaa, mem.read(0x7fff));
    }

    #[test]
    fn xchg_twice_is_identity() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xeb, 0xeb]);
        cpu.set_pair(RegisterPair::DE, 0x1111);
        cpu.set_pair(RegisterPair::HL, 0x2222);
        cpu.step(&mut mem);
        assert_eq!(0x2222, cpu.get_pair(RegisterPair::DE));
        assert_eq!(0x1111, cpu.get_pair(RegisterPair::HL));
        cpu.step(&mut mem);
        assert_eq!(0x1111, cpu.get_pair(RegisterPair::DE));
        assert_eq!(0x2222, cpu.get_pair(RegisterPair::HL));
    }

    #[test]
    fn xthl_swaps_hl_with_stack_top() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xe3]);
        cpu.set_sp(0x8000);
        mem.write_word(0x8000, 0xbeef);
        cpu.set_pair(RegisterPair::HL, 0x1234);
        cpu.step(&mut mem);
        assert_eq!(0xbeef, cpu.get_pair(RegisterPair::HL));
        assert_eq!(0x1234, mem.read_word(0x8000));
        assert_eq!(0x8000, cpu.get_sp());
    }

    #[test]
    fn conditional_jump_taken_costs_six_extra() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xaf, 0xca, 0x06, 0x00]); // XRA A; JZ 0x0006
        cpu.set_register(Register::A, 0x5a);
        cpu.step(&mut mem);
        assert!(cpu.test_flag(Flag::Zero));
        let before = cpu.get_cycles();
        cpu.step(&mut mem);
        assert_eq!(0x0006, cpu.get_pc());
        assert_eq!(10 + 6, cpu.get_cycles() - before);
    }

    #[test]
    fn conditional_jump_not_taken_skips_operand() {
        // Z is clear out of reset, so JZ falls through to the next
        // instruction.
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xca, 0x06, 0x00]);
        cpu.step(&mut mem);
        assert_eq!(0x0003, cpu.get_pc());
        assert_eq!(10, cpu.get_cycles());
    }

    #[test]
    fn call_and_ret_roundtrip() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xcd, 0x10, 0x00]); // CALL 0x0010
        mem.write(0x0010, 0xc9); // RET
        cpu.set_sp(0x8000);
        cpu.step(&mut mem);
        assert_eq!(0x0010, cpu.get_pc());
        assert_eq!(0x7ffe, cpu.get_sp());
        assert!(cpu.is_word_write());
        cpu.step(&mut mem);
        assert_eq!(0x0003, cpu.get_pc());
        assert_eq!(0x8000, cpu.get_sp());
        assert!(!cpu.is_word_write());
    }

    #[test]
    fn rst_jumps_to_vector() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xff]); // RST 7
        cpu.set_sp(0x8000);
        cpu.step(&mut mem);
        assert_eq!(0x0038, cpu.get_pc());
        assert_eq!(0x0001, mem.read_word(0x7ffe));
        assert!(cpu.is_word_write());
    }

    #[test]
    fn word_write_marker_tracks_instructions() {
        // SHLD sets the marker, the following NOP clears it.
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x22, 0x00, 0x90, 0x00]); // SHLD 0x9000; NOP
        cpu.set_pair(RegisterPair::HL, 0x4142);
        cpu.step(&mut mem);
        assert!(cpu.is_word_write());
        assert_eq!(0x4142, mem.read_word(0x9000));
        cpu.step(&mut mem);
        assert!(!cpu.is_word_write());
    }

    #[test]
    fn mov_through_m_uses_hl() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x77, 0x4e]); // MOV M,A; MOV C,M
        cpu.set_pair(RegisterPair::HL, 0x4000);
        cpu.set_register(Register::A, 0x99);
        cpu.step(&mut mem);
        assert_eq!(0x99, mem.read(0x4000));
        cpu.step(&mut mem);
        assert_eq!(0x99, cpu.get_register(Register::C));
    }

    #[test]
    fn out_addresses_port_in_high_byte() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xd3, 0xf8]); // OUT 0xf8
        cpu.set_register(Register::A, 0x5a);
        cpu.step(&mut mem);
        assert_eq!(0x5a, mem.read(0xf800));
    }

    #[test]
    fn in_reads_port_from_high_byte() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xdb, 0x12]); // IN 0x12
        mem.write(0x1200, 0x77);
        cpu.step(&mut mem);
        assert_eq!(0x77, cpu.get_register(Register::A));
    }

    #[test]
    fn decode_holes_execute_as_nop() {
        for opcode in [0x08u8, 0xd9, 0xcb, 0xdd] {
            let (mut cpu, mut mem) = setup();
            load(&mut mem, &[opcode]);
            cpu.set_sp(0x8000);
            cpu.step(&mut mem);
            assert_eq!(0x0001, cpu.get_pc(), "opcode {:02x}", opcode);
            assert_eq!(0x8000, cpu.get_sp(), "opcode {:02x}", opcode);
            assert_eq!(0x00, flags(&cpu), "opcode {:02x}", opcode);
        }
    }

    #[test]
    fn ldax_reads_through_pair() {
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0x0a]); // LDAX B
        cpu.set_pair(RegisterPair::BC, 0x2345);
        mem.write(0x2345, 0x6f);
        cpu.step(&mut mem);
        assert_eq!(0x6f, cpu.get_register(Register::A));
    }

    #[test]
    fn condition_codes_cover_parity_and_sign() {
        // XRA A leaves A=0 with Z, P set and S, C clear; JPE must take.
        let (mut cpu, mut mem) = setup();
        load(&mut mem, &[0xaf, 0xea, 0x10, 0x00]); // XRA A; JPE 0x0010
        cpu.set_register(Register::A, 0x5a);
        cpu.step(&mut mem);
        cpu.step(&mut mem);
        assert_eq!(0x0010, cpu.get_pc());
    }
}
