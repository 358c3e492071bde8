//! `Cpu<B: Bus>`: the fetch-decode-execute engine.

mod opcode;
pub mod register_file;

use register_file::{Cond, Registers, R16, R8};
use serde::{Deserialize, Serialize};

use crate::bus::{Bus, CpuError};
use crate::snapshot::Snapshot;

/// The `IME` (interrupt master enable) flag. Kept separate from the F
/// register's flag bits since it is not part of the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImeState {
    Enabled,
    Disabled,
    /// `EI` was executed; `IME` becomes `Enabled` after the *next*
    /// instruction finishes.
    PendingEnable,
}

/// The five maskable interrupt sources, in priority order (lowest bit of
/// IE/IF first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptKind {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Joypad,
}

impl InterruptKind {
    const PRIORITY: [InterruptKind; 5] = [
        InterruptKind::VBlank,
        InterruptKind::LcdStat,
        InterruptKind::Timer,
        InterruptKind::Serial,
        InterruptKind::Joypad,
    ];

    fn bit(self) -> u8 {
        match self {
            InterruptKind::VBlank => 0,
            InterruptKind::LcdStat => 1,
            InterruptKind::Timer => 2,
            InterruptKind::Serial => 3,
            InterruptKind::Joypad => 4,
        }
    }

    fn vector(self) -> u16 {
        match self {
            InterruptKind::VBlank => 0x40,
            InterruptKind::LcdStat => 0x48,
            InterruptKind::Timer => 0x50,
            InterruptKind::Serial => 0x58,
            InterruptKind::Joypad => 0x60,
        }
    }
}

const IF_ADDR: u16 = 0xFF0F;
const IE_ADDR: u16 = 0xFFFF;

/// The instruction-level LR35902 core, generic over the [`Bus`] a
/// collaborator supplies — the core takes the bus by abstract capability,
/// not a concrete type, so a PPU/timer-backed memory map can be layered in
/// by composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu<B: Bus> {
    pub regs: Registers,
    pub bus: B,
    pub ime: ImeState,
    pub halted: bool,
    #[serde(skip)]
    trace_enabled: bool,
}

impl<B: Bus> Cpu<B> {
    /// `regs` and `ime` are parameters, not baked-in power-on values — a
    /// collaborator that wants the typical post-boot profile passes
    /// [`Registers::power_on`].
    pub fn new(bus: B, regs: Registers, ime: ImeState) -> Self {
        Cpu {
            regs,
            bus,
            ime,
            halted: false,
            trace_enabled: false,
        }
    }

    pub fn set_trace_enabled(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    fn log_state(&mut self, opcode: u8) {
        if self.trace_enabled {
            eprintln!(
                "IME:{:?} HALT:{} A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} PC:{:04X} OP:{:02X}",
                self.ime, self.halted, self.regs.a, self.regs.f, self.regs.b, self.regs.c,
                self.regs.d, self.regs.e, self.regs.h, self.regs.l, self.regs.sp, self.regs.pc, opcode,
            );
        }
    }

    /// Fetch, decode, and execute a single instruction, servicing a
    /// pending interrupt first if one is enabled.
    ///
    /// Returns the number of T-cycles consumed. On [`CpuError::IllegalOpcode`]
    /// the PC is left pointing at the faulting byte and nothing past
    /// the fetch is mutated.
    pub fn step(&mut self) -> Result<u8, CpuError> {
        let ie = self.bus.read8(IE_ADDR);
        let iff = self.bus.read8(IF_ADDR);
        let pending = InterruptKind::PRIORITY
            .into_iter()
            .find(|k| ie & iff & (1 << k.bit()) != 0);

        let mut serviced = false;
        if self.ime == ImeState::Enabled {
            if let Some(kind) = pending {
                self.ime = ImeState::Disabled;
                self.halted = false;
                self.bus.write8(IF_ADDR, iff & !(1 << kind.bit()));
                self.push16(self.regs.pc);
                self.regs.pc = kind.vector();
                serviced = true;
            }
        } else if self.halted && pending.is_some() {
            self.halted = false;
        }

        if self.ime == ImeState::PendingEnable {
            self.ime = ImeState::Enabled;
        }

        if serviced {
            return Ok(20);
        }

        if self.halted {
            return Ok(4);
        }

        let opcode = self.bus.read8(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        let cycles = self.execute(opcode)?;
        self.log_state(opcode);
        Ok(cycles)
    }

    /// Produce a fixed-layout save state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            af: self.regs.r16(R16::AF),
            bc: self.regs.r16(R16::BC),
            de: self.regs.r16(R16::DE),
            hl: self.regs.r16(R16::HL),
            sp: self.regs.sp,
            pc: self.regs.pc,
            ime: self.ime,
            halted: self.halted,
            ei_pending: self.ime == ImeState::PendingEnable,
        }
    }

    /// Restore register/IME/halt state from the fixed-layout snapshot bytes.
    /// The Bus is left untouched — it is the collaborator's own state,
    /// not the core's. Returns [`CpuError::InvalidSnapshot`] if `bytes` is
    /// not [`SNAPSHOT_LEN`](crate::snapshot::SNAPSHOT_LEN) long, without
    /// mutating any register state.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), CpuError> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        self.regs.set_r16(R16::AF, snapshot.af);
        self.regs.set_r16(R16::BC, snapshot.bc);
        self.regs.set_r16(R16::DE, snapshot.de);
        self.regs.set_r16(R16::HL, snapshot.hl);
        self.regs.sp = snapshot.sp;
        self.regs.pc = snapshot.pc;
        self.ime = snapshot.ime;
        self.halted = snapshot.halted;
        Ok(())
    }

    /// Execute a single instruction and return its T-cycle cost.
    ///
    /// Precondition: PC points at the byte after the opcode. `execute` may
    /// advance PC further if the instruction has immediate operands.
    ///
    /// ref: https://gbdev.io/gb-opcodes//optables/
    fn execute(&mut self, opcode: u8) -> Result<u8, CpuError> {
        use R16::{BC, DE, HL, SP};
        use R8::{A, B, C, D, E, H, L};

        let cycles = match opcode {
            // --- misc / control ---
            0x00 => 4,
            // STOP's second byte is always 0x00 in practice and is just
            // consumed here; the core exposes no stopped state or wake
            // signal of its own (halted low-power mode and button-press
            // wake-up are the collaborator's concern).
            0x10 => {
                self.regs.pc = self.regs.pc.wrapping_add(1);
                4
            }
            0x27 => self.daa(),
            0x2F => self.cpl(),
            0x37 => self.scf(),
            0x3F => self.ccf(),
            0x76 => self.halt(),
            0xF3 => self.di(),
            0xFB => self.ei(),
            0xCB => return self.execute_cb(),

            // --- rotate accumulator ---
            0x07 => self.rlca(),
            0x0F => self.rrca(),
            0x17 => self.rla(),
            0x1F => self.rra(),

            // --- jumps / calls / returns ---
            0x18 => self.jr(),
            0x20 => self.jr_cc(Cond::NZ),
            0x28 => self.jr_cc(Cond::Z),
            0x30 => self.jr_cc(Cond::NC),
            0x38 => self.jr_cc(Cond::C),
            0xC0 => self.ret_cc(Cond::NZ),
            0xC8 => self.ret_cc(Cond::Z),
            0xD0 => self.ret_cc(Cond::NC),
            0xD8 => self.ret_cc(Cond::C),
            0xC9 => self.ret(),
            0xD9 => self.reti(),
            0xC2 => self.jp_cc(Cond::NZ),
            0xCA => self.jp_cc(Cond::Z),
            0xD2 => self.jp_cc(Cond::NC),
            0xDA => self.jp_cc(Cond::C),
            0xC3 => self.jp(),
            0xE9 => self.jp_hl(),
            0xC4 => self.call_cc(Cond::NZ),
            0xCC => self.call_cc(Cond::Z),
            0xD4 => self.call_cc(Cond::NC),
            0xDC => self.call_cc(Cond::C),
            0xCD => self.call(),
            0xC7 => self.rst(0x00),
            0xCF => self.rst(0x08),
            0xD7 => self.rst(0x10),
            0xDF => self.rst(0x18),
            0xE7 => self.rst(0x20),
            0xEF => self.rst(0x28),
            0xF7 => self.rst(0x30),
            0xFF => self.rst(0x38),

            // --- 16-bit loads ---
            0x01 => self.ld_r16_n16(BC),
            0x11 => self.ld_r16_n16(DE),
            0x21 => self.ld_r16_n16(HL),
            0x31 => self.ld_r16_n16(SP),
            0xC1 => self.pop_r16(BC),
            0xD1 => self.pop_r16(DE),
            0xE1 => self.pop_r16(HL),
            0xF1 => self.pop_af(),
            0xC5 => self.push_r16(BC),
            0xD5 => self.push_r16(DE),
            0xE5 => self.push_r16(HL),
            0xF5 => self.push_af(),
            0x08 => self.ld_n16_sp(),
            0xF8 => self.ld_hl_sp_e8(),
            0xF9 => self.ld_sp_hl(),

            // --- 8-bit loads ---
            0x02 => self.ld_r16ind_a(BC),
            0x12 => self.ld_r16ind_a(DE),
            0x22 => self.ld_hli_a(),
            0x32 => self.ld_hld_a(),
            0x06 => self.ld_r8_n8(B),
            0x16 => self.ld_r8_n8(D),
            0x26 => self.ld_r8_n8(H),
            0x36 => self.ld_hl_n8(),
            0x0E => self.ld_r8_n8(C),
            0x1E => self.ld_r8_n8(E),
            0x2E => self.ld_r8_n8(L),
            0x3E => self.ld_r8_n8(A),
            0x0A => self.ld_a_r16ind(BC),
            0x1A => self.ld_a_r16ind(DE),
            0x2A => self.ld_a_hli(),
            0x3A => self.ld_a_hld(),
            0xE0 => self.ldh_n8_a(),
            0xF0 => self.ldh_a_n8(),
            0xE2 => self.ldh_c_a(),
            0xF2 => self.ldh_a_c(),
            0xEA => self.ld_n16_a(),
            0xFA => self.ld_a_n16(),

            0x40 => self.ld_r8_r8(B, B),
            0x41 => self.ld_r8_r8(B, C),
            0x42 => self.ld_r8_r8(B, D),
            0x43 => self.ld_r8_r8(B, E),
            0x44 => self.ld_r8_r8(B, H),
            0x45 => self.ld_r8_r8(B, L),
            0x46 => self.ld_r8_hl(B),
            0x47 => self.ld_r8_r8(B, A),
            0x48 => self.ld_r8_r8(C, B),
            0x49 => self.ld_r8_r8(C, C),
            0x4A => self.ld_r8_r8(C, D),
            0x4B => self.ld_r8_r8(C, E),
            0x4C => self.ld_r8_r8(C, H),
            0x4D => self.ld_r8_r8(C, L),
            0x4E => self.ld_r8_hl(C),
            0x4F => self.ld_r8_r8(C, A),
            0x50 => self.ld_r8_r8(D, B),
            0x51 => self.ld_r8_r8(D, C),
            0x52 => self.ld_r8_r8(D, D),
            0x53 => self.ld_r8_r8(D, E),
            0x54 => self.ld_r8_r8(D, H),
            0x55 => self.ld_r8_r8(D, L),
            0x56 => self.ld_r8_hl(D),
            0x57 => self.ld_r8_r8(D, A),
            0x58 => self.ld_r8_r8(E, B),
            0x59 => self.ld_r8_r8(E, C),
            0x5A => self.ld_r8_r8(E, D),
            0x5B => self.ld_r8_r8(E, E),
            0x5C => self.ld_r8_r8(E, H),
            0x5D => self.ld_r8_r8(E, L),
            0x5E => self.ld_r8_hl(E),
            0x5F => self.ld_r8_r8(E, A),
            0x60 => self.ld_r8_r8(H, B),
            0x61 => self.ld_r8_r8(H, C),
            0x62 => self.ld_r8_r8(H, D),
            0x63 => self.ld_r8_r8(H, E),
            0x64 => self.ld_r8_r8(H, H),
            0x65 => self.ld_r8_r8(H, L),
            0x66 => self.ld_r8_hl(H),
            0x67 => self.ld_r8_r8(H, A),
            0x68 => self.ld_r8_r8(L, B),
            0x69 => self.ld_r8_r8(L, C),
            0x6A => self.ld_r8_r8(L, D),
            0x6B => self.ld_r8_r8(L, E),
            0x6C => self.ld_r8_r8(L, H),
            0x6D => self.ld_r8_r8(L, L),
            0x6E => self.ld_r8_hl(L),
            0x6F => self.ld_r8_r8(L, A),
            0x70 => self.ld_hl_r8(B),
            0x71 => self.ld_hl_r8(C),
            0x72 => self.ld_hl_r8(D),
            0x73 => self.ld_hl_r8(E),
            0x74 => self.ld_hl_r8(H),
            0x75 => self.ld_hl_r8(L),
            0x77 => self.ld_hl_r8(A),
            0x78 => self.ld_r8_r8(A, B),
            0x79 => self.ld_r8_r8(A, C),
            0x7A => self.ld_r8_r8(A, D),
            0x7B => self.ld_r8_r8(A, E),
            0x7C => self.ld_r8_r8(A, H),
            0x7D => self.ld_r8_r8(A, L),
            0x7E => self.ld_r8_hl(A),
            0x7F => self.ld_r8_r8(A, A),

            // --- 16-bit arithmetic ---
            0x03 => self.inc_r16(BC),
            0x13 => self.inc_r16(DE),
            0x23 => self.inc_r16(HL),
            0x33 => self.inc_r16(SP),
            0x0B => self.dec_r16(BC),
            0x1B => self.dec_r16(DE),
            0x2B => self.dec_r16(HL),
            0x3B => self.dec_r16(SP),
            0x09 => self.add_hl_r16(BC),
            0x19 => self.add_hl_r16(DE),
            0x29 => self.add_hl_r16(HL),
            0x39 => self.add_hl_r16(SP),
            0xE8 => self.add_sp_e8(),

            // --- 8-bit arithmetic/logic ---
            0x04 => self.inc_r8(B),
            0x14 => self.inc_r8(D),
            0x24 => self.inc_r8(H),
            0x34 => self.inc_hl(),
            0x0C => self.inc_r8(C),
            0x1C => self.inc_r8(E),
            0x2C => self.inc_r8(L),
            0x3C => self.inc_r8(A),
            0x05 => self.dec_r8(B),
            0x15 => self.dec_r8(D),
            0x25 => self.dec_r8(H),
            0x35 => self.dec_hl(),
            0x0D => self.dec_r8(C),
            0x1D => self.dec_r8(E),
            0x2D => self.dec_r8(L),
            0x3D => self.dec_r8(A),

            0x80 => self.add_a_r8(B),
            0x81 => self.add_a_r8(C),
            0x82 => self.add_a_r8(D),
            0x83 => self.add_a_r8(E),
            0x84 => self.add_a_r8(H),
            0x85 => self.add_a_r8(L),
            0x86 => self.add_a_hl(),
            0x87 => self.add_a_r8(A),
            0x88 => self.adc_a_r8(B),
            0x89 => self.adc_a_r8(C),
            0x8A => self.adc_a_r8(D),
            0x8B => self.adc_a_r8(E),
            0x8C => self.adc_a_r8(H),
            0x8D => self.adc_a_r8(L),
            0x8E => self.adc_a_hl(),
            0x8F => self.adc_a_r8(A),
            0x90 => self.sub_a_r8(B),
            0x91 => self.sub_a_r8(C),
            0x92 => self.sub_a_r8(D),
            0x93 => self.sub_a_r8(E),
            0x94 => self.sub_a_r8(H),
            0x95 => self.sub_a_r8(L),
            0x96 => self.sub_a_hl(),
            0x97 => self.sub_a_r8(A),
            0x98 => self.sbc_a_r8(B),
            0x99 => self.sbc_a_r8(C),
            0x9A => self.sbc_a_r8(D),
            0x9B => self.sbc_a_r8(E),
            0x9C => self.sbc_a_r8(H),
            0x9D => self.sbc_a_r8(L),
            0x9E => self.sbc_a_hl(),
            0x9F => self.sbc_a_r8(A),
            0xA0 => self.and_a_r8(B),
            0xA1 => self.and_a_r8(C),
            0xA2 => self.and_a_r8(D),
            0xA3 => self.and_a_r8(E),
            0xA4 => self.and_a_r8(H),
            0xA5 => self.and_a_r8(L),
            0xA6 => self.and_a_hl(),
            0xA7 => self.and_a_r8(A),
            0xA8 => self.xor_a_r8(B),
            0xA9 => self.xor_a_r8(C),
            0xAA => self.xor_a_r8(D),
            0xAB => self.xor_a_r8(E),
            0xAC => self.xor_a_r8(H),
            0xAD => self.xor_a_r8(L),
            0xAE => self.xor_a_hl(),
            0xAF => self.xor_a_r8(A),
            0xB0 => self.or_a_r8(B),
            0xB1 => self.or_a_r8(C),
            0xB2 => self.or_a_r8(D),
            0xB3 => self.or_a_r8(E),
            0xB4 => self.or_a_r8(H),
            0xB5 => self.or_a_r8(L),
            0xB6 => self.or_a_hl(),
            0xB7 => self.or_a_r8(A),
            0xB8 => self.cp_a_r8(B),
            0xB9 => self.cp_a_r8(C),
            0xBA => self.cp_a_r8(D),
            0xBB => self.cp_a_r8(E),
            0xBC => self.cp_a_r8(H),
            0xBD => self.cp_a_r8(L),
            0xBE => self.cp_a_hl(),
            0xBF => self.cp_a_r8(A),

            0xC6 => self.add_a_n8(),
            0xCE => self.adc_a_n8(),
            0xD6 => self.sub_a_n8(),
            0xDE => self.sbc_a_n8(),
            0xE6 => self.and_a_n8(),
            0xEE => self.xor_a_n8(),
            0xF6 => self.or_a_n8(),
            0xFE => self.cp_a_n8(),

            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                return Err(CpuError::IllegalOpcode {
                    byte: opcode,
                    pc: self.regs.pc,
                })
            }
        };
        Ok(cycles)
    }

    /// Decode and execute the CB-prefixed table. The `0xCB` byte
    /// itself contributes 4 cycles; this adds the CB-opcode's own cost.
    fn execute_cb(&mut self) -> Result<u8, CpuError> {
        use R8::{A, B, C, D, E, H, L};

        let cb_opcode = self.bus.read8(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);

        let row_cycles = |is_hl: bool, is_bit: bool| -> u8 {
            if is_hl {
                if is_bit {
                    8
                } else {
                    12
                }
            } else {
                4
            }
        };

        let col = cb_opcode & 0x07;
        let is_hl = col == 6;
        let cost = row_cycles(is_hl, (0x40..0x80).contains(&cb_opcode)) + 4;

        macro_rules! r8_or_hl {
            ($op_r8:ident, $op_hl:ident $(, $arg:expr)?) => {
                match col {
                    0 => self.$op_r8($($arg,)? B),
                    1 => self.$op_r8($($arg,)? C),
                    2 => self.$op_r8($($arg,)? D),
                    3 => self.$op_r8($($arg,)? E),
                    4 => self.$op_r8($($arg,)? H),
                    5 => self.$op_r8($($arg,)? L),
                    6 => self.$op_hl($($arg)?),
                    7 => self.$op_r8($($arg,)? A),
                    _ => unreachable!(),
                }
            };
        }

        match cb_opcode {
            0x00..=0x07 => r8_or_hl!(rlc_r8, rlc_hl),
            0x08..=0x0F => r8_or_hl!(rrc_r8, rrc_hl),
            0x10..=0x17 => r8_or_hl!(rl_r8, rl_hl),
            0x18..=0x1F => r8_or_hl!(rr_r8, rr_hl),
            0x20..=0x27 => r8_or_hl!(sla_r8, sla_hl),
            0x28..=0x2F => r8_or_hl!(sra_r8, sra_hl),
            0x30..=0x37 => r8_or_hl!(swap_r8, swap_hl),
            0x38..=0x3F => r8_or_hl!(srl_r8, srl_hl),
            0x40..=0x7F => {
                let bit = (cb_opcode - 0x40) >> 3;
                r8_or_hl!(bit_r8, bit_hl, bit)
            }
            0x80..=0xBF => {
                let bit = (cb_opcode - 0x80) >> 3;
                r8_or_hl!(res_r8, res_hl, bit)
            }
            0xC0..=0xFF => {
                let bit = (cb_opcode - 0xC0) >> 3;
                r8_or_hl!(set_r8, set_hl, bit)
            }
        };
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A flat 64 KiB bus for unit tests — no PPU, timer, or cartridge, just
    /// the two operations the core actually needs.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct FlatBus {
        mem: Vec<u8>,
    }

    impl FlatBus {
        pub(crate) fn new() -> Self {
            FlatBus { mem: vec![0; 0x10000] }
        }

        pub(crate) fn load(&mut self, addr: u16, bytes: &[u8]) {
            for (i, &b) in bytes.iter().enumerate() {
                self.mem[addr as usize + i] = b;
            }
        }
    }

    impl Bus for FlatBus {
        fn read8(&mut self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }

        fn write8(&mut self, addr: u16, value: u8) {
            self.mem[addr as usize] = value;
        }
    }

    fn cpu_at(pc: u16) -> Cpu<FlatBus> {
        let mut regs = Registers::zeroed();
        regs.pc = pc;
        Cpu::new(FlatBus::new(), regs, ImeState::Disabled)
    }

    #[test]
    fn power_on_nop() {
        let mut cpu = cpu_at(0x0100);
        cpu.bus.load(0x0100, &[0x00]);
        let f_before = cpu.regs.f;
        let cycles = cpu.step().unwrap();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.regs.pc, 0x0101);
        assert_eq!(cpu.regs.f, f_before);
    }

    #[test]
    fn add_a_b_sets_zero_half_carry_and_carry() {
        let mut cpu = cpu_at(0x0100);
        cpu.regs.a = 0x3A;
        cpu.regs.b = 0xC6;
        cpu.bus.load(0x0100, &[0x80]);
        let cycles = cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x00);
        assert_eq!(cycles, 4);
        assert!(cpu.regs.get_flag(register_file::Flag::Z));
        assert!(!cpu.regs.get_flag(register_file::Flag::N));
        assert!(cpu.regs.get_flag(register_file::Flag::H));
        assert!(cpu.regs.get_flag(register_file::Flag::C));
    }

    #[test]
    fn inc_a_half_carry_boundary() {
        let mut cpu = cpu_at(0x0100);
        cpu.regs.a = 0x0F;
        cpu.regs.set_flag(register_file::Flag::C, true);
        cpu.bus.load(0x0100, &[0x3C]);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x10);
        assert!(!cpu.regs.get_flag(register_file::Flag::Z));
        assert!(!cpu.regs.get_flag(register_file::Flag::N));
        assert!(cpu.regs.get_flag(register_file::Flag::H));
        assert!(cpu.regs.get_flag(register_file::Flag::C));
    }

    #[test]
    fn conditional_jump_not_taken() {
        let mut cpu = cpu_at(0x1000);
        cpu.bus.load(0x1000, &[0x28, 0x05, 0x00]);
        let cycles = cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x1002);
        assert_eq!(cycles, 8);
    }

    #[test]
    fn call_then_ret_round_trip() {
        let mut cpu = cpu_at(0x2000);
        cpu.regs.sp = 0xFFFE;
        cpu.bus.load(0x2000, &[0xCD, 0x34, 0x12]);
        cpu.bus.load(0x1234, &[0xC9]);
        let c1 = cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x1234);
        assert_eq!(c1, 24);
        assert_eq!(cpu.bus.read8(0xFFFC), 0x03);
        assert_eq!(cpu.bus.read8(0xFFFD), 0x20);
        let c2 = cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x2003);
        assert_eq!(cpu.regs.sp, 0xFFFE);
        assert_eq!(c1 + c2, 40);
    }

    #[test]
    fn cb_swap() {
        let mut cpu = cpu_at(0x0100);
        cpu.regs.a = 0xAB;
        cpu.bus.load(0x0100, &[0xCB, 0x37]);
        let cycles = cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0xBA);
        assert_eq!(cycles, 8);
        assert!(!cpu.regs.get_flag(register_file::Flag::Z));
        assert!(!cpu.regs.get_flag(register_file::Flag::C));
    }

    #[test]
    fn illegal_opcode_leaves_pc_at_fault() {
        let mut cpu = cpu_at(0x0100);
        cpu.bus.load(0x0100, &[0xD3]);
        let err = cpu.step().unwrap_err();
        assert_eq!(
            err,
            CpuError::IllegalOpcode {
                byte: 0xD3,
                pc: 0x0100
            }
        );
        assert_eq!(cpu.regs.pc, 0x0100);
    }

    #[test]
    fn interrupt_dispatch_when_ime_enabled() {
        let mut cpu = cpu_at(0x0150);
        cpu.regs.sp = 0xFFFE;
        cpu.ime = ImeState::Enabled;
        cpu.bus.write8(IE_ADDR, 0x01);
        cpu.bus.write8(IF_ADDR, 0x01);
        cpu.bus.load(0x0150, &[0x00]);
        let cycles = cpu.step().unwrap();
        assert_eq!(cycles, 20);
        assert_eq!(cpu.regs.pc, 0x0040);
        assert_eq!(cpu.ime, ImeState::Disabled);
        assert_eq!(cpu.bus.read8(IF_ADDR), 0x00);
    }

    #[test]
    fn halt_wakes_on_pending_interrupt_without_servicing_when_ime_disabled() {
        let mut cpu = cpu_at(0x0200);
        cpu.halted = true;
        cpu.ime = ImeState::Disabled;
        cpu.bus.write8(IE_ADDR, 0x01);
        cpu.bus.write8(IF_ADDR, 0x01);
        cpu.bus.load(0x0200, &[0x00]);
        let cycles = cpu.step().unwrap();
        assert!(!cpu.halted);
        assert_eq!(cpu.regs.pc, 0x0201);
        assert_eq!(cycles, 4);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        let mut cpu = cpu_at(0x0100);
        cpu.bus.load(0x0100, &[0xFB, 0x00, 0x00]);
        cpu.step().unwrap();
        assert_eq!(cpu.ime, ImeState::PendingEnable);
        cpu.step().unwrap();
        assert_eq!(cpu.ime, ImeState::Enabled);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut cpu = cpu_at(0x0150);
        cpu.regs.a = 0x12;
        cpu.regs.b = 0x34;
        cpu.ime = ImeState::Enabled;
        let bytes = cpu.snapshot().to_bytes();
        let mut restored = cpu_at(0);
        restored.restore(&bytes).unwrap();
        assert_eq!(restored.regs.a, 0x12);
        assert_eq!(restored.regs.b, 0x34);
        assert_eq!(restored.regs.pc, 0x0150);
        assert_eq!(restored.ime, ImeState::Enabled);
    }

    #[test]
    fn restore_rejects_wrong_length() {
        let mut cpu = cpu_at(0);
        let err = cpu.restore(&[0u8; 3]).unwrap_err();
        assert_eq!(
            err,
            CpuError::InvalidSnapshot {
                expected: crate::snapshot::SNAPSHOT_LEN,
                actual: 3
            }
        );
    }
}
