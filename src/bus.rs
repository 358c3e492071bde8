//! The memory bus contract the CPU core talks to the outside world through.
//!
//! The core never owns or interprets address semantics beyond the 0xFF00+n
//! I/O shortcut used by `LDH`/`LDH (C)`. Region decoding (ROM banks,
//! VRAM, I/O registers, HRAM, the interrupt-enable register) is entirely the
//! bus implementer's responsibility.

/// A 16-bit address space the CPU can read from and write to.
///
/// Both methods take `&mut self`: a real backing store (PPU/timer-driven
/// memory map) commonly needs to mutate internal state on a read, e.g.
/// advancing a FIFO or clearing a latched flag, so the core never assumes
/// reads are side-effect free.
pub trait Bus {
    fn read8(&mut self, addr: u16) -> u8;
    fn write8(&mut self, addr: u16, value: u8);
}

/// Which kind of bus access was in flight when a [`CpuError::BusFault`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read,
    Write,
}

/// The core's error taxonomy. Returned from [`Cpu::step`](crate::cpu::Cpu::step)
/// and [`Cpu::restore`](crate::cpu::Cpu::restore) without mutating state past the
/// failing operation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// An opcode in the illegal set (0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC,
    /// 0xED, 0xF4, 0xFC, 0xFD) was fetched. `pc` is the address of the
    /// illegal opcode byte itself; it is left there, unadvanced.
    #[error("illegal opcode {byte:#04X} at PC={pc:#06X}")]
    IllegalOpcode { byte: u8, pc: u16 },

    /// A `Bus` collaborator reported an access that could not be served.
    /// The core's own `Bus` trait is infallible by signature, so the core
    /// never constructs this itself; it exists for collaborators that wrap
    /// a fallible backing store and want to surface that failure through a
    /// `step()`-shaped API of their own.
    #[error("bus fault during {op:?} at {addr:#06X}")]
    BusFault { addr: u16, op: BusOp },

    /// [`Cpu::restore`](crate::cpu::Cpu::restore) was given a byte slice of the wrong length.
    #[error("invalid snapshot: expected {expected} bytes, got {actual}")]
    InvalidSnapshot { expected: usize, actual: usize },
}
