//! A fixed-layout save state for [`Cpu`](crate::cpu::Cpu).
//!
//! `Snapshot` is intentionally not a `serde`-driven format: the layout is an
//! exact byte-for-byte wire format, so the round trip is implemented
//! directly against it rather than through a general-purpose serializer.
//! Collaborators that want a richer, versioned on-disk format can wrap
//! `Snapshot` (or `Cpu`'s own `Serialize`/`Deserialize` derive) in one of
//! their own.

use crate::bus::CpuError;
use crate::cpu::ImeState;

/// Number of bytes in the wire layout: six little-endian `u16` register
/// fields followed by three boolean bytes.
pub const SNAPSHOT_LEN: usize = 15;

/// The fixed-layout save state: `{AF, BC, DE, HL, SP, PC, IME, halted, ei_pending}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
    pub ime: ImeState,
    pub halted: bool,
    pub ei_pending: bool,
}

impl Snapshot {
    /// Serialize to the 15-byte wire layout.
    pub fn to_bytes(self) -> [u8; SNAPSHOT_LEN] {
        let mut bytes = [0u8; SNAPSHOT_LEN];
        bytes[0..2].copy_from_slice(&self.af.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.bc.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.de.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.hl.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.sp.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.pc.to_le_bytes());
        bytes[12] = matches!(self.ime, ImeState::Enabled) as u8;
        bytes[13] = self.halted as u8;
        bytes[14] = self.ei_pending as u8;
        bytes
    }

    /// Parse the 15-byte wire layout. `ei_pending` and `ime` are mutually
    /// informative: a restored CPU with `ei_pending` set re-enters the
    /// pending-enable state on its first `step()` regardless of the `ime`
    /// byte, matching EI's normal one-step delay.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CpuError> {
        if bytes.len() != SNAPSHOT_LEN {
            return Err(CpuError::InvalidSnapshot {
                expected: SNAPSHOT_LEN,
                actual: bytes.len(),
            });
        }
        let read_u16 = |lo: usize| u16::from_le_bytes([bytes[lo], bytes[lo + 1]]);
        let ei_pending = bytes[14] != 0;
        let ime = if ei_pending {
            ImeState::PendingEnable
        } else if bytes[12] != 0 {
            ImeState::Enabled
        } else {
            ImeState::Disabled
        };
        Ok(Snapshot {
            af: read_u16(0),
            bc: read_u16(2),
            de: read_u16(4),
            hl: read_u16(6),
            sp: read_u16(8),
            pc: read_u16(10),
            ime,
            halted: bytes[13] != 0,
            ei_pending,
        })
    }
}
