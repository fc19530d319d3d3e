use thiserror::Error;

use crate::GuestAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    W8,
    W16,
    W32,
    Float,
    Double,
}

impl AccessWidth {
    pub const fn bytes(self) -> u32 {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

/// A guest-visible memory fault. Not an integrity violation: the guest did something the memory
/// map refuses, and the driver decides how the guest CPU observes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("memory fault: {width:?} access at {addr:#010x}")]
pub struct MemFault {
    pub addr: GuestAddr,
    pub width: AccessWidth,
}

/// Sized guest memory access, implemented by the emulator's address-space dispatcher.
pub trait MemoryInterface {
    fn read_8(&mut self, addr: GuestAddr) -> Result<u8, MemFault>;
    fn read_16(&mut self, addr: GuestAddr) -> Result<u16, MemFault>;
    fn read_32(&mut self, addr: GuestAddr) -> Result<u32, MemFault>;
    fn read_float(&mut self, addr: GuestAddr) -> Result<f32, MemFault>;
    fn read_double(&mut self, addr: GuestAddr) -> Result<f64, MemFault>;

    fn write_8(&mut self, addr: GuestAddr, val: u8) -> Result<(), MemFault>;
    fn write_16(&mut self, addr: GuestAddr, val: u16) -> Result<(), MemFault>;
    fn write_32(&mut self, addr: GuestAddr, val: u32) -> Result<(), MemFault>;
    fn write_float(&mut self, addr: GuestAddr, val: f32) -> Result<(), MemFault>;
    fn write_double(&mut self, addr: GuestAddr, val: f64) -> Result<(), MemFault>;
}

/// CPU context handed to a block. Memory ops go through [`ExecContext::memory`]; fallback and
/// call ops receive the context itself.
pub trait ExecContext {
    type Memory: MemoryInterface + ?Sized;

    fn memory(&mut self) -> &mut Self::Memory;
}

/// Flat little-endian RAM starting at guest address `base`. Accesses outside the backing buffer
/// fault.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatMemory {
    base: GuestAddr,
    data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(base: GuestAddr, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn base(&self) -> GuestAddr {
        self.base
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn range(
        &self,
        addr: GuestAddr,
        width: AccessWidth,
    ) -> Result<core::ops::Range<usize>, MemFault> {
        let fault = MemFault { addr, width };
        let off = addr.checked_sub(self.base).ok_or(fault)? as usize;
        let end = off.checked_add(width.bytes() as usize).ok_or(fault)?;
        if end > self.data.len() {
            return Err(fault);
        }
        Ok(off..end)
    }

    fn read<const N: usize>(
        &self,
        addr: GuestAddr,
        width: AccessWidth,
    ) -> Result<[u8; N], MemFault> {
        let range = self.range(addr, width)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.data[range]);
        Ok(buf)
    }

    fn write(&mut self, addr: GuestAddr, width: AccessWidth, bytes: &[u8]) -> Result<(), MemFault> {
        let range = self.range(addr, width)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl MemoryInterface for FlatMemory {
    fn read_8(&mut self, addr: GuestAddr) -> Result<u8, MemFault> {
        self.read::<1>(addr, AccessWidth::W8).map(u8::from_le_bytes)
    }

    fn read_16(&mut self, addr: GuestAddr) -> Result<u16, MemFault> {
        self.read::<2>(addr, AccessWidth::W16).map(u16::from_le_bytes)
    }

    fn read_32(&mut self, addr: GuestAddr) -> Result<u32, MemFault> {
        self.read::<4>(addr, AccessWidth::W32).map(u32::from_le_bytes)
    }

    fn read_float(&mut self, addr: GuestAddr) -> Result<f32, MemFault> {
        self.read::<4>(addr, AccessWidth::Float).map(f32::from_le_bytes)
    }

    fn read_double(&mut self, addr: GuestAddr) -> Result<f64, MemFault> {
        self.read::<8>(addr, AccessWidth::Double).map(f64::from_le_bytes)
    }

    fn write_8(&mut self, addr: GuestAddr, val: u8) -> Result<(), MemFault> {
        self.write(addr, AccessWidth::W8, &val.to_le_bytes())
    }

    fn write_16(&mut self, addr: GuestAddr, val: u16) -> Result<(), MemFault> {
        self.write(addr, AccessWidth::W16, &val.to_le_bytes())
    }

    fn write_32(&mut self, addr: GuestAddr, val: u32) -> Result<(), MemFault> {
        self.write(addr, AccessWidth::W32, &val.to_le_bytes())
    }

    fn write_float(&mut self, addr: GuestAddr, val: f32) -> Result<(), MemFault> {
        self.write(addr, AccessWidth::Float, &val.to_le_bytes())
    }

    fn write_double(&mut self, addr: GuestAddr, val: f64) -> Result<(), MemFault> {
        self.write(addr, AccessWidth::Double, &val.to_le_bytes())
    }
}
