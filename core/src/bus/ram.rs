use anyhow::{Result, bail};
use log::*;

use super::{Address, Bus, BusResult, IrqSource, RealAddress};
use crate::tickable::{Tickable, Ticks};
use crate::types::Byte;

/// Flat RAM covering the low end of the address space. Accesses past the
/// end of the RAM assert BERR.
pub struct RamBus {
    mem: Vec<Byte>,
    mask: Address,
    irq_level: Option<u8>,
    cycles: Ticks,
    resets: usize,
}

impl RamBus {
    pub fn new(size: usize, mask: Address) -> Self {
        Self {
            mem: vec![0; size],
            mask,
            irq_level: None,
            cycles: 0,
            resets: 0,
        }
    }

    /// Copies `data` into RAM at `addr`
    pub fn load(&mut self, addr: Address, data: &[Byte]) -> Result<()> {
        let start = addr as usize;
        let Some(end) = start.checked_add(data.len()) else {
            bail!("Image does not fit in address space");
        };
        if end > self.mem.len() {
            bail!(
                "Image of {} bytes at {:08X} exceeds RAM size {}",
                data.len(),
                addr,
                self.mem.len()
            );
        }
        self.mem[start..end].copy_from_slice(data);
        Ok(())
    }

    pub fn set_irq_level(&mut self, level: Option<u8>) {
        self.irq_level = level;
    }

    pub fn peek(&self, addr: Address) -> Option<Byte> {
        self.mem.get(addr as usize).copied()
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    pub fn cycles(&self) -> Ticks {
        self.cycles
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Bus<Address, Byte> for RamBus {
    fn get_mask(&self) -> Address {
        self.mask
    }

    fn read(&mut self, addr: Address) -> BusResult<Byte> {
        match self.mem.get(addr as usize) {
            Some(&v) => BusResult::Ok(v),
            None => BusResult::BusError,
        }
    }

    fn write(&mut self, addr: Address, val: Byte) -> BusResult<Byte> {
        match self.mem.get_mut(addr as usize) {
            Some(v) => {
                *v = val;
                BusResult::Ok(val)
            }
            None => BusResult::BusError,
        }
    }

    fn reset(&mut self, hard: bool) -> Result<()> {
        debug!("Bus reset (hard: {})", hard);
        self.resets += 1;
        Ok(())
    }

    fn real_address(&self, addr: Address) -> Option<RealAddress> {
        let real = addr as usize;
        (real < self.mem.len()).then_some(real)
    }

    fn read_real(&self, real: RealAddress) -> Option<Byte> {
        self.mem.get(real).copied()
    }
}

impl Tickable for RamBus {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.cycles += ticks;
        Ok(ticks)
    }
}

impl IrqSource for RamBus {
    fn get_irq(&mut self) -> Option<u8> {
        self.irq_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_read() {
        let mut b = RamBus::new(0x100, 0x00FF_FFFF);
        b.load(0x10, &[1, 2, 3]).unwrap();

        assert_eq!(b.read(0x10), BusResult::Ok(1));
        assert_eq!(b.read(0x12), BusResult::Ok(3));
        assert_eq!(b.read(0x100), BusResult::BusError);
    }

    #[test]
    fn load_too_large() {
        let mut b = RamBus::new(0x10, 0x00FF_FFFF);
        assert!(b.load(0x08, &[0; 9]).is_err());
    }
}
