//! In-memory flash store for tests and simulation.
//!
//! Models NOR flash behavior: erased bytes read `0xFF`, and programming
//! can only clear bits. Code that forgets to erase before writing produces
//! corrupt data here just as it would on the real part.

use crate::error::{Error, Result};
use crate::flash::{BLOCK_SIZE, FlashStore};

/// NOR-style in-memory flash.
pub struct MemoryFlash {
    data: Vec<u8>,
    device_id: u16,
}

impl MemoryFlash {
    /// Create a chip of `capacity` bytes, fully erased, reporting the
    /// given device identifier.
    pub fn new(capacity: u32, device_id: u16) -> Self {
        Self {
            data: vec![0xFF; capacity as usize],
            device_id,
        }
    }

    /// Chip capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    /// Direct view of the stored bytes.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        let end = offset as usize + len;
        if end > self.data.len() {
            return Err(Error::Protocol(format!(
                "flash access past end: {end} > {}",
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl FlashStore for MemoryFlash {
    fn device_id(&mut self) -> u16 {
        self.device_id
    }

    fn erase_block(&mut self, offset: u32) -> Result<()> {
        self.check_range(offset, 1)?;
        let start = (offset - offset % BLOCK_SIZE) as usize;
        let end = (start + BLOCK_SIZE as usize).min(self.data.len());
        self.data[start..end].fill(0xFF);
        Ok(())
    }

    fn write_byte(&mut self, offset: u32, value: u8) -> Result<()> {
        self.check_range(offset, 1)?;
        // programming clears bits, it never sets them
        self.data[offset as usize] &= value;
        Ok(())
    }

    fn read_bytes(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[offset as usize..offset as usize + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erased_reads_ff() {
        let mut flash = MemoryFlash::new(1024, 0xEF30);
        let mut buf = [0u8; 4];
        flash.read_bytes(100, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
    }

    #[test]
    fn test_write_only_clears_bits() {
        let mut flash = MemoryFlash::new(BLOCK_SIZE, 0xEF30);
        flash.write_byte(0, 0xF0).unwrap();
        flash.write_byte(0, 0x0F).unwrap();
        let mut buf = [0u8; 1];
        flash.read_bytes(0, &mut buf).unwrap();
        // two writes without an erase in between compound
        assert_eq!(buf[0], 0x00);

        flash.erase_block(0).unwrap();
        flash.write_byte(0, 0xA5).unwrap();
        flash.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xA5);
    }

    #[test]
    fn test_erase_is_block_aligned() {
        let mut flash = MemoryFlash::new(BLOCK_SIZE * 2, 0xEF30);
        flash.write_bytes(0, &[0x00; 8]).unwrap();
        flash.write_bytes(BLOCK_SIZE, &[0x00; 8]).unwrap();

        // erasing by any offset inside the second block leaves the first
        flash.erase_block(BLOCK_SIZE + 17).unwrap();

        let mut buf = [0u8; 8];
        flash.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [0x00; 8]);
        flash.read_bytes(BLOCK_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut flash = MemoryFlash::new(64, 0xEF30);
        assert!(flash.write_byte(64, 0x00).is_err());
        let mut buf = [0u8; 2];
        assert!(flash.read_bytes(63, &mut buf).is_err());
    }
}
