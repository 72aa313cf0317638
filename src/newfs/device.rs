//! Byte-granular access on top of a sector-granular driver.
//!
//! The driver only moves [`IO_SZ`](crate::IO_SZ)-sized sectors at aligned
//! positions; the filesystem wants to read and write arbitrary byte ranges.
//! [`Device`] bridges the two with block-aligned read-modify-write: the
//! covering [`BLK_SZ`](crate::BLK_SZ)-aligned window is transferred whole,
//! preserving the neighboring bytes.

use crate::driver::Driver;
use crate::error::Result;

/// Rounds `value` down to a multiple of `round`.
pub(crate) fn round_down(value: usize, round: usize) -> usize {
    value / round * round
}

/// Rounds `value` up to a multiple of `round`.
pub(crate) fn round_up(value: usize, round: usize) -> usize {
    value.div_ceil(round) * round
}

/// A block device with byte-granular reads and writes.
pub struct Device {
    driver: Box<dyn Driver>,
    sz_disk: usize,
    sz_io: usize,
    sz_blk: usize,
}

impl Device {
    /// Opens the device, querying its geometry from the driver.
    pub fn open(mut driver: Box<dyn Driver>) -> Result<Self> {
        let sz_disk = driver.disk_size()?;
        let sz_io = driver.io_size()?;
        Ok(Self {
            driver,
            sz_disk,
            sz_io,
            sz_blk: 2 * sz_io,
        })
    }

    /// Returns the total size of the device, in bytes.
    pub fn sz_disk(&self) -> usize {
        self.sz_disk
    }

    /// Returns the driver's transfer unit, in bytes.
    pub fn sz_io(&self) -> usize {
        self.sz_io
    }

    /// Returns the filesystem's logical block size, in bytes.
    pub fn sz_blk(&self) -> usize {
        self.sz_blk
    }

    /// Reads `buf.len()` bytes starting at byte offset `start`.
    pub fn read(&mut self, start: usize, buf: &mut [u8]) -> Result<()> {
        let start_aligned = round_down(start, self.sz_blk);
        let bias = start - start_aligned;
        let size_aligned = round_up(buf.len() + bias, self.sz_blk);

        let mut scratch = vec![0u8; size_aligned];
        self.driver.seek(start_aligned as u64)?;
        for sector in scratch.chunks_mut(self.sz_io) {
            self.driver.read(sector)?;
        }

        buf.copy_from_slice(&scratch[bias..bias + buf.len()]);
        Ok(())
    }

    /// Writes `buf` at byte offset `start`, preserving the rest of the
    /// covering aligned window.
    pub fn write(&mut self, start: usize, buf: &[u8]) -> Result<()> {
        let start_aligned = round_down(start, self.sz_blk);
        let bias = start - start_aligned;
        let size_aligned = round_up(buf.len() + bias, self.sz_blk);

        let mut scratch = vec![0u8; size_aligned];
        self.read(start_aligned, &mut scratch)?;
        scratch[bias..bias + buf.len()].copy_from_slice(buf);

        self.driver.seek(start_aligned as u64)?;
        for sector in scratch.chunks(self.sz_io) {
            self.driver.write(sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BLK_SZ;
    use crate::driver::MemDriver;

    fn device(size: usize) -> Device {
        Device::open(Box::new(MemDriver::new(size))).unwrap()
    }

    #[test]
    fn geometry() {
        let dev = device(16 * BLK_SZ);
        assert_eq!(dev.sz_disk(), 16 * BLK_SZ);
        assert_eq!(dev.sz_blk(), 2 * dev.sz_io());
    }

    #[test]
    fn unaligned_round_trip() {
        let mut dev = device(16 * BLK_SZ);

        // Crosses a block boundary: 1000..1005 with BLK_SZ = 1024
        dev.write(1000, b"hello").unwrap();
        let mut back = [0u8; 5];
        dev.read(1000, &mut back).unwrap();
        assert_eq!(&back, b"hello");
    }

    #[test]
    fn write_preserves_neighbors() {
        let mut dev = device(16 * BLK_SZ);

        let pattern: Vec<u8> = (0..2 * BLK_SZ).map(|i| i as u8).collect();
        dev.write(0, &pattern).unwrap();

        // Overwrite a few bytes in the middle of the window
        dev.write(100, &[0xff; 8]).unwrap();

        let mut back = vec![0u8; 2 * BLK_SZ];
        dev.read(0, &mut back).unwrap();
        assert_eq!(&back[..100], &pattern[..100]);
        assert_eq!(&back[100..108], &[0xff; 8]);
        assert_eq!(&back[108..], &pattern[108..]);
    }

    #[test]
    fn large_span() {
        let mut dev = device(16 * BLK_SZ);

        let data: Vec<u8> = (0..3 * BLK_SZ + 17).map(|i| (i * 7) as u8).collect();
        dev.write(513, &data).unwrap();

        let mut back = vec![0u8; data.len()];
        dev.read(513, &mut back).unwrap();
        assert_eq!(back, data);
    }
}
