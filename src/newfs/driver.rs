//! The downward interface to the block device.
//!
//! A [`Driver`] transfers whole sectors of [`io_size`](Driver::io_size) bytes
//! at sector-aligned positions; everything byte-granular is built on top by
//! [`device::Device`](crate::device::Device).

use crate::IO_SZ;
use crate::error::Result;
use libc::ioctl;
use std::cell::RefCell;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::rc::Rc;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as u64)
    };
}

/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: u64 = ior!(0x12, 114, u64);

/// A raw block device.
///
/// Transfers move exactly [`io_size`](Driver::io_size) bytes at the current
/// position and advance it; the caller keeps positions sector-aligned.
pub trait Driver {
    /// Returns the total size of the device, in bytes.
    fn disk_size(&mut self) -> Result<usize>;

    /// Returns the device's native transfer unit, in bytes.
    fn io_size(&mut self) -> Result<usize>;

    /// Moves the device position to `offset` bytes from the start.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Reads one sector into `buf`, whose length is the transfer unit.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Writes one sector from `buf`, whose length is the transfer unit.
    fn write(&mut self, buf: &[u8]) -> Result<()>;
}

/// A driver backed by a device file or a regular file holding an image.
pub struct FileDriver {
    file: File,
}

impl FileDriver {
    /// Opens the device at the given path for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
        })
    }
}

impl Driver for FileDriver {
    fn disk_size(&mut self) -> Result<usize> {
        let metadata = self.file.metadata()?;
        let file_type = metadata.file_type();
        if file_type.is_block_device() || file_type.is_char_device() {
            let mut size: u64 = 0;
            let ret = unsafe { ioctl(self.file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
            if ret < 0 {
                return Err(Error::last_os_error().into());
            }
            Ok(size as usize)
        } else {
            Ok(metadata.len() as usize)
        }
    }

    fn io_size(&mut self) -> Result<usize> {
        Ok(IO_SZ)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }
}

/// A driver backed by an in-memory buffer.
///
/// Clones share the same backing buffer, so the "device" survives an
/// unmount/remount cycle as long as one clone is kept around.
#[derive(Clone)]
pub struct MemDriver {
    data: Rc<RefCell<Vec<u8>>>,
    pos: usize,
}

impl MemDriver {
    /// Creates a zero-filled device of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0; size])),
            pos: 0,
        }
    }
}

impl Driver for MemDriver {
    fn disk_size(&mut self) -> Result<usize> {
        Ok(self.data.borrow().len())
    }

    fn io_size(&mut self) -> Result<usize> {
        Ok(IO_SZ)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = offset as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let data = self.data.borrow();
        let end = self.pos + buf.len();
        if end > data.len() {
            return Err(Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        buf.copy_from_slice(&data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut data = self.data.borrow_mut();
        let end = self.pos + buf.len();
        if end > data.len() {
            return Err(Error::from(io::ErrorKind::WriteZero).into());
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_driver_round_trip() {
        let mut drv = MemDriver::new(4 * IO_SZ);
        let sector: Vec<u8> = (0..IO_SZ).map(|i| i as u8).collect();

        drv.seek(IO_SZ as u64).unwrap();
        drv.write(&sector).unwrap();

        let mut back = vec![0; IO_SZ];
        drv.seek(IO_SZ as u64).unwrap();
        drv.read(&mut back).unwrap();
        assert_eq!(back, sector);

        // The first sector was never touched
        drv.seek(0).unwrap();
        drv.read(&mut back).unwrap();
        assert!(back.iter().all(|b| *b == 0));
    }

    #[test]
    fn mem_driver_clone_shares_backing() {
        let mut drv = MemDriver::new(2 * IO_SZ);
        let mut other = drv.clone();

        let sector = vec![0xab; IO_SZ];
        drv.seek(0).unwrap();
        drv.write(&sector).unwrap();

        let mut back = vec![0; IO_SZ];
        other.seek(0).unwrap();
        other.read(&mut back).unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn mem_driver_out_of_range() {
        let mut drv = MemDriver::new(IO_SZ);
        let mut buf = vec![0; IO_SZ];
        drv.seek(IO_SZ as u64).unwrap();
        assert!(drv.read(&mut buf).is_err());
        assert!(drv.write(&buf).is_err());
    }
}
