//! On-disk record layout.
//!
//! All records are plain `#[repr(C)]` structs of fixed-width integers and
//! fixed-size name arrays, written to the device by reinterpreting the struct
//! as bytes. Integers are native-endian; the format is little-endian on the
//! hosts this runs on.

use crate::DATA_PER_FILE;
use crate::MAX_NAME;
use crate::device::Device;
use crate::error::Result;
use std::mem;
use std::mem::size_of;
use std::ptr;
use std::slice;

/// The on-disk super-block.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SuperRecord {
    /// The filesystem sentinel; anything else means "not formatted".
    pub magic: u32,
    /// Bytes in use. Persisted but not maintained by any alloc/free path.
    pub sz_usage: i32,
    /// Number of inode slots in the inode table.
    pub num_ino: i32,
    /// Blocks spanned by the inode bitmap.
    pub map_inode_blks: i32,
    /// Byte offset of the inode bitmap region.
    pub map_inode_offset: i32,
    /// Reserved.
    pub map_data: i32,
    /// Blocks spanned by the data bitmap.
    pub map_data_blks: i32,
    /// Byte offset of the data bitmap region.
    pub map_data_offset: i32,
    /// Byte offset of the inode table.
    pub inode_offset: i32,
    /// Byte offset of the data area.
    pub data_offset: i32,
}

/// An on-disk inode. One record per inode slot; the slot is a full block.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InodeRecord {
    /// Index of this inode in the inode bitmap.
    pub ino: i32,
    /// File size in bytes.
    pub size: i32,
    /// Link count. Reserved.
    pub link: i32,
    /// Number of child entries. Meaningful for directories only.
    pub dir_cnt: i32,
    /// Indices into the data area of the blocks owned by this file.
    pub p_blk: [i32; DATA_PER_FILE],
    /// File type, one of the [`FileType`](crate::node::FileType) raw values.
    pub ftype: u32,
    /// Link target. Meaningful for symbolic links only.
    pub target_path: [u8; MAX_NAME],
}

/// An on-disk directory entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DentryRecord {
    /// The inode the entry points at.
    pub ino: i32,
    /// Validity flag. Written as 1, ignored on read.
    pub valid: i32,
    /// File type of the child.
    pub ftype: u32,
    /// Child name, zero-padded.
    pub fname: [u8; MAX_NAME],
}

/// Reads a record from the device at the given byte offset.
///
/// Only meant for the record types above: plain integer/byte-array structs
/// for which any bit pattern is a value.
pub(crate) fn read_record<T>(dev: &mut Device, offset: usize) -> Result<T> {
    let mut record: T = unsafe { mem::zeroed() };
    let slice = unsafe {
        slice::from_raw_parts_mut(&mut record as *mut T as *mut u8, size_of::<T>())
    };
    dev.read(offset, slice)?;
    Ok(record)
}

/// Writes a record to the device at the given byte offset.
pub(crate) fn write_record<T>(dev: &mut Device, offset: usize, record: &T) -> Result<()> {
    let slice = unsafe {
        slice::from_raw_parts(record as *const T as *const u8, size_of::<T>())
    };
    dev.write(offset, slice)
}

/// Reinterprets the front of a byte buffer as a record.
pub(crate) fn record_from_bytes<T>(bytes: &[u8]) -> T {
    debug_assert!(bytes.len() >= size_of::<T>());
    unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

/// Packs a name into a zero-padded on-disk name field.
///
/// The caller has already checked that the name fits with its terminator.
pub(crate) fn pack_name(name: &str) -> [u8; MAX_NAME] {
    let mut field = [0u8; MAX_NAME];
    let bytes = name.as_bytes();
    field[..bytes.len()].copy_from_slice(bytes);
    field
}

/// Unpacks a zero-padded on-disk name field.
pub(crate) fn unpack_name(field: &[u8; MAX_NAME]) -> String {
    let len = field.iter().position(|b| *b == 0).unwrap_or(MAX_NAME);
    String::from_utf8_lossy(&field[..len]).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BLK_SZ;
    use crate::driver::MemDriver;

    #[test]
    fn record_sizes() {
        assert_eq!(size_of::<SuperRecord>(), 40);
        assert_eq!(size_of::<InodeRecord>(), 172);
        assert_eq!(size_of::<DentryRecord>(), 140);
    }

    #[test]
    fn record_round_trip() {
        let mut dev = Device::open(Box::new(MemDriver::new(16 * BLK_SZ))).unwrap();
        let record = DentryRecord {
            ino: 7,
            valid: 1,
            ftype: 1,
            fname: pack_name("lost+found"),
        };
        write_record(&mut dev, 3 * BLK_SZ + 140, &record).unwrap();

        let back: DentryRecord = read_record(&mut dev, 3 * BLK_SZ + 140).unwrap();
        assert_eq!(back.ino, 7);
        assert_eq!(back.valid, 1);
        assert_eq!(back.ftype, 1);
        assert_eq!(unpack_name(&back.fname), "lost+found");
    }

    #[test]
    fn names() {
        let field = pack_name("abc");
        assert_eq!(&field[..4], &[b'a', b'b', b'c', 0]);
        assert_eq!(unpack_name(&field), "abc");
    }
}
