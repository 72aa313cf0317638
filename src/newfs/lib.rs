//! `newfs` is a small block-addressable filesystem layered over a raw device.
//!
//! The device is carved into five contiguous, block-aligned regions:
//!
//! ```text
//! | Super | Inode Bitmap | Data Bitmap | Inode Table | Data Area |
//! ```
//!
//! Every file owns exactly one inode block and [`DATA_PER_FILE`] data blocks,
//! handed out by two first-fit bitmaps. Directories store their entries
//! back-to-back inside their data blocks, never straddling a block boundary.
//! The whole tree lives in memory while mounted, is loaded lazily path by
//! path, and is flushed back to the device at unmount.
//!
//! [`fs::NewFs`] is the mount handle; all operations go through it.

pub mod bitmap;
pub mod device;
pub mod disk;
pub mod driver;
pub mod error;
pub mod fs;
pub mod node;
pub mod ops;

pub use error::Error;
pub use error::Result;
pub use fs::NewFs;

/// The device driver's native transfer unit, in bytes.
pub const IO_SZ: usize = 512;
/// The filesystem's logical block, in bytes. Exactly twice [`IO_SZ`].
pub const BLK_SZ: usize = 2 * IO_SZ;
/// Bytes reserved per name field, terminator included.
pub const MAX_NAME: usize = 128;
/// Number of inode blocks owned by one file.
pub const INODE_PER_FILE: usize = 1;
/// Maximum number of logical data blocks owned by one file.
pub const DATA_PER_FILE: usize = 6;
/// The inode number of `/`.
pub const ROOT_INO: u32 = 0;
/// The super-block sentinel.
pub const MAGIC: u32 = 0x52415453;
/// Byte offset of the super-block on the device.
pub const SUPER_OFFSET: usize = 0;
/// Permission bits reported for every file.
pub const DEFAULT_PERM: u32 = 0o777;
