//! The operation surface exposed to the hook layer.
//!
//! One method per hook. Every method resolves its path first, then mutates
//! the in-core tree; nothing is written to the device before unmount except
//! the inode records of freshly created files.

use crate::DATA_PER_FILE;
use crate::DEFAULT_PERM;
use crate::MAX_NAME;
use crate::disk::DentryRecord;
use crate::error::Error;
use crate::error::Result;
use crate::fs::NewFs;
use crate::fs::Resolved;
use crate::node::Content;
use crate::node::Dentry;
use crate::node::FileType;
use std::cmp::min;
use std::mem::size_of;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// A stat-like record synthesized for the hook layer.
pub struct Attr {
    /// File type and permission bits.
    pub mode: u32,
    /// Link count: 1, or 2 for the root.
    pub nlink: u32,
    /// Size in bytes. For a directory, the packed size of its entries; for
    /// the root, the super-block's usage figure.
    pub size: u64,
    /// Owner, taken from the calling process.
    pub uid: u32,
    /// Group, taken from the calling process.
    pub gid: u32,
    /// Access time: now.
    pub atime: i64,
    /// Modification time: now.
    pub mtime: i64,
    /// The driver's transfer unit.
    pub blksize: u32,
    /// Device sectors, reported for the root only.
    pub blocks: u64,
}

/// Returns the current Unix timestamp in seconds.
fn timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl NewFs {
    /// Creates an empty directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create(path, FileType::Directory)
    }

    /// Creates a file at `path`; `mode` selects a directory or a regular
    /// file, anything else falls back to a regular file.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<()> {
        let ftype = if mode & libc::S_IFMT == libc::S_IFDIR {
            FileType::Directory
        } else {
            FileType::Regular
        };
        self.create(path, ftype)
    }

    fn create(&mut self, path: &str, ftype: FileType) -> Result<()> {
        match self.resolve(path)? {
            Resolved::Found { .. } => Err(Error::Exists),
            Resolved::ThroughFile { .. } => Err(Error::Unsupported),
            Resolved::Missing { leaf: false, .. } => Err(Error::NotFound),
            Resolved::Missing { dir, name, leaf: true } => {
                if name.len() >= MAX_NAME {
                    return Err(Error::Inval);
                }
                let ino = self.alloc_inode(ftype)?;
                self.sync_inode(ino)?;
                let dentry = Dentry {
                    name,
                    ftype,
                    ino,
                };
                if let Err(err) = self.alloc_dentry(dir, dentry) {
                    let _ = self.drop_inode(ino);
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// Removes the file at `path`. A directory takes its subtree with it.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        match self.resolve(path)? {
            Resolved::Found { parent: None, .. } => Err(Error::Inval),
            Resolved::Found { parent: Some(parent), ino } => {
                self.drop_inode(ino)?;
                self.drop_dentry(parent, ino)?;
                Ok(())
            }
            _ => Err(Error::NotFound),
        }
    }

    /// Removes the directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.unlink(path)
    }

    /// Moves `from` to `to`, atomically at the entry level: a fresh entry is
    /// created at `to`, its inode is released again, the old entry is
    /// dropped and the new entry is repointed at the moved file.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let (from_parent, from_ino) = match self.resolve(from)? {
            Resolved::Found { parent: None, .. } => return Err(Error::Inval),
            Resolved::Found { parent: Some(parent), ino } => (parent, ino),
            _ => return Err(Error::NotFound),
        };
        let mode = match self.inode(from_ino)?.ftype() {
            FileType::Directory => libc::S_IFDIR,
            _ => libc::S_IFREG,
        };

        // Also guarantees the destination did not exist
        self.mknod(to, mode)?;
        let (to_parent, tmp_ino) = match self.resolve(to)? {
            Resolved::Found { parent: Some(parent), ino } => (parent, ino),
            _ => return Err(Error::NotFound),
        };
        self.drop_inode(tmp_ino)?;
        // The old entry goes first, while its ino still identifies it
        // uniquely; only then is the new entry repointed at the moved file
        self.drop_dentry(from_parent, from_ino)?;

        let node = self.inode_mut(to_parent)?;
        let Content::Directory { children } = &mut node.content else {
            return Err(Error::Inval);
        };
        let entry = children
            .iter_mut()
            .find(|d| d.ino == tmp_ino)
            .ok_or(Error::NotFound)?;
        entry.ino = from_ino;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes from the file at `path`, starting at
    /// byte `offset`. Returns the number of bytes read.
    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: usize) -> Result<usize> {
        let ino = self.resolve_existing(path)?;
        let sz_blk = self.sb.sz_blk;
        let node = self.inode(ino)?;
        match node.ftype() {
            FileType::Directory => return Err(Error::IsDir),
            FileType::Symlink => return Err(Error::Inval),
            FileType::Regular => {}
        }
        if offset > node.size {
            return Err(Error::Seek);
        }

        let capacity = DATA_PER_FILE * sz_blk;
        let n = min(buf.len(), capacity.saturating_sub(offset));
        let mut copied = 0;
        while copied < n {
            let pos = offset + copied;
            let i = pos / sz_blk;
            let off = pos % sz_blk;
            let m = min(n - copied, sz_blk - off);
            match node.block(i) {
                Some(block) => buf[copied..copied + m].copy_from_slice(&block[off..off + m]),
                None => buf[copied..copied + m].fill(0),
            }
            copied += m;
        }
        Ok(n)
    }

    /// Writes `buf` to the file at `path` starting at byte `offset`, growing
    /// the file size if the write ends past it. Returns the number of bytes
    /// written.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: usize) -> Result<usize> {
        let ino = self.resolve_existing(path)?;
        let sz_blk = self.sb.sz_blk;
        let capacity = DATA_PER_FILE * sz_blk;
        let node = self.inode_mut(ino)?;
        match node.ftype() {
            FileType::Directory => return Err(Error::IsDir),
            FileType::Symlink => return Err(Error::Inval),
            FileType::Regular => {}
        }
        if offset > node.size {
            return Err(Error::Seek);
        }
        if offset + buf.len() > capacity {
            return Err(Error::NoSpace);
        }

        let mut copied = 0;
        while copied < buf.len() {
            let pos = offset + copied;
            let i = pos / sz_blk;
            let off = pos % sz_blk;
            let m = min(buf.len() - copied, sz_blk - off);
            let block = node.block_mut(i, sz_blk).ok_or(Error::Inval)?;
            block[off..off + m].copy_from_slice(&buf[copied..copied + m]);
            copied += m;
        }
        node.size = node.size.max(offset + buf.len());
        Ok(buf.len())
    }

    /// Sets the size of the file at `path` to `len` bytes.
    pub fn truncate(&mut self, path: &str, len: usize) -> Result<()> {
        let ino = self.resolve_existing(path)?;
        let capacity = DATA_PER_FILE * self.sb.sz_blk;
        let node = self.inode_mut(ino)?;
        match node.ftype() {
            FileType::Directory => return Err(Error::IsDir),
            FileType::Symlink => return Err(Error::Inval),
            FileType::Regular => {}
        }
        if len > capacity {
            return Err(Error::NoSpace);
        }
        node.size = len;
        Ok(())
    }

    /// Returns the name of the `idx`-th entry of the directory at `path`,
    /// or `None` past the end.
    pub fn readdir(&mut self, path: &str, idx: usize) -> Result<Option<String>> {
        let ino = self.resolve_existing(path)?;
        let node = self.inode(ino)?;
        Ok(node.children().and_then(|c| c.get(idx)).map(|d| d.name.clone()))
    }

    /// Synthesizes the attributes of the file at `path`.
    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        let (is_root, ino) = match self.resolve(path)? {
            Resolved::Found { parent: None, ino } => (true, ino),
            Resolved::Found { parent: Some(_), ino } => (false, ino),
            _ => return Err(Error::NotFound),
        };
        let node = self.inode(ino)?;
        let (mode, size) = match &node.content {
            Content::Directory { children } => (
                libc::S_IFDIR | DEFAULT_PERM,
                children.len() * size_of::<DentryRecord>(),
            ),
            Content::Regular { .. } => (libc::S_IFREG | DEFAULT_PERM, node.size),
            Content::Symlink { .. } => (libc::S_IFLNK | DEFAULT_PERM, node.size),
        };

        let now = timestamp();
        let mut attr = Attr {
            mode,
            nlink: 1,
            size: size as u64,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            atime: now,
            mtime: now,
            blksize: self.sb.sz_io as u32,
            blocks: 0,
        };
        if is_root {
            // The root reports whole-filesystem figures
            attr.size = self.sb.sz_usage as u64;
            attr.blocks = (self.sb.sz_disk / self.sb.sz_io) as u64;
            attr.nlink = 2;
        }
        Ok(attr)
    }

    /// Access check: `F_OK` asks whether the file exists, every other mode
    /// is granted (all files carry full permissions).
    pub fn access(&mut self, path: &str, mode: i32) -> Result<()> {
        let found = matches!(self.resolve(path)?, Resolved::Found { .. });
        if mode == libc::F_OK && !found {
            return Err(Error::Access);
        }
        Ok(())
    }

    fn resolve_existing(&mut self, path: &str) -> Result<u32> {
        match self.resolve(path)? {
            Resolved::Found { ino, .. } => Ok(ino),
            _ => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BLK_SZ;
    use crate::IO_SZ;
    use crate::driver::MemDriver;

    const MIB: usize = 1 << 20;

    fn mounted() -> NewFs {
        NewFs::format(Box::new(MemDriver::new(4 * MIB))).unwrap()
    }

    #[test]
    fn fresh_root() {
        let mut fs = mounted();
        let attr = fs.getattr("/").unwrap();
        assert_eq!(attr.mode, libc::S_IFDIR | DEFAULT_PERM);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.blksize as usize, IO_SZ);
        assert_eq!(attr.blocks as usize, fs.disk_size() / IO_SZ);
        assert_eq!(fs.readdir("/", 0).unwrap(), None);
        assert!(fs.inode_count() > 0);
    }

    #[test]
    fn nested_create_and_list() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        fs.mknod("/a/b/f", libc::S_IFREG).unwrap();

        assert_eq!(fs.readdir("/a/b", 0).unwrap().as_deref(), Some("f"));
        assert_eq!(fs.readdir("/a/b", 1).unwrap(), None);
        let attr = fs.getattr("/a/b/f").unwrap();
        assert_eq!(attr.mode, libc::S_IFREG | DEFAULT_PERM);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn write_then_read() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();

        assert_eq!(fs.write("/x", b"hello", 0).unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read("/x", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.getattr("/x").unwrap().size, 5);

        assert_eq!(fs.write("/x", b"!", 5).unwrap(), 1);
        assert_eq!(fs.getattr("/x").unwrap().size, 6);
        let mut buf = [0u8; 6];
        assert_eq!(fs.read("/x", &mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"hello!");
    }

    #[test]
    fn write_spanning_every_block() {
        let mut fs = mounted();
        fs.mknod("/big", libc::S_IFREG).unwrap();

        let capacity = DATA_PER_FILE * BLK_SZ;
        let data: Vec<u8> = (0..capacity).map(|i| (i * 31) as u8).collect();
        assert_eq!(fs.write("/big", &data, 0).unwrap(), capacity);
        assert_eq!(fs.getattr("/big").unwrap().size as usize, capacity);

        let mut back = vec![0u8; capacity];
        assert_eq!(fs.read("/big", &mut back, 0).unwrap(), capacity);
        assert_eq!(back, data);

        // Unaligned read in the middle, crossing a block boundary
        let mut back = vec![0u8; 100];
        assert_eq!(fs.read("/big", &mut back, BLK_SZ - 50).unwrap(), 100);
        assert_eq!(&back[..], &data[BLK_SZ - 50..BLK_SZ + 50]);
    }

    #[test]
    fn write_past_capacity() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        let data = vec![0u8; DATA_PER_FILE * BLK_SZ + 1];
        assert!(matches!(fs.write("/x", &data, 0), Err(Error::NoSpace)));
    }

    #[test]
    fn unlink_frees_the_inode() {
        let mut fs = mounted();
        fs.mknod("/y", libc::S_IFREG).unwrap();
        fs.write("/y", b"gone", 0).unwrap();
        assert_eq!(fs.map_inode.count_set(), 2);

        fs.unlink("/y").unwrap();
        assert!(matches!(fs.getattr("/y"), Err(Error::NotFound)));
        assert_eq!(fs.map_inode.count_set(), 1);
        assert_eq!(fs.map_data.count_set(), DATA_PER_FILE);
        assert!(fs.check().unwrap().is_clean());
    }

    #[test]
    fn missing_parent() {
        let mut fs = mounted();
        assert!(matches!(fs.mkdir("/a/b"), Err(Error::NotFound)));
        assert!(matches!(fs.mkdir("/"), Err(Error::Exists)));
        assert!(matches!(fs.mknod("/", libc::S_IFREG), Err(Error::Exists)));
    }

    #[test]
    fn create_under_a_file() {
        let mut fs = mounted();
        fs.mknod("/f", libc::S_IFREG).unwrap();
        assert!(matches!(fs.mkdir("/f/x"), Err(Error::Unsupported)));
        assert!(matches!(fs.mknod("/f/x", libc::S_IFREG), Err(Error::Unsupported)));
        assert!(matches!(fs.getattr("/f/x/y"), Err(Error::NotFound)));
    }

    #[test]
    fn reverse_insertion_order() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.mknod("/d/one", libc::S_IFREG).unwrap();
        fs.mknod("/d/two", libc::S_IFREG).unwrap();
        // Head-insert: the latest entry comes first
        assert_eq!(fs.readdir("/d", 0).unwrap().as_deref(), Some("two"));
        assert_eq!(fs.readdir("/d", 1).unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn trailing_separators_are_ignored() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.mknod("/d/f", libc::S_IFREG).unwrap();
        assert!(fs.getattr("/d/").is_ok());
        assert!(fs.getattr("//d//f").is_ok());
        assert!(matches!(fs.mkdir("/d/"), Err(Error::Exists)));
    }

    #[test]
    fn rename_file() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        fs.write("/x", b"payload", 0).unwrap();

        fs.rename("/x", "/y").unwrap();
        assert!(matches!(fs.getattr("/x"), Err(Error::NotFound)));
        let mut buf = [0u8; 7];
        assert_eq!(fs.read("/y", &mut buf, 0).unwrap(), 7);
        assert_eq!(&buf, b"payload");
        assert!(fs.check().unwrap().is_clean());
    }

    #[test]
    fn rename_directory_keeps_children() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.mknod("/d/f", libc::S_IFREG).unwrap();

        fs.rename("/d", "/e").unwrap();
        assert!(matches!(fs.getattr("/d"), Err(Error::NotFound)));
        assert_eq!(fs.readdir("/e", 0).unwrap().as_deref(), Some("f"));
        assert!(fs.check().unwrap().is_clean());
    }

    #[test]
    fn rename_edge_cases() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        fs.mknod("/y", libc::S_IFREG).unwrap();
        assert!(matches!(fs.rename("/x", "/y"), Err(Error::Exists)));
        fs.rename("/x", "/x").unwrap();
        assert!(fs.getattr("/x").is_ok());
        assert!(matches!(fs.rename("/nope", "/z"), Err(Error::NotFound)));
    }

    #[test]
    fn offsets_past_the_end() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        fs.write("/x", b"ab", 0).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(fs.read("/x", &mut buf, 3), Err(Error::Seek)));
        assert!(matches!(fs.write("/x", b"c", 3), Err(Error::Seek)));
    }

    #[test]
    fn directories_are_not_files() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(fs.read("/d", &mut buf, 0), Err(Error::IsDir)));
        assert!(matches!(fs.write("/d", b"x", 0), Err(Error::IsDir)));
        assert!(matches!(fs.truncate("/d", 0), Err(Error::IsDir)));
    }

    #[test]
    fn truncate_sets_the_size() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        fs.write("/x", b"hello", 0).unwrap();

        fs.truncate("/x", 2).unwrap();
        assert_eq!(fs.getattr("/x").unwrap().size, 2);
        fs.truncate("/x", 0).unwrap();
        assert_eq!(fs.getattr("/x").unwrap().size, 0);
        assert!(matches!(
            fs.truncate("/x", DATA_PER_FILE * BLK_SZ + 1),
            Err(Error::NoSpace)
        ));
    }

    #[test]
    fn access_checks() {
        let mut fs = mounted();
        fs.mknod("/x", libc::S_IFREG).unwrap();
        assert!(fs.access("/x", libc::F_OK).is_ok());
        assert!(fs.access("/", libc::F_OK).is_ok());
        assert!(matches!(fs.access("/nope", libc::F_OK), Err(Error::Access)));
        assert!(fs.access("/nope", libc::R_OK).is_ok());
        assert!(fs.access("/x", libc::W_OK).is_ok());
    }

    #[test]
    fn long_names_are_rejected() {
        let mut fs = mounted();
        let path = format!("/{}", "a".repeat(MAX_NAME));
        assert!(matches!(fs.mknod(&path, libc::S_IFREG), Err(Error::Inval)));
        // The terminator takes the last byte; one less fits
        let path = format!("/{}", "a".repeat(MAX_NAME - 1));
        fs.mknod(&path, libc::S_IFREG).unwrap();
        assert!(fs.getattr(&path).is_ok());
    }

    #[test]
    fn getattr_directory_size() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.mknod("/d/a", libc::S_IFREG).unwrap();
        fs.mknod("/d/b", libc::S_IFREG).unwrap();
        let attr = fs.getattr("/d").unwrap();
        assert_eq!(attr.size as usize, 2 * size_of::<DentryRecord>());
    }
}
