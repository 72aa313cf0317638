//! The mount handle and the in-core filesystem state.
//!
//! [`NewFs`] owns the device, the super-block geometry, both allocation
//! bitmaps and the arena of materialized inodes. Inodes are loaded from the
//! device lazily, path by path, and the whole live tree is flushed back by
//! [`NewFs::unmount`].

use crate::DATA_PER_FILE;
use crate::INODE_PER_FILE;
use crate::MAGIC;
use crate::MAX_NAME;
use crate::ROOT_INO;
use crate::SUPER_OFFSET;
use crate::bitmap::Bitmap;
use crate::device::Device;
use crate::device::round_up;
use crate::disk;
use crate::disk::DentryRecord;
use crate::disk::InodeRecord;
use crate::disk::SuperRecord;
use crate::driver::Driver;
use crate::error::Error;
use crate::error::Result;
use crate::node::Content;
use crate::node::Dentry;
use crate::node::FileType;
use crate::node::Inode;
use log::debug;
use std::array;
use std::collections::HashMap;
use std::collections::HashSet;
use std::mem::size_of;

/// Size of one on-disk directory entry.
pub(crate) const DENTRY_REC_SZ: usize = size_of::<DentryRecord>();

/// The in-core super-block: device geometry plus the region layout.
pub(crate) struct Superblock {
    /// Total size of the device, in bytes.
    pub sz_disk: usize,
    /// The driver's transfer unit, in bytes.
    pub sz_io: usize,
    /// The logical block size, in bytes.
    pub sz_blk: usize,
    /// Bytes in use. Persisted round-trip, not maintained.
    pub sz_usage: i32,
    /// Number of inode slots.
    pub num_ino: usize,
    /// Number of data blocks, always `DATA_PER_FILE * num_ino`.
    pub num_data: usize,
    /// Blocks spanned by the inode bitmap.
    pub map_inode_blks: usize,
    /// Byte offset of the inode bitmap region.
    pub map_inode_offset: usize,
    /// Blocks spanned by the data bitmap.
    pub map_data_blks: usize,
    /// Byte offset of the data bitmap region.
    pub map_data_offset: usize,
    /// Byte offset of the inode table.
    pub inode_offset: usize,
    /// Byte offset of the data area.
    pub data_offset: usize,
}

impl Superblock {
    /// Returns the byte offset of the inode slot for `ino`.
    fn ino_pos(&self, ino: u32) -> usize {
        self.inode_offset + ino as usize * INODE_PER_FILE * self.sz_blk
    }

    /// Returns the byte offset of data block `blk`.
    fn data_pos(&self, blk: u32) -> usize {
        self.data_offset + blk as usize * self.sz_blk
    }
}

/// The outcome of a path walk.
pub(crate) enum Resolved {
    /// Every component resolved. `parent` is the directory holding the final
    /// entry, absent for the root itself.
    Found { parent: Option<u32>, ino: u32 },
    /// A component was not found in the directory `dir`. `leaf` tells
    /// whether it was the final component (so `dir` is the would-be parent).
    Missing { dir: u32, name: String, leaf: bool },
    /// The walk ran into a non-directory before the final component's
    /// parent. `leaf` tells whether only the final component was left.
    ThroughFile { leaf: bool },
}

/// Outcome of a full-tree consistency check.
pub struct CheckReport {
    /// Inodes reachable from the root.
    pub live_inodes: usize,
    /// Bits set in the inode bitmap.
    pub ino_bits: usize,
    /// Data blocks owned by reachable inodes.
    pub owned_blocks: usize,
    /// Bits set in the data bitmap.
    pub data_bits: usize,
    /// Every inconsistency found, human readable.
    pub errors: Vec<String>,
}

impl CheckReport {
    /// Tells whether the filesystem is consistent.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A mounted filesystem.
pub struct NewFs {
    pub(crate) dev: Device,
    pub(crate) sb: Superblock,
    pub(crate) map_inode: Bitmap,
    pub(crate) map_data: Bitmap,
    /// Materialized inodes, keyed by ino. An allocated ino missing here is a
    /// lazy reference: its inode still lives on the device only.
    pub(crate) inodes: HashMap<u32, Inode>,
}

impl NewFs {
    /// Mounts the filesystem on the given device.
    ///
    /// A device bearing no valid super-block is formatted first.
    pub fn mount(driver: Box<dyn Driver>) -> Result<Self> {
        let mut dev = Device::open(driver)?;
        let record: SuperRecord = disk::read_record(&mut dev, SUPER_OFFSET)?;
        if record.magic == MAGIC {
            Self::load(dev, &record)
        } else {
            debug!("no valid super-block, formatting");
            Self::format_device(dev)
        }
    }

    /// Formats the device unconditionally and mounts the fresh filesystem.
    pub fn format(driver: Box<dyn Driver>) -> Result<Self> {
        let dev = Device::open(driver)?;
        Self::format_device(dev)
    }

    /// Tells whether the device bears a valid super-block.
    pub fn is_present(driver: &mut dyn Driver) -> Result<bool> {
        let sz_io = driver.io_size()?;
        let mut sector = vec![0u8; sz_io];
        driver.seek(SUPER_OFFSET as u64)?;
        driver.read(&mut sector)?;
        let record: SuperRecord = disk::record_from_bytes(&sector);
        Ok(record.magic == MAGIC)
    }

    /// Computes a fresh layout and writes the root directory.
    fn format_device(dev: Device) -> Result<Self> {
        let sz_disk = dev.sz_disk();
        let sz_blk = dev.sz_blk();

        let super_blks = round_up(size_of::<SuperRecord>(), sz_blk) / sz_blk;
        // One inode block plus DATA_PER_FILE data blocks per file bounds the
        // number of files the device can hold
        let inode_num = sz_disk / ((DATA_PER_FILE + INODE_PER_FILE) * sz_blk);
        let map_inode_blks = round_up(inode_num.div_ceil(8), sz_blk) / sz_blk;
        let map_data_blks = round_up((DATA_PER_FILE * inode_num).div_ceil(8), sz_blk) / sz_blk;
        // The metadata regions spend whole file slots of their own
        let meta_blks = super_blks + map_inode_blks + map_data_blks;
        if inode_num <= meta_blks {
            return Err(Error::NoSpace);
        }
        let num_ino = inode_num - meta_blks;

        let map_inode_offset = SUPER_OFFSET + super_blks * sz_blk;
        let map_data_offset = map_inode_offset + map_inode_blks * sz_blk;
        let inode_offset = map_data_offset + map_data_blks * sz_blk;
        let data_offset = inode_offset + num_ino * INODE_PER_FILE * sz_blk;

        let sb = Superblock {
            sz_disk,
            sz_io: dev.sz_io(),
            sz_blk,
            sz_usage: 0,
            num_ino,
            num_data: DATA_PER_FILE * num_ino,
            map_inode_blks,
            map_inode_offset,
            map_data_blks,
            map_data_offset,
            inode_offset,
            data_offset,
        };
        debug!("formatting: {} inodes, {} data blocks", sb.num_ino, sb.num_data);
        debug!("inode map blocks: {map_inode_blks}");
        debug!(" data map blocks: {map_data_blks}");

        let map_inode = Bitmap::new(vec![0; map_inode_blks * sz_blk], num_ino);
        let map_data = Bitmap::new(vec![0; map_data_blks * sz_blk], DATA_PER_FILE * num_ino);

        let mut fs = Self {
            dev,
            sb,
            map_inode,
            map_data,
            inodes: HashMap::new(),
        };
        // First-fit over all-clear bitmaps: the root gets ino 0
        let root = fs.alloc_inode(FileType::Directory)?;
        debug_assert_eq!(root, ROOT_INO);
        fs.sync_inode(ROOT_INO)?;
        Ok(fs)
    }

    /// Rebuilds the in-core state from a valid super-block.
    fn load(mut dev: Device, record: &SuperRecord) -> Result<Self> {
        let sb = Superblock {
            sz_disk: dev.sz_disk(),
            sz_io: dev.sz_io(),
            sz_blk: dev.sz_blk(),
            sz_usage: record.sz_usage,
            num_ino: record.num_ino as usize,
            num_data: DATA_PER_FILE * record.num_ino as usize,
            map_inode_blks: record.map_inode_blks as usize,
            map_inode_offset: record.map_inode_offset as usize,
            map_data_blks: record.map_data_blks as usize,
            map_data_offset: record.map_data_offset as usize,
            inode_offset: record.inode_offset as usize,
            data_offset: record.data_offset as usize,
        };

        let mut map_inode_bytes = vec![0; sb.map_inode_blks * sb.sz_blk];
        dev.read(sb.map_inode_offset, &mut map_inode_bytes)?;
        let mut map_data_bytes = vec![0; sb.map_data_blks * sb.sz_blk];
        dev.read(sb.map_data_offset, &mut map_data_bytes)?;

        debug!("mounted: {} inodes, {} data blocks", sb.num_ino, sb.num_data);

        let map_inode = Bitmap::new(map_inode_bytes, sb.num_ino);
        let map_data = Bitmap::new(map_data_bytes, sb.num_data);
        let mut fs = Self {
            dev,
            sb,
            map_inode,
            map_data,
            inodes: HashMap::new(),
        };
        fs.read_inode(ROOT_INO)?;
        Ok(fs)
    }

    /// Flushes the live tree, the super-block and both bitmaps back to the
    /// device, consuming the handle.
    pub fn unmount(mut self) -> Result<()> {
        self.sync_inode(ROOT_INO)?;

        let record = SuperRecord {
            magic: MAGIC,
            sz_usage: self.sb.sz_usage,
            num_ino: self.sb.num_ino as i32,
            map_inode_blks: self.sb.map_inode_blks as i32,
            map_inode_offset: self.sb.map_inode_offset as i32,
            map_data: 0,
            map_data_blks: self.sb.map_data_blks as i32,
            map_data_offset: self.sb.map_data_offset as i32,
            inode_offset: self.sb.inode_offset as i32,
            data_offset: self.sb.data_offset as i32,
        };
        disk::write_record(&mut self.dev, SUPER_OFFSET, &record)?;
        self.dev.write(self.sb.map_inode_offset, self.map_inode.as_bytes())?;
        self.dev.write(self.sb.map_data_offset, self.map_data.as_bytes())?;
        Ok(())
    }

    /// Returns the number of inode slots.
    pub fn inode_count(&self) -> usize {
        self.sb.num_ino
    }

    /// Returns the number of data blocks.
    pub fn data_block_count(&self) -> usize {
        self.sb.num_data
    }

    /// Returns the size of the underlying device, in bytes.
    pub fn disk_size(&self) -> usize {
        self.sb.sz_disk
    }

    /// Returns the materialized inode for `ino`.
    pub(crate) fn inode(&self, ino: u32) -> Result<&Inode> {
        self.inodes.get(&ino).ok_or(Error::Inval)
    }

    /// Returns the materialized inode for `ino`, mutably.
    pub(crate) fn inode_mut(&mut self, ino: u32) -> Result<&mut Inode> {
        self.inodes.get_mut(&ino).ok_or(Error::Inval)
    }

    /// Loads the inode for `ino` from the device unless already resident.
    fn materialize(&mut self, ino: u32) -> Result<()> {
        if self.inodes.contains_key(&ino) {
            return Ok(());
        }
        self.read_inode(ino)
    }

    /// Allocates an inode and its `DATA_PER_FILE` data blocks, first-fit in
    /// both bitmaps, and inserts the fresh inode into the arena.
    ///
    /// On failure nothing stays allocated.
    pub(crate) fn alloc_inode(&mut self, ftype: FileType) -> Result<u32> {
        let Some(ino) = self.map_inode.first_clear() else {
            return Err(Error::NoSpace);
        };
        self.map_inode.set(ino);

        let mut p_blk = [0u32; DATA_PER_FILE];
        for i in 0..DATA_PER_FILE {
            match self.map_data.first_clear() {
                Some(blk) => {
                    self.map_data.set(blk);
                    p_blk[i] = blk as u32;
                }
                None => {
                    for blk in &p_blk[..i] {
                        self.map_data.clear(*blk as usize);
                    }
                    self.map_inode.clear(ino);
                    return Err(Error::NoSpace);
                }
            }
        }

        let ino = ino as u32;
        self.inodes.insert(ino, Inode {
            ino,
            size: 0,
            p_blk,
            content: Content::empty(ftype),
        });
        Ok(ino)
    }

    /// Frees an inode: clears its bitmap bits, releases its buffers and,
    /// for a directory, drops the whole subtree first.
    ///
    /// Lazy children are materialized on the way down, otherwise their bits
    /// could not be returned.
    pub(crate) fn drop_inode(&mut self, ino: u32) -> Result<()> {
        if ino == ROOT_INO {
            return Err(Error::Inval);
        }
        self.materialize(ino)?;
        let node = self.inodes.remove(&ino).ok_or(Error::Inval)?;
        if let Content::Directory { children } = &node.content {
            for child in children {
                self.drop_inode(child.ino)?;
            }
        }
        self.map_inode.clear(node.ino as usize);
        for blk in &node.p_blk {
            self.map_data.clear(*blk as usize);
        }
        Ok(())
    }

    /// Head-inserts an entry into the directory `dir`.
    pub(crate) fn alloc_dentry(&mut self, dir: u32, dentry: Dentry) -> Result<()> {
        // A directory cannot address more entries than its blocks can pack
        let capacity = DATA_PER_FILE * (self.sb.sz_blk / DENTRY_REC_SZ);
        let node = self.inode_mut(dir)?;
        let Content::Directory { children } = &mut node.content else {
            return Err(Error::Inval);
        };
        if children.len() >= capacity {
            return Err(Error::NoSpace);
        }
        children.insert(0, dentry);
        Ok(())
    }

    /// Unlinks the entry pointing at `ino` from the directory `dir`.
    pub(crate) fn drop_dentry(&mut self, dir: u32, ino: u32) -> Result<Dentry> {
        let node = self.inode_mut(dir)?;
        let Content::Directory { children } = &mut node.content else {
            return Err(Error::Inval);
        };
        let i = children
            .iter()
            .position(|d| d.ino == ino)
            .ok_or(Error::NotFound)?;
        Ok(children.remove(i))
    }

    /// Reads the inode `ino` from the device into the arena.
    ///
    /// Directory entries are unpacked from the inode's data blocks with the
    /// same walk the writer uses: entries sit back-to-back, and one that
    /// would straddle a block boundary lives at the start of the next block.
    fn read_inode(&mut self, ino: u32) -> Result<()> {
        let record: InodeRecord = disk::read_record(&mut self.dev, self.sb.ino_pos(ino))?;
        let ftype = FileType::from_raw(record.ftype)?;
        let p_blk = record.p_blk.map(|b| b as u32);

        let content = match ftype {
            FileType::Directory => {
                let mut children = Vec::new();
                let mut k = 0;
                let mut begin = self.sb.data_pos(p_blk[0]);
                let mut blk_end = begin + self.sb.sz_blk;
                for _ in 0..record.dir_cnt {
                    if begin + DENTRY_REC_SZ > blk_end {
                        k += 1;
                        if k >= DATA_PER_FILE {
                            return Err(Error::Inval);
                        }
                        begin = self.sb.data_pos(p_blk[k]);
                        blk_end = begin + self.sb.sz_blk;
                    }
                    let entry: DentryRecord = disk::read_record(&mut self.dev, begin)?;
                    children.insert(0, Dentry {
                        name: disk::unpack_name(&entry.fname),
                        ftype: FileType::from_raw(entry.ftype)?,
                        ino: entry.ino as u32,
                    });
                    begin += DENTRY_REC_SZ;
                }
                Content::Directory {
                    children,
                }
            }
            FileType::Regular => {
                let mut blocks: [Option<Box<[u8]>>; DATA_PER_FILE] = array::from_fn(|_| None);
                for (i, block) in blocks.iter_mut().enumerate() {
                    let mut buf = vec![0u8; self.sb.sz_blk].into_boxed_slice();
                    self.dev.read(self.sb.data_pos(p_blk[i]), &mut buf)?;
                    *block = Some(buf);
                }
                Content::Regular {
                    blocks,
                }
            }
            FileType::Symlink => Content::Symlink {
                target: disk::unpack_name(&record.target_path),
            },
        };

        self.inodes.insert(ino, Inode {
            ino,
            size: record.size as usize,
            p_blk,
            content,
        });
        Ok(())
    }

    /// Writes the inode `ino` back to the device, depth-first through every
    /// materialized child.
    ///
    /// Children that were never materialized are still current on the device;
    /// only their directory entry is rewritten.
    pub(crate) fn sync_inode(&mut self, ino: u32) -> Result<()> {
        let node = self.inode(ino)?;
        let mut record = InodeRecord {
            ino: node.ino as i32,
            size: node.size as i32,
            link: 1,
            dir_cnt: 0,
            p_blk: node.p_blk.map(|b| b as i32),
            ftype: node.ftype().as_raw(),
            target_path: [0; MAX_NAME],
        };
        let children = match &node.content {
            Content::Directory { children } => {
                record.dir_cnt = children.len() as i32;
                Some(children.clone())
            }
            Content::Symlink { target } => {
                record.target_path = disk::pack_name(target);
                None
            }
            Content::Regular { .. } => None,
        };
        let p_blk = node.p_blk;

        disk::write_record(&mut self.dev, self.sb.ino_pos(ino), &record)?;

        if let Some(children) = children {
            let mut k = 0;
            let mut begin = self.sb.data_pos(p_blk[0]);
            let mut blk_end = begin + self.sb.sz_blk;
            for child in &children {
                if begin + DENTRY_REC_SZ > blk_end {
                    k += 1;
                    if k >= DATA_PER_FILE {
                        return Err(Error::NoSpace);
                    }
                    begin = self.sb.data_pos(p_blk[k]);
                    blk_end = begin + self.sb.sz_blk;
                }
                let entry = DentryRecord {
                    ino: child.ino as i32,
                    valid: 1,
                    ftype: child.ftype.as_raw(),
                    fname: disk::pack_name(&child.name),
                };
                disk::write_record(&mut self.dev, begin, &entry)?;
                if self.inodes.contains_key(&child.ino) {
                    self.sync_inode(child.ino)?;
                }
                begin += DENTRY_REC_SZ;
            }
        } else {
            let Self { dev, sb, inodes, .. } = self;
            if let Some(node) = inodes.get(&ino) {
                if let Content::Regular { blocks } = &node.content {
                    for (i, block) in blocks.iter().enumerate() {
                        if let Some(block) = block {
                            dev.write(sb.data_pos(node.p_blk[i]), block)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks `path` from the root, materializing inodes on demand.
    ///
    /// Empty components are discarded, so trailing and doubled separators do
    /// not change the outcome. Name comparison is exact.
    pub(crate) fn resolve(&mut self, path: &str) -> Result<Resolved> {
        let parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if parts.is_empty() {
            self.materialize(ROOT_INO)?;
            return Ok(Resolved::Found {
                parent: None,
                ino: ROOT_INO,
            });
        }

        let mut parent = ROOT_INO;
        let mut cur = ROOT_INO;
        for (i, name) in parts.iter().enumerate() {
            let leaf = i + 1 == parts.len();
            self.materialize(cur)?;
            let node = self.inode(cur)?;
            let Some(children) = node.children() else {
                return Ok(Resolved::ThroughFile {
                    leaf,
                });
            };
            match children.iter().find(|d| d.name == *name) {
                Some(entry) => {
                    parent = cur;
                    cur = entry.ino;
                }
                None => {
                    return Ok(Resolved::Missing {
                        dir: cur,
                        name: (*name).to_string(),
                        leaf,
                    });
                }
            }
        }
        self.materialize(cur)?;
        Ok(Resolved::Found {
            parent: Some(parent),
            ino: cur,
        })
    }

    /// Walks the whole tree and diffs it against both bitmaps.
    ///
    /// Reports every reachable inode without its bitmap bit, every bitmap
    /// bit without a reachable owner, and every data block claimed twice.
    pub fn check(&mut self) -> Result<CheckReport> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut owner: HashMap<u32, u32> = HashMap::new();
        let mut stack = vec![ROOT_INO];

        while let Some(ino) = stack.pop() {
            if !seen.insert(ino) {
                errors.push(format!("inode {ino} is reachable through two entries"));
                continue;
            }
            if ino as usize >= self.sb.num_ino {
                errors.push(format!("inode {ino} is out of range"));
                continue;
            }
            self.materialize(ino)?;
            if !self.map_inode.test(ino as usize) {
                errors.push(format!("live inode {ino} is clear in the inode bitmap"));
            }
            let node = self.inode(ino)?;
            for blk in &node.p_blk {
                if *blk as usize >= self.sb.num_data {
                    errors.push(format!("data block {blk} of inode {ino} is out of range"));
                    continue;
                }
                if !self.map_data.test(*blk as usize) {
                    errors.push(format!("data block {blk} of inode {ino} is clear in the data bitmap"));
                }
                if let Some(prev) = owner.insert(*blk, ino) {
                    errors.push(format!("data block {blk} is owned by inodes {prev} and {ino}"));
                }
            }
            if let Some(children) = node.children() {
                for child in children {
                    stack.push(child.ino);
                }
            }
        }

        for i in 0..self.sb.num_ino {
            if self.map_inode.test(i) && !seen.contains(&(i as u32)) {
                errors.push(format!("inode bitmap bit {i} is set but no live inode owns it"));
            }
        }
        for i in 0..self.sb.num_data {
            if self.map_data.test(i) && !owner.contains_key(&(i as u32)) {
                errors.push(format!("data bitmap bit {i} is set but no live inode owns it"));
            }
        }

        Ok(CheckReport {
            live_inodes: seen.len(),
            ino_bits: self.map_inode.count_set(),
            owned_blocks: owner.len(),
            data_bits: self.map_data.count_set(),
            errors,
        })
    }
}
