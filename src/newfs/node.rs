//! In-core inodes and directory entries.

use crate::DATA_PER_FILE;
use crate::error::Error;
use crate::error::Result;
use std::array;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    /// Decodes the on-disk type value.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Directory),
            2 => Ok(Self::Symlink),
            _ => Err(Error::Inval),
        }
    }

    /// Returns the on-disk type value.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Regular => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
        }
    }
}

/// A directory entry: the named edge from a directory to a child inode.
///
/// An entry carries only the child's inode number. The child inode itself may
/// or may not be materialized in the arena; it is loaded on demand when a
/// lookup or a recursive drop walks through it.
#[derive(Clone, Debug)]
pub struct Dentry {
    /// The child's name.
    pub name: String,
    /// The child's file type.
    pub ftype: FileType,
    /// The child's inode number.
    pub ino: u32,
}

/// Type-specific inode payload.
pub enum Content {
    /// A regular file: one buffer per owned data block, allocated when the
    /// block is first read from disk or written to.
    Regular {
        blocks: [Option<Box<[u8]>>; DATA_PER_FILE],
    },
    /// A directory: the list of children, most recently inserted first.
    Directory {
        children: Vec<Dentry>,
    },
    /// A symbolic link and its target path.
    Symlink {
        target: String,
    },
}

impl Content {
    /// Returns an empty payload for the given file type.
    pub fn empty(ftype: FileType) -> Self {
        match ftype {
            FileType::Regular => Self::Regular {
                blocks: array::from_fn(|_| None),
            },
            FileType::Directory => Self::Directory {
                children: Vec::new(),
            },
            FileType::Symlink => Self::Symlink {
                target: String::new(),
            },
        }
    }
}

/// An in-core inode.
pub struct Inode {
    /// Index of this inode in the inode bitmap.
    pub ino: u32,
    /// File size in bytes.
    pub size: usize,
    /// Indices into the data area of the blocks owned by this file.
    pub p_blk: [u32; DATA_PER_FILE],
    /// Type-specific payload.
    pub content: Content,
}

impl Inode {
    /// Returns the file type of this inode.
    pub fn ftype(&self) -> FileType {
        match self.content {
            Content::Regular { .. } => FileType::Regular,
            Content::Directory { .. } => FileType::Directory,
            Content::Symlink { .. } => FileType::Symlink,
        }
    }

    /// Returns the children of a directory inode.
    pub fn children(&self) -> Option<&Vec<Dentry>> {
        match &self.content {
            Content::Directory { children } => Some(children),
            _ => None,
        }
    }

    /// Returns the `i`th data buffer of a regular file, if allocated.
    pub(crate) fn block(&self, i: usize) -> Option<&[u8]> {
        match &self.content {
            Content::Regular { blocks } => blocks[i].as_deref(),
            _ => None,
        }
    }

    /// Returns the `i`th data buffer of a regular file, allocating it
    /// zero-filled if absent. `None` for non-regular inodes.
    pub(crate) fn block_mut(&mut self, i: usize, sz_blk: usize) -> Option<&mut [u8]> {
        match &mut self.content {
            Content::Regular { blocks } => {
                let block = blocks[i].get_or_insert_with(|| vec![0; sz_blk].into_boxed_slice());
                Some(&mut block[..])
            }
            _ => None,
        }
    }
}
