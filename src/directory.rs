//! Directories as structured files of fixed-length entries: reading, path lookup, creation, and
//! tree printing.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::filev6::FileV6;
use crate::inode;
use crate::mount::{ROOT_INUMBER, UnixFilesystem};
use crate::sector::SECTOR_SIZE;

/// Longest name storable in a directory entry.
pub const DIRENT_MAXLEN: usize = 14;
/// On-disk size in bytes of a single [`DirEntry`].
pub const DIRENT_SIZE: usize = 16;
/// Directory entries packed per sector.
pub const DIRENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIRENT_SIZE;

/// A single 16-byte directory entry: an inode number and a fixed-width name.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DirEntry {
    pub d_inumber: u16,
    pub d_name: [u8; DIRENT_MAXLEN],
}

const _: () = assert!(std::mem::size_of::<DirEntry>() == DIRENT_SIZE);

impl DirEntry {
    /// The entry's name, trimmed at the first NUL byte.
    pub fn name(&self) -> String {
        let end = self.d_name.iter().position(|&b| b == 0).unwrap_or(DIRENT_MAXLEN);
        String::from_utf8_lossy(&self.d_name[..end]).into_owned()
    }
}

/// Sequential reader over a directory's entries, one sector at a time.
pub struct DirectoryReader<'a> {
    file: FileV6<'a>,
    entries: Vec<DirEntry>,
    cur: usize,
}

impl<'a> DirectoryReader<'a> {
    /// Opens inode `inr` as a directory. Fails with `InvalidDirectoryInode` if it isn't one.
    pub fn open(u: &'a UnixFilesystem, inr: u16) -> Result<Self> {
        let ino = inode::read(u, inr)?;
        if !ino.is_dir() {
            return Err(Error::InvalidDirectoryInode);
        }
        Ok(Self {
            file: FileV6::open(u, inr)?,
            entries: Vec::new(),
            cur: 0,
        })
    }

    /// Returns the next `(name, inode number)` pair, or `None` at the end of the directory.
    pub fn read_dir(&mut self) -> Result<Option<(String, u16)>> {
        if self.cur >= self.entries.len() {
            let mut buf = [0u8; SECTOR_SIZE];
            let n = self.file.read_block(&mut buf)?;
            if n == 0 {
                return Ok(None);
            }
            let count = n / DIRENT_SIZE;
            self.entries = (0..count)
                .map(|i| {
                    let off = i * DIRENT_SIZE;
                    bytemuck::pod_read_unaligned::<DirEntry>(&buf[off..off + DIRENT_SIZE])
                })
                .collect();
            self.cur = 0;
        }
        let entry = self.entries[self.cur];
        self.cur += 1;
        Ok(Some((entry.name(), entry.d_inumber)))
    }
}

/// Resolves `path` (may be absolute, relative to `start_inr`, or empty for `start_inr` itself)
/// to an inode number, recursing one path component at a time.
pub fn lookup(u: &UnixFilesystem, start_inr: u16, path: &str) -> Result<u16> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(start_inr);
    }
    let (head, tail) = match trimmed.find('/') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => (trimmed, ""),
    };

    let mut reader = DirectoryReader::open(u, start_inr)?;
    while let Some((name, child_inr)) = reader.read_dir()? {
        if name == head {
            return lookup(u, child_inr, tail);
        }
    }
    Err(Error::InodeOutOfRange)
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

/// Creates a new entry named by the last component of `path`, under the directory resolved from
/// its parent, with the given mode, and returns the new inode number.
pub fn create(u: &UnixFilesystem, path: &str, mode: u16) -> Result<u16> {
    let (parent_path, child_name) = split_path(path);
    if child_name.is_empty() || child_name.len() > DIRENT_MAXLEN {
        return Err(Error::FilenameTooLong);
    }

    let parent_inr = lookup(u, ROOT_INUMBER, parent_path)?;

    {
        let mut reader = DirectoryReader::open(u, parent_inr)?;
        while let Some((name, _)) = reader.read_dir()? {
            if name == child_name {
                return Err(Error::FilenameAlreadyExists);
            }
        }
    }

    let child_inr = inode::alloc(u)?;

    let mut name_bytes = [0u8; DIRENT_MAXLEN];
    name_bytes[..child_name.len()].copy_from_slice(child_name.as_bytes());
    let entry = DirEntry {
        d_inumber: child_inr,
        d_name: name_bytes,
    };

    let mut parent_file = FileV6::open(u, parent_inr)?;
    parent_file.write_bytes(bytemuck::bytes_of(&entry))?;

    FileV6::create(u, child_inr, mode)?;

    log::debug!("created {path:?} as inode {child_inr}");
    Ok(child_inr)
}

/// Prints the subtree rooted at `inr` to stdout, one line per node, as `DIR <path>/` or
/// `FIL <path>`. Whether a node is a directory or a file is decided by trying to open it as a
/// directory, exactly as [`lookup`] and [`create`] do.
pub fn print_tree(u: &UnixFilesystem, inr: u16, prefix: &str) -> Result<()> {
    let mut reader = match DirectoryReader::open(u, inr) {
        Ok(reader) => reader,
        Err(Error::InvalidDirectoryInode) => {
            println!("FIL {prefix}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("DIR {prefix}/");
    // an empty prefix names the root; its children are named from "/", not from "".
    let base = if prefix.is_empty() { "/" } else { prefix };
    while let Some((name, child_inr)) = reader.read_dir()? {
        print_tree(u, child_inr, &format!("{base}/{name}"))?;
    }
    Ok(())
}
