//! Mounting, formatting, and the `UnixFilesystem` handle that every higher layer borrows.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::inode::{
    self, INODES_PER_SECTOR, INODE_SIZE, Inode, MODE_DIR, SMALL_FILE_MAX_SIZE,
};
use crate::sector::{self, SECTOR_SIZE};

/// Sector holding the boot block and its magic byte.
pub const BOOTBLOCK_SECTOR: u32 = 0;
/// Sector holding the [`SuperBlock`].
pub const SUPERBLOCK_SECTOR: u32 = 1;
/// Byte offset of the boot sector's magic marker.
pub const BOOTBLOCK_MAGIC_NUM_OFFSET: usize = 0;
/// Value the boot sector's magic marker must hold for [`mount`] to accept the image.
pub const BOOTBLOCK_MAGIC_NUM: u8 = 0x56;
/// Inode number of the filesystem root directory.
pub const ROOT_INUMBER: u16 = 1;

const SUPERBLOCK_SIZE: usize = 24;

/// On-disk superblock, sector 1 of every image.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SuperBlock {
    pub s_isize: u16,
    pub s_fsize: u16,
    pub s_fbmsize: u16,
    pub s_ibmsize: u16,
    pub s_inode_start: u16,
    pub s_block_start: u16,
    pub s_fbm_start: u16,
    pub s_ibm_start: u16,
    pub s_flock: u8,
    pub s_ilock: u8,
    pub s_fmod: u8,
    pub s_ronly: u8,
    pub s_time: [u16; 2],
}

const _: () = assert!(std::mem::size_of::<SuperBlock>() == SUPERBLOCK_SIZE);

/// A mounted UNIX v6 filesystem image.
///
/// Holds a non-owning-style relationship with the layers above it: `FileV6` and directory
/// operations borrow a `&UnixFilesystem` rather than taking ownership, matching the original's
/// `struct unix_filesystem *u` pointer threaded through every call. The allocator bitmaps use
/// interior mutability since allocating a block or inode never needs an exclusive borrow of the
/// handle itself — only file I/O does, and `File::read_at`/`write_at` need no `&mut` either.
#[derive(Debug)]
pub struct UnixFilesystem {
    file: File,
    superblock: SuperBlock,
    ibm: RefCell<Bitmap>,
    fbm: RefCell<Bitmap>,
}

impl UnixFilesystem {
    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub(crate) fn ibm(&self) -> &RefCell<Bitmap> {
        &self.ibm
    }

    pub(crate) fn fbm(&self) -> &RefCell<Bitmap> {
        &self.fbm
    }

    /// Prints the superblock fields to stdout, in on-disk order.
    pub fn print_superblock(&self) {
        let sb = &self.superblock;
        println!("**********FS SUPERBLOCK START**********");
        println!("s_isize       : {}", sb.s_isize);
        println!("s_fsize       : {}", sb.s_fsize);
        println!("s_fbmsize     : {}", sb.s_fbmsize);
        println!("s_ibmsize     : {}", sb.s_ibmsize);
        println!("s_inode_start : {}", sb.s_inode_start);
        println!("s_block_start : {}", sb.s_block_start);
        println!("s_fbm_start   : {}", sb.s_fbm_start);
        println!("s_ibm_start   : {}", sb.s_ibm_start);
        println!("s_flock       : {}", sb.s_flock);
        println!("s_ilock       : {}", sb.s_ilock);
        println!("s_fmod        : {}", sb.s_fmod);
        println!("s_ronly       : {}", sb.s_ronly);
        println!("s_time        : [{}, {}]", sb.s_time[0], sb.s_time[1]);
        println!("**********FS SUPERBLOCK END**********");
    }

    /// Flushes the image and consumes the handle. Any further use requires mounting again.
    pub fn umount(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Mounts the image at `image_path`, validating the boot sector and rebuilding both bitmaps by
/// scanning the inode table.
pub fn mount<P: AsRef<Path>>(image_path: P) -> Result<UnixFilesystem> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(image_path.as_ref())?;

    let mut boot = [0u8; SECTOR_SIZE];
    sector::read_sector(&file, BOOTBLOCK_SECTOR, &mut boot)?;
    if boot[BOOTBLOCK_MAGIC_NUM_OFFSET] != BOOTBLOCK_MAGIC_NUM {
        log::error!("bad boot sector magic in {:?}", image_path.as_ref());
        return Err(Error::BadBootSector);
    }

    let mut sb_buf = [0u8; SECTOR_SIZE];
    sector::read_sector(&file, SUPERBLOCK_SECTOR, &mut sb_buf)?;
    let superblock: SuperBlock = bytemuck::pod_read_unaligned(&sb_buf[..SUPERBLOCK_SIZE]);

    let mut ibm = Bitmap::alloc(2, INODES_PER_SECTOR as u64 * superblock.s_isize as u64 - 1)?;
    let mut fbm = Bitmap::alloc(
        superblock.s_block_start as u64 + 1,
        superblock.s_fsize as u64 - 1,
    )?;

    fill_ibm(&file, &superblock, &mut ibm)?;
    fill_fbm(&file, &superblock, &mut fbm)?;

    log::debug!(
        "mounted {:?}: {} sectors, {} inode sectors",
        image_path.as_ref(),
        superblock.s_fsize,
        superblock.s_isize
    );

    Ok(UnixFilesystem {
        file,
        superblock,
        ibm: RefCell::new(ibm),
        fbm: RefCell::new(fbm),
    })
}

fn fill_ibm(file: &File, sb: &SuperBlock, ibm: &mut Bitmap) -> Result<()> {
    ibm.clear_all();
    for s in 0..sb.s_isize as u32 {
        let mut buf = [0u8; SECTOR_SIZE];
        match sector::read_sector(file, sb.s_inode_start as u32 + s, &mut buf) {
            Ok(()) => {
                for i in 0..INODES_PER_SECTOR {
                    let inode: Inode =
                        bytemuck::pod_read_unaligned(&buf[i * INODE_SIZE..(i + 1) * INODE_SIZE]);
                    let inr = INODES_PER_SECTOR as u64 * s as u64 + i as u64;
                    if inode.is_allocated() {
                        ibm.set(inr);
                    }
                }
            }
            Err(e) => {
                log::warn!(
                    "fill_ibm: sector {} unreadable, marking its inodes used: {e}",
                    sb.s_inode_start as u32 + s
                );
                for i in 0..INODES_PER_SECTOR {
                    let inr = INODES_PER_SECTOR as u64 * s as u64 + i as u64;
                    ibm.set(inr);
                }
            }
        }
    }
    Ok(())
}

fn fill_fbm(file: &File, sb: &SuperBlock, fbm: &mut Bitmap) -> Result<()> {
    fbm.clear_all();
    let max_inr = (INODES_PER_SECTOR as u32 * sb.s_isize as u32).saturating_sub(1) as u16;
    for inr in 0..=max_inr {
        let ino = match inode::read_raw(file, sb, inr) {
            Ok(ino) => ino,
            Err(Error::UnallocatedInode) => continue,
            Err(e) => return Err(e),
        };
        let size = ino.size();
        let nsectors = size.div_ceil(SECTOR_SIZE as u32);
        for k in 0..nsectors {
            let sector = inode::find_sector_raw(file, &ino, k)?;
            fbm.set(sector as u64);
        }
        if size > SMALL_FILE_MAX_SIZE {
            for &addr in &ino.i_addr {
                if addr != 0 {
                    fbm.set(addr as u64);
                }
            }
        }
    }
    Ok(())
}

/// Formats a new image at `image_path` with `num_blocks` total sectors and room for
/// `num_inodes` inodes, and stamps a lone root directory at [`ROOT_INUMBER`].
pub fn mkfs<P: AsRef<Path>>(image_path: P, num_blocks: u32, num_inodes: u32) -> Result<()> {
    let s_isize = num_inodes.div_ceil(INODES_PER_SECTOR as u32);
    if num_blocks < s_isize + num_inodes {
        return Err(Error::NotEnoughBlocks);
    }

    let s_inode_start = SUPERBLOCK_SECTOR + 1;
    let s_block_start = s_inode_start + s_isize;

    let superblock = SuperBlock {
        s_isize: s_isize as u16,
        s_fsize: num_blocks as u16,
        s_fbmsize: 0,
        s_ibmsize: 0,
        s_inode_start: s_inode_start as u16,
        s_block_start: s_block_start as u16,
        s_fbm_start: 0,
        s_ibm_start: 0,
        s_flock: 0,
        s_ilock: 0,
        s_fmod: 0,
        s_ronly: 0,
        s_time: [0, 0],
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image_path.as_ref())?;

    let mut boot = [0u8; SECTOR_SIZE];
    boot[BOOTBLOCK_MAGIC_NUM_OFFSET] = BOOTBLOCK_MAGIC_NUM;
    sector::write_sector(&file, BOOTBLOCK_SECTOR, &boot)?;

    let mut sb_buf = [0u8; SECTOR_SIZE];
    sb_buf[..SUPERBLOCK_SIZE].copy_from_slice(bytemuck::bytes_of(&superblock));
    sector::write_sector(&file, SUPERBLOCK_SECTOR, &sb_buf)?;

    for s in 0..s_isize {
        let mut buf = [0u8; SECTOR_SIZE];
        if s == 0 {
            let mut root = Inode::zeroed();
            root.i_mode = MODE_DIR;
            let slot = ROOT_INUMBER as usize;
            buf[slot * INODE_SIZE..(slot + 1) * INODE_SIZE].copy_from_slice(bytemuck::bytes_of(&root));
        }
        sector::write_sector(&file, s_inode_start + s, &buf)?;
    }

    let zero = [0u8; SECTOR_SIZE];
    for s in s_block_start..num_blocks {
        sector::write_sector(&file, s, &zero)?;
    }

    log::debug!(
        "formatted {:?}: {num_blocks} sectors, {num_inodes} inodes ({s_isize} inode sectors)",
        image_path.as_ref()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::mounted_fs;

    #[test]
    fn mkfs_lays_out_geometry_as_specified() {
        let (_tmp, fs) = mounted_fs(100, 32);
        let sb = fs.superblock();
        assert_eq!(sb.s_fsize, 100);
        assert_eq!(sb.s_isize, 2);
        assert_eq!(sb.s_inode_start, 2);
        assert_eq!(sb.s_block_start, 4);
    }

    #[test]
    fn mount_rejects_bad_boot_sector() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 512 * 10]).unwrap();
        assert!(matches!(mount(tmp.path()), Err(Error::BadBootSector)));
    }

    #[test]
    fn mkfs_rejects_too_small_a_geometry() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            mkfs(tmp.path(), 4, 32),
            Err(Error::NotEnoughBlocks)
        ));
    }

    #[test]
    fn remount_reconstructs_bitmaps_from_disk() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        mkfs(tmp.path(), 100, 32).unwrap();
        let fs = mount(tmp.path()).unwrap();
        assert!(fs.ibm().borrow().get(ROOT_INUMBER as u64).is_err()); // root excluded from ibm range
        fs.umount().unwrap();

        let fs2 = mount(tmp.path()).unwrap();
        // any freshly allocated inode number must skip the root and start at 2
        let inr = inode::alloc(&fs2).unwrap();
        assert_eq!(inr, 2);
    }
}
