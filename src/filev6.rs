//! File content addressing: sequential reads and the sector-at-a-time write algorithm that
//! grows a file through its small-file, large-file, and transition regimes.

use crate::error::{Error, Result};
use crate::inode::{
    self, ADDRESSES_PER_SECTOR, ADDR_SMALL_LENGTH, Inode, LARGE_FILE_MAX_SIZE, SMALL_FILE_MAX_SIZE,
};
use crate::mount::UnixFilesystem;
use crate::sector::{self, SECTOR_SIZE};

/// A cursor over a single inode's content: the inode's own copy, plus a byte offset.
///
/// Holds a non-owning reference to the mounted filesystem, matching `struct filev6`'s raw
/// `unix_filesystem *` field in the original.
pub struct FileV6<'a> {
    u: &'a UnixFilesystem,
    i_number: u16,
    i_node: Inode,
    offset: u32,
}

impl<'a> FileV6<'a> {
    /// Opens inode `inr` for reading and writing, positioned at offset 0.
    pub fn open(u: &'a UnixFilesystem, inr: u16) -> Result<Self> {
        let i_node = inode::read(u, inr)?;
        Ok(Self {
            u,
            i_number: inr,
            i_node,
            offset: 0,
        })
    }

    /// Initializes a previously-bitmap-allocated inode number as a fresh, empty file or
    /// directory with the given mode, and opens it.
    ///
    /// `inr` must already be marked used in the inode bitmap (via [`inode::alloc`]); its
    /// on-disk slot is still zeroed until this call stamps it.
    pub fn create(u: &'a UnixFilesystem, inr: u16, mode: u16) -> Result<Self> {
        if !u.ibm().borrow().get(inr as u64)? {
            return Err(Error::UnallocatedInode);
        }
        let mut i_node = Inode::zeroed();
        i_node.i_mode = mode;
        inode::write(u, inr, &i_node)?;
        log::debug!("initialized inode {inr} with mode {mode:#06x}");
        Ok(Self {
            u,
            i_number: inr,
            i_node,
            offset: 0,
        })
    }

    pub fn i_number(&self) -> u16 {
        self.i_number
    }

    pub fn inode(&self) -> &Inode {
        &self.i_node
    }

    /// Moves the read/write cursor to `new_offset`, which may be past the end of the file.
    pub fn seek(&mut self, new_offset: u32) -> Result<()> {
        if new_offset as u64 > self.i_node.size() as u64 {
            return Err(Error::OffsetOutOfRange);
        }
        self.offset = new_offset;
        Ok(())
    }

    /// Reads one sector's worth of content starting at the current offset into `buf`, advancing
    /// the cursor by the number of bytes copied. Returns 0 at end of file.
    pub fn read_block(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<usize> {
        let size = self.i_node.size();
        if self.offset >= size {
            return Ok(0);
        }
        let logical = self.offset / SECTOR_SIZE as u32;
        let sector = inode::find_sector(self.u, &self.i_node, logical)?;
        let mut raw = [0u8; SECTOR_SIZE];
        sector::read_sector(self.u.file(), sector, &mut raw)?;

        let remaining = (size - self.offset) as usize;
        let n = remaining.min(SECTOR_SIZE);
        buf[..n].copy_from_slice(&raw[..n]);
        self.offset += n as u32;
        Ok(n)
    }

    /// Appends all of `buf` to the end of the file, growing it one sector at a time.
    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write_one_sector(buf, written)?;
            written += n;
            let new_size = self.i_node.size() + n as u32;
            self.i_node.set_size(new_size)?;
        }
        if written > 0 {
            inode::write(self.u, self.i_number, &self.i_node)?;
        }
        Ok(written)
    }

    fn write_one_sector(&mut self, buf: &[u8], already_written: usize) -> Result<usize> {
        let size = self.i_node.size();
        let needs_new_sector = size % SECTOR_SIZE as u32 == 0;
        if needs_new_sector && size >= LARGE_FILE_MAX_SIZE {
            return Err(Error::FileTooLarge);
        }

        let rem_in_tail = SECTOR_SIZE as u32 - (size % SECTOR_SIZE as u32);
        let want = (buf.len() - already_written) as u32;
        let n = rem_in_tail.min(want) as usize;
        let byte_off = (size % SECTOR_SIZE as u32) as usize;
        let src = &buf[already_written..already_written + n];

        if size < SMALL_FILE_MAX_SIZE {
            if !needs_new_sector {
                self.write_small_interior(size, byte_off, n, src)?;
            } else {
                self.write_small_new_sector(size, n, src)?;
            }
        } else if !needs_new_sector {
            self.write_large_interior(size, byte_off, n, src)?;
        } else {
            if size == SMALL_FILE_MAX_SIZE {
                self.promote_to_large()?;
            }
            self.write_large_new_sector(size, n, src)?;
        }

        Ok(n)
    }

    fn write_small_interior(&mut self, size: u32, byte_off: usize, n: usize, src: &[u8]) -> Result<()> {
        let idx = (size / SECTOR_SIZE as u32) as usize;
        let sec = self.i_node.i_addr[idx] as u32;
        let mut block = [0u8; SECTOR_SIZE];
        sector::read_sector(self.u.file(), sec, &mut block)?;
        block[byte_off..byte_off + n].copy_from_slice(src);
        sector::write_sector(self.u.file(), sec, &block)?;
        Ok(())
    }

    fn write_small_new_sector(&mut self, size: u32, n: usize, src: &[u8]) -> Result<()> {
        let idx = (size / SECTOR_SIZE as u32) as usize;
        let d = self.alloc_data_sector()?;
        let mut block = [0u8; SECTOR_SIZE];
        block[..n].copy_from_slice(src);
        sector::write_sector(self.u.file(), d as u32, &block)?;
        self.i_node.i_addr[idx] = d as u16;
        log::trace!("allocated data sector {d} for inode {} (direct slot {idx})", self.i_number);
        Ok(())
    }

    fn write_large_interior(&mut self, size: u32, byte_off: usize, n: usize, src: &[u8]) -> Result<()> {
        let idx = size / SECTOR_SIZE as u32;
        let g = (idx / ADDRESSES_PER_SECTOR as u32) as usize;
        let p = (idx % ADDRESSES_PER_SECTOR as u32) as usize;
        let indirect_sector = self.i_node.i_addr[g] as u32;
        let mut indirect = [0u8; SECTOR_SIZE];
        sector::read_sector(self.u.file(), indirect_sector, &mut indirect)?;
        let data_sector = sector::get_u16(&indirect, p) as u32;

        let mut block = [0u8; SECTOR_SIZE];
        sector::read_sector(self.u.file(), data_sector, &mut block)?;
        block[byte_off..byte_off + n].copy_from_slice(src);
        sector::write_sector(self.u.file(), data_sector, &block)?;
        Ok(())
    }

    fn promote_to_large(&mut self) -> Result<()> {
        let mut indirect = [0u8; SECTOR_SIZE];
        for (i, &addr) in self.i_node.i_addr.iter().enumerate() {
            sector::set_u16(&mut indirect, i, addr);
        }
        let u0 = self.alloc_data_sector()?;
        sector::write_sector(self.u.file(), u0 as u32, &indirect)?;
        self.i_node.i_addr = [0; ADDR_SMALL_LENGTH];
        self.i_node.i_addr[0] = u0 as u16;
        log::debug!("inode {} promoted to large-file addressing (indirect {u0})", self.i_number);
        Ok(())
    }

    fn write_large_new_sector(&mut self, size: u32, n: usize, src: &[u8]) -> Result<()> {
        let ln = size / SECTOR_SIZE as u32;
        let g = (ln / ADDRESSES_PER_SECTOR as u32) as usize;
        let p = (ln % ADDRESSES_PER_SECTOR as u32) as usize;

        let mut block = [0u8; SECTOR_SIZE];
        block[..n].copy_from_slice(src);

        if p != 0 {
            let indirect_sector = self.i_node.i_addr[g] as u32;
            let mut indirect = [0u8; SECTOR_SIZE];
            sector::read_sector(self.u.file(), indirect_sector, &mut indirect)?;
            let d = self.alloc_data_sector()?;
            sector::set_u16(&mut indirect, p, d as u16);
            sector::write_sector(self.u.file(), indirect_sector, &indirect)?;
            sector::write_sector(self.u.file(), d as u32, &block)?;
            log::trace!("allocated data sector {d} in indirect {indirect_sector} (slot {p})");
        } else {
            let new_indirect = self.alloc_data_sector()?;
            let d = self.alloc_data_sector()?;
            let mut indirect = [0u8; SECTOR_SIZE];
            sector::set_u16(&mut indirect, 0, d as u16);
            sector::write_sector(self.u.file(), new_indirect as u32, &indirect)?;
            sector::write_sector(self.u.file(), d as u32, &block)?;
            self.i_node.i_addr[g] = new_indirect as u16;
            log::debug!(
                "allocated indirect {new_indirect} (group {g}) with first data sector {d} for inode {}",
                self.i_number
            );
        }
        Ok(())
    }

    fn alloc_data_sector(&self) -> Result<u64> {
        let mut fbm = self.u.fbm().borrow_mut();
        let d = fbm.find_next()?;
        fbm.set(d);
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::MODE_FILE;
    use crate::testutil::mounted_fs;

    #[test]
    fn write_then_read_back_a_small_file() {
        let (_tmp, fs) = mounted_fs(200, 32);
        let inr = inode::alloc(&fs).unwrap();
        let mut file = FileV6::create(&fs, inr, MODE_FILE).unwrap();
        file.write_bytes(b"hello, world").unwrap();

        let mut reader = FileV6::open(&fs, inr).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        let n = reader.read_block(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello, world");
    }

    #[test]
    fn write_across_many_sectors_stays_small_file_addressed() {
        let (_tmp, fs) = mounted_fs(200, 32);
        let inr = inode::alloc(&fs).unwrap();
        let mut file = FileV6::create(&fs, inr, MODE_FILE).unwrap();
        let payload = vec![0x42u8; SMALL_FILE_MAX_SIZE as usize];
        file.write_bytes(&payload).unwrap();
        assert_eq!(file.inode().size(), SMALL_FILE_MAX_SIZE);

        let mut reader = FileV6::open(&fs, inr).unwrap();
        let mut total = 0;
        let mut buf = [0u8; SECTOR_SIZE];
        loop {
            let n = reader.read_block(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, SMALL_FILE_MAX_SIZE as usize);
    }

    #[test]
    fn writing_past_the_small_file_cap_promotes_to_indirect_addressing() {
        let (_tmp, fs) = mounted_fs(4000, 32);
        let inr = inode::alloc(&fs).unwrap();
        let mut file = FileV6::create(&fs, inr, MODE_FILE).unwrap();
        let payload = vec![0xAAu8; SMALL_FILE_MAX_SIZE as usize + SECTOR_SIZE];
        file.write_bytes(&payload).unwrap();
        assert_eq!(file.inode().size(), SMALL_FILE_MAX_SIZE + SECTOR_SIZE as u32);
        assert_ne!(file.inode().i_addr[0], 0);

        let mut reader = FileV6::open(&fs, inr).unwrap();
        let mut total = 0usize;
        let mut buf = [0u8; SECTOR_SIZE];
        loop {
            let n = reader.read_block(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, payload.len());
    }

    #[test]
    fn appending_to_a_large_file_in_two_writes_round_trips() {
        let (_tmp, fs) = mounted_fs(4000, 32);
        let inr = inode::alloc(&fs).unwrap();
        let mut file = FileV6::create(&fs, inr, MODE_FILE).unwrap();

        let first: Vec<u8> = (0..SMALL_FILE_MAX_SIZE as usize + 1)
            .map(|i| (i % 256) as u8)
            .collect();
        file.write_bytes(&first).unwrap();
        file.write_bytes(&[0xFF]).unwrap();
        assert_eq!(file.inode().size() as usize, first.len() + 1);

        let mut reader = FileV6::open(&fs, inr).unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; SECTOR_SIZE];
        loop {
            let n = reader.read_block(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        let mut want = first;
        want.push(0xFF);
        assert_eq!(got, want);
    }

    #[test]
    fn seek_past_end_of_file_is_rejected() {
        let (_tmp, fs) = mounted_fs(200, 32);
        let inr = inode::alloc(&fs).unwrap();
        let mut file = FileV6::create(&fs, inr, MODE_FILE).unwrap();
        file.write_bytes(b"abc").unwrap();
        assert!(file.seek(4).is_err());
        assert!(file.seek(3).is_ok());
    }
}
