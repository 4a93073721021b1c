//! Raw 512-byte sector I/O against a disk image file.
//!
//! Absolute-offset reads and writes via [`FileExt`], with a short transfer treated as fatal I/O
//! rather than silently returning a partial sector.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{Error, Result};

/// Size in bytes of a single disk sector.
pub const SECTOR_SIZE: usize = 512;

/// A single sector's worth of bytes.
pub type SectorBuf = [u8; SECTOR_SIZE];

/// Reads sector `sector` of `file` into `buf`.
pub fn read_sector(file: &File, sector: u32, buf: &mut SectorBuf) -> Result<()> {
    let offset = sector as u64 * SECTOR_SIZE as u64;
    let n = file.read_at(buf, offset)?;
    if n != SECTOR_SIZE {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short read at sector {sector}: got {n} of {SECTOR_SIZE} bytes"),
        )));
    }
    Ok(())
}

/// Writes `buf` to sector `sector` of `file`.
pub fn write_sector(file: &File, sector: u32, buf: &SectorBuf) -> Result<()> {
    let offset = sector as u64 * SECTOR_SIZE as u64;
    let n = file.write_at(buf, offset)?;
    if n != SECTOR_SIZE {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short write at sector {sector}: wrote {n} of {SECTOR_SIZE} bytes"),
        )));
    }
    Ok(())
}

/// Reads the little-endian `u16` stored at word index `idx` within a sector buffer.
///
/// Used for indirect-block address tables, where casting the buffer to `&[u16]` would require an
/// alignment guarantee a `[u8; 512]` doesn't give us.
pub fn get_u16(buf: &SectorBuf, idx: usize) -> u16 {
    u16::from_le_bytes([buf[idx * 2], buf[idx * 2 + 1]])
}

/// Writes `value` as a little-endian `u16` at word index `idx` within a sector buffer.
pub fn set_u16(buf: &mut SectorBuf, idx: usize, value: u16) {
    let bytes = value.to_le_bytes();
    buf[idx * 2] = bytes[0];
    buf[idx * 2 + 1] = bytes[1];
}
