//! Read/write access to UNIX Version 6 filesystem images.
//!
//! The crate is layered the way the on-disk format itself is layered: raw sector I/O at the
//! bottom, a bitmap allocator above it, inodes above that, then file content addressing,
//! directories, and finally the [`mount`] entry point that ties a disk image together into a
//! [`mount::UnixFilesystem`] handle. Higher layers only ever call down, never sideways or up.

pub mod bitmap;
pub mod directory;
pub mod error;
pub mod filev6;
pub mod inode;
pub mod mount;
pub mod sector;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use mount::UnixFilesystem;
