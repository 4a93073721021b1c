//! Test-only fixtures shared across modules: a formatted, mounted disk image backed by a
//! `tempfile`.

use std::sync::Once;

use tempfile::NamedTempFile;

use crate::mount::{self, UnixFilesystem};

static LOGGER_INIT: Once = Once::new();

/// Installs the `env_logger` subscriber the first time it's called, so `RUST_LOG=unixv6fs=trace
/// cargo test -- --nocapture` surfaces the crate's `log` output during a test run.
fn init_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Formats a fresh image with the given geometry and mounts it, returning the temp file handle
/// (kept alive for the image's lifetime) alongside the mounted filesystem.
pub fn mounted_fs(num_blocks: u32, num_inodes: u32) -> (NamedTempFile, UnixFilesystem) {
    init_logger();
    let tmp = NamedTempFile::new().expect("create temp image");
    mount::mkfs(tmp.path(), num_blocks, num_inodes).expect("mkfs");
    let fs = mount::mount(tmp.path()).expect("mount");
    (tmp, fs)
}

/// A blank, zero-filled image of `sectors` sectors, for low-level sector I/O tests that don't
/// need a formatted filesystem.
pub fn blank_image(sectors: u32) -> (NamedTempFile, std::fs::File) {
    let tmp = NamedTempFile::new().expect("create temp image");
    std::fs::write(tmp.path(), vec![0u8; sectors as usize * crate::sector::SECTOR_SIZE])
        .expect("zero-fill image");
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .expect("open image");
    (tmp, file)
}
