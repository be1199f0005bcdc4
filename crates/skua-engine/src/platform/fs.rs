use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Link `dest` to `src` as a hardlink, or as a reflink when requested.
///
/// Reflinks require filesystem support; on failure or on platforms without
/// them the caller falls back to a byte copy.
pub fn create_link(dest: &Path, src: &Path, use_reflink: bool) -> io::Result<()> {
    if use_reflink {
        reflink(src, dest)
    } else {
        std::fs::hard_link(src, dest)
    }
}

/// Link a destination file and its sidecar to their prior-backup sources,
/// atomically as a pair: if the sidecar link fails, the file link is undone.
pub fn link_pair(
    dest: &Path,
    src: &Path,
    hash_dest: &Path,
    hash_src: &Path,
    use_reflink: bool,
) -> io::Result<()> {
    create_link(dest, src, use_reflink)?;
    if let Err(e) = create_link(hash_dest, hash_src, use_reflink) {
        let _ = std::fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

/// Truncate the file at `path` to `len` bytes.
pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)
}

#[cfg(target_os = "linux")]
fn reflink(src: &Path, dest: &Path) -> io::Result<()> {
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    const FICLONE: libc::c_ulong = 0x4004_9409;

    let src_file = File::open(src)?;
    let dest_file = OpenOptions::new().write(true).create_new(true).open(dest)?;
    let rc = unsafe { libc::ioctl(dest_file.as_raw_fd(), FICLONE, src_file.as_raw_fd()) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        drop(dest_file);
        let _ = std::fs::remove_file(dest);
        return Err(err);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn reflink(_src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "reflinks are not supported on this platform",
    ))
}
