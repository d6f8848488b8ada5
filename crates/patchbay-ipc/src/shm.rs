//! Named POSIX shared-memory regions.
//!
//! spec.md treats the shared-memory allocator as an opaque external
//! collaborator ("create/resize/map/unmap/destroy keyed by a textual
//! name"); this module is that collaborator's concrete implementation,
//! backed directly by `shm_open`/`mmap` rather than a third-party
//! allocator crate, since the engine needs raw byte-addressable control
//! over the region (resize-in-place, free-list rebuilding) that no
//! higher-level shared-memory crate exposes.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::error::{IpcError, Result};

/// A named region of POSIX shared memory, mapped into this process.
///
/// The region is never placed in shared memory itself (no pointers, no
/// mutexes) — only the raw bytes are shared; synchronization is the
/// caller's job (see `patchbay-core`'s per-port-type free-list mutex).
pub struct ShmRegion {
    name: String,
    fd: RawFd,
    ptr: *mut u8,
    len: usize,
}

// Safety: the mapped region is plain POD bytes; callers are responsible
// for the same discipline shared memory always requires (no unsynchronized
// concurrent writes).
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create (or re-open) a named shared region of at least `len` bytes.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let cname =
            CString::new(name).map_err(|_| IpcError::Shm(name.to_string(), bad_name_err()))?;

        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(IpcError::Shm(name.to_string(), std::io::Error::last_os_error()));
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(IpcError::Shm(name.to_string(), err));
        }

        let ptr = map(fd, len)?;

        Ok(Self {
            name: name.to_string(),
            fd,
            ptr,
            len,
        })
    }

    /// Resize the region in place, preserving existing bytes up to
    /// `min(old_len, new_len)`. Remaps the region; the caller must rebuild
    /// any free-list that referenced the old base pointer or length.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        unsafe { munmap_checked(self.ptr, self.len)? };

        if unsafe { libc::ftruncate(self.fd, new_len as libc::off_t) } != 0 {
            return Err(IpcError::Shm(self.name.clone(), std::io::Error::last_os_error()));
        }

        self.ptr = map(self.fd, new_len)?;
        self.len = new_len;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw base pointer of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// View the whole region as a byte slice.
    ///
    /// # Safety
    /// The caller must not read concurrently with an unsynchronized writer.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }

    /// View the whole region as a mutable byte slice.
    ///
    /// # Safety
    /// The caller must hold whatever external lock serializes writers.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }

    /// Unlink the region from the filesystem namespace. Existing mappings
    /// (including this one, until dropped) remain valid.
    pub fn destroy(name: &str) -> Result<()> {
        let cname =
            CString::new(name).map_err(|_| IpcError::Shm(name.to_string(), bad_name_err()))?;
        if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(IpcError::Shm(name.to_string(), err));
            }
        }
        Ok(())
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn map(fd: RawFd, len: usize) -> Result<*mut u8> {
    if len == 0 {
        return Ok(ptr::null_mut());
    }
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(IpcError::Shm(String::new(), std::io::Error::last_os_error()));
    }
    Ok(addr as *mut u8)
}

unsafe fn munmap_checked(ptr: *mut u8, len: usize) -> Result<()> {
    if ptr.is_null() || len == 0 {
        return Ok(());
    }
    if libc::munmap(ptr as *mut libc::c_void, len) != 0 {
        return Err(IpcError::Shm(String::new(), std::io::Error::last_os_error()));
    }
    Ok(())
}

fn bad_name_err() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "shm name contains NUL byte")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/patchbay-test-{}-{}", tag, std::process::id())
    }

    #[test]
    fn create_write_read_roundtrip() {
        let name = unique_name("rw");
        let mut region = ShmRegion::create(&name, 64).unwrap();
        unsafe {
            region.as_mut_slice()[0] = 0xAB;
        }
        assert_eq!(unsafe { region.as_slice()[0] }, 0xAB);
        ShmRegion::destroy(&name).unwrap();
    }

    #[test]
    fn resize_preserves_prefix() {
        let name = unique_name("resize");
        let mut region = ShmRegion::create(&name, 32).unwrap();
        unsafe {
            region.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        region.resize(128).unwrap();
        assert_eq!(region.len(), 128);
        assert_eq!(unsafe { &region.as_slice()[..4] }, &[1, 2, 3, 4]);
        ShmRegion::destroy(&name).unwrap();
    }

    #[test]
    fn destroy_missing_region_is_not_an_error() {
        let name = unique_name("missing");
        assert!(ShmRegion::destroy(&name).is_ok());
    }
}
