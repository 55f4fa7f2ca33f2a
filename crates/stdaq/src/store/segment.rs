// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment management.
//!
//! Provides safe wrappers around `shm_open`, `ftruncate`, `fstat` and `mmap`
//! for creating/attaching and mapping shared memory segments.
//!
//! # Segment Lifecycle
//!
//! 1. The writer calls `ShmSegment::create()` (creates, or attaches if the name exists)
//! 2. Readers call `ShmSegment::open()` (attach only)
//! 3. Segments are unmapped on drop
//! 4. The owner calls `ShmSegment::unlink()` on teardown
//!
//! # Naming Convention
//!
//! POSIX names start with `/` and contain no other `/`. Keys such as
//! `JF07T32V01-3` are accepted and normalized to `/JF07T32V01-3`.

use super::{Result, StoreError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Permission bits for new segments (owner and group read/write).
const SEGMENT_MODE: libc::mode_t = 0o660;

/// POSIX shared memory segment wrapper.
///
/// Automatically unmaps the memory region on drop.
/// Does NOT automatically unlink the segment (caller's responsibility).
pub struct ShmSegment {
    /// Pointer to mapped memory region
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Normalized segment name (for unlink)
    name: String,
}

// SAFETY: ShmSegment points to a MAP_SHARED mapping that lives until drop.
// It owns no thread-affine state; concurrent access rules are enforced by the
// types built on top of it (single writer per store, atomics in the notifier).
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a shared memory segment, or attach to it if it already exists.
    ///
    /// A fresh segment is sized to `size` bytes (kernel zero-filled). An existing
    /// segment must not be larger than `size`; a smaller one is grown.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or if open, resize or mapping fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let name = Self::normalize_name(name)?;
        if size == 0 {
            return Err(StoreError::InvalidGeometry("segment size is zero".into()));
        }

        let c_name = CString::new(name.as_str()).map_err(|_| StoreError::InvalidName(name.clone()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_CREAT|O_RDWR creates the segment or opens the existing one
        // - SEGMENT_MODE is a valid permission mask
        // - shm_open returns a valid fd on success or -1 on error (checked below)
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, SEGMENT_MODE) };

        if fd < 0 {
            return Err(StoreError::SegmentCreate(io::Error::last_os_error()));
        }

        let existing = match fd_size(fd) {
            Ok(len) => len,
            Err(err) => {
                // SAFETY: fd is valid from shm_open and is not used after this point
                unsafe { libc::close(fd) };
                return Err(StoreError::SegmentCreate(err));
            }
        };

        if existing > size {
            // SAFETY: fd is valid from shm_open and is not used after this point
            unsafe { libc::close(fd) };
            return Err(StoreError::SizeMismatch {
                name,
                expected: size,
                actual: existing,
            });
        }

        if existing < size {
            // SAFETY:
            // - fd is a valid file descriptor from the successful shm_open call above
            // - size fits in off_t for any mapping the process could hold
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                // SAFETY: fd is still valid; error path, fd is not reused
                unsafe { libc::close(fd) };
                return Err(StoreError::SegmentResize(err));
            }
        }

        let ptr = map_fd(fd, size);

        // SAFETY: fd is valid; the mapping (if any) keeps its own reference
        unsafe { libc::close(fd) };

        let ptr = ptr?;

        log::debug!(
            "[STORE] segment {} mapped size={} (existing={})",
            name,
            size,
            existing
        );

        Ok(Self { ptr, size, name })
    }

    /// Attach to an existing shared memory segment.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no segment has this name, `SizeMismatch` if it is
    /// smaller than `size`, or an open/mapping error.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let name = Self::normalize_name(name)?;
        if size == 0 {
            return Err(StoreError::InvalidGeometry("segment size is zero".into()));
        }

        let c_name = CString::new(name.as_str()).map_err(|_| StoreError::InvalidName(name.clone()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_RDWR opens an existing segment for read/write; mode is ignored
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(StoreError::NotFound(name));
            }
            return Err(StoreError::SegmentOpen(err));
        }

        let actual = match fd_size(fd) {
            Ok(len) => len,
            Err(err) => {
                // SAFETY: fd is valid from shm_open and is not used after this point
                unsafe { libc::close(fd) };
                return Err(StoreError::SegmentOpen(err));
            }
        };

        if actual < size {
            // SAFETY: fd is valid from shm_open and is not used after this point
            unsafe { libc::close(fd) };
            return Err(StoreError::SizeMismatch {
                name,
                expected: size,
                actual,
            });
        }

        let ptr = map_fd(fd, size);

        // SAFETY: fd is valid; the mapping (if any) keeps its own reference
        unsafe { libc::close(fd) };

        Ok(Self {
            ptr: ptr?,
            size,
            name,
        })
    }

    /// Validate a key and turn it into a POSIX shm name.
    pub(crate) fn normalize_name(name: &str) -> Result<String> {
        let body = name.strip_prefix('/').unwrap_or(name);
        if body.is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if body.contains('/') {
            return Err(StoreError::InvalidName(format!(
                "Segment name cannot contain '/' after prefix: {name}"
            )));
        }
        if body.len() > 254 {
            return Err(StoreError::InvalidName(format!(
                "Segment name too long (max 255): {name}"
            )));
        }
        Ok(format!("/{body}"))
    }

    /// Unlink (delete) a shared memory segment by name.
    ///
    /// The segment disappears once every process has unmapped it.
    ///
    /// # Errors
    ///
    /// Returns error if unlink fails (segment not found is not an error).
    pub fn unlink(name: &str) -> Result<()> {
        let name = Self::normalize_name(name)?;
        let c_name = CString::new(name.as_str()).map_err(|_| StoreError::InvalidName(name.clone()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - shm_unlink only affects the shm namespace
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            // Not found is OK (idempotent cleanup)
            if err.kind() != io::ErrorKind::NotFound {
                return Err(StoreError::SegmentUnlink(err));
            }
        }

        Ok(())
    }

    /// Check if a segment with the given name exists
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(name) = Self::normalize_name(name) else {
            return false;
        };
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_RDONLY is a valid flag for an existence check
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };

        if fd >= 0 {
            // SAFETY: fd is valid (>= 0) and not used after this point
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Get raw pointer to the mapped memory
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Get the size of the mapping
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the normalized segment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY:
        // - self.ptr was obtained from a successful mmap in create() or open()
        // - self.size is the exact size passed to mmap
        // - Drop runs once, so the region has not been unmapped before
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

/// Current size of the object behind `fd`.
fn fd_size(fd: libc::c_int) -> io::Result<usize> {
    // SAFETY: an all-zero stat is a valid value for this plain C struct
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is a valid descriptor and stat points to writable memory
    let ret = unsafe { libc::fstat(fd, &mut stat) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.st_size.max(0) as usize)
}

/// Map `size` bytes of `fd` read/write and shared.
fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY:
    // - Null address lets the kernel choose the placement
    // - PROT_READ|PROT_WRITE with MAP_SHARED gives a writable mapping visible to
    //   other processes
    // - fd is a valid shm descriptor at least `size` bytes long (checked by callers)
    // - mmap returns MAP_FAILED on error (checked below)
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(StoreError::Mmap(io::Error::last_os_error()));
    }

    Ok(ptr as *mut u8)
}
