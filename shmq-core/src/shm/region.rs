// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for queue storage.
//! All unsafe operations are encapsulated here; the region never removes
//! the backing object on its own, that is an explicit `unlink`.

use std::ffi::CString;
use std::io;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::error::SharedMemoryError;
use crate::types::{Permissions, QueueName};

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and will unmap it on drop.
/// Named regions can be attached by other processes using the same name;
/// anonymous regions are shared only with children forked after mapping.
pub struct SharedMemoryRegion {
    /// Name of the backing object, `None` when anonymous.
    name: Option<QueueName>,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: SharedMemoryRegion can be shared between threads with proper synchronization.
// Every access to the queue data goes through the process-shared mutex.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create a new named shared memory object and map it.
    ///
    /// Fails with `AlreadyExists` if an object with this name exists. The
    /// mapping is zero-filled by the kernel.
    ///
    /// # Errors
    /// Returns SharedMemoryError if creation, sizing or mapping fails.
    pub fn create(
        name: &QueueName,
        size: usize,
        permissions: Permissions,
    ) -> Result<Self, SharedMemoryError> {
        Self::check_size(name.as_str(), size)?;
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                permissions.bits() as libc::mode_t,
            )
        };

        if fd < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(SharedMemoryError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                source: errno,
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(SharedMemoryError::TruncateFailed {
                name: name.to_string(),
                size,
                source: errno,
            });
        }

        let mapped = Self::map(Some(fd), size);
        // SAFETY: the mapping keeps its own reference to the object
        unsafe { libc::close(fd) };
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, mode = %permissions, "Created shared memory region");

        Ok(Self {
            name: Some(name.clone()),
            ptr,
            size,
        })
    }

    /// Open an existing named shared memory object, sized from the object itself.
    ///
    /// An object whose creator has not sized it yet is reported as a
    /// `LayoutMismatch`; callers may retry.
    pub fn open(name: &QueueName) -> Result<Self, SharedMemoryError> {
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: stat is plain data and fd is valid
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let errno = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                source: errno,
            });
        }

        let size = stat.st_size as usize;
        if size == 0 {
            unsafe { libc::close(fd) };
            return Err(SharedMemoryError::LayoutMismatch {
                name: name.to_string(),
                reason: "object has not been sized yet".to_string(),
            });
        }
        if let Err(e) = Self::check_size(name.as_str(), size) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let mapped = Self::map(Some(fd), size);
        unsafe { libc::close(fd) };
        let ptr = mapped?;

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: Some(name.clone()),
            ptr,
            size,
        })
    }

    /// Map an anonymous shared region, inherited by children across fork.
    pub fn anonymous(size: usize) -> Result<Self, SharedMemoryError> {
        Self::check_size("<anonymous>", size)?;
        let ptr = Self::map(None, size)?;

        tracing::debug!(size = size, "Mapped anonymous shared memory region");

        Ok(Self {
            name: None,
            ptr,
            size,
        })
    }

    /// Remove the named backing object.
    ///
    /// Existing mappings stay valid; later `open` calls by name fail.
    pub fn unlink(name: &QueueName) -> Result<(), SharedMemoryError> {
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            return Err(SharedMemoryError::UnlinkFailed {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }

        tracing::debug!(name = %name, "Unlinked shared memory region");
        Ok(())
    }

    /// Unmap the region, reporting failure instead of logging it.
    pub fn unmap(self) -> Result<(), SharedMemoryError> {
        let this = ManuallyDrop::new(self);
        this.munmap()
    }

    /// Get the name of this region, if it is named.
    pub fn name(&self) -> Option<&QueueName> {
        self.name.as_ref()
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check_size(name: &str, size: usize) -> Result<(), SharedMemoryError> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(SharedMemoryError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("Size {} is outside 1..={}", size, Self::MAX_SIZE),
            });
        }
        Ok(())
    }

    fn c_name(name: &QueueName) -> Result<CString, SharedMemoryError> {
        CString::new(name.shm_name()).map_err(|e| SharedMemoryError::OpenFailed {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })
    }

    fn map(fd: Option<libc::c_int>, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
        let (flags, fd) = match fd {
            Some(fd) => (libc::MAP_SHARED, fd),
            None => (libc::MAP_SHARED | libc::MAP_ANON, -1),
        };

        // SAFETY: fd is valid or -1 for anonymous maps, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                source: io::Error::last_os_error(),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })
    }

    fn munmap(&self) -> Result<(), SharedMemoryError> {
        // SAFETY: ptr and size were set during mapping
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            return Err(SharedMemoryError::UnmapFailed {
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        if let Err(e) = self.munmap() {
            tracing::error!(
                name = ?self.name,
                error = %e,
                "Failed to unmap shared memory"
            );
        }
    }
}
