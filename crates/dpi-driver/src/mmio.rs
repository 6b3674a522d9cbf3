//! Memory-mapped register access for a DPI VF.
//!
//! The VF's BAR0 is mapped through VFIO and accessed with volatile 64-bit
//! loads and stores only — every DPI VF register is a full 64-bit word and
//! every access has hardware side effects.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::ptr_as_ptr)]
#![allow(clippy::cast_ptr_alignment)]

use std::fs::File;
use std::os::unix::io::{AsFd, AsRawFd};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{DpiError, Result};
use crate::vfio::ioctls;

/// Volatile 64-bit register access at a byte offset.
///
/// Implemented by [`MappedRegion`] for real hardware; the mailbox transport
/// and queue lifecycle are generic over this trait so they can be exercised
/// against a simulated register file.
pub trait RegisterIo {
    /// Volatile 64-bit load.
    fn read64(&self, offset: usize) -> u64;
    /// Volatile 64-bit store.
    fn write64(&self, offset: usize, value: u64);
}

/// VFIO region info structure, as the kernel defines it.
#[repr(C)]
#[derive(Debug, Default)]
struct VfioRegionInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    cap_offset: u32,
    size: u64,
    offset: u64,
}

/// A mapped BAR region.
///
/// Owns the mapping; dropping it unmaps. The mapping stays valid independent
/// of the device fd it was created from, but by convention it is dropped
/// before the owning [`crate::VfioDevice`].
pub struct MappedRegion {
    ptr: *mut u8,
    size: usize,
    bar: u32,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("bar", &self.bar)
            .finish()
    }
}

// SAFETY: MappedRegion owns the mapping exclusively; mmap'd memory is
// process-wide and not tied to the creating thread.
unsafe impl Send for MappedRegion {}

// SAFETY: all access is volatile through raw pointers; the hardware, not
// this struct, owns the contents. Concurrent register access discipline is
// the protocol layer's problem, not a memory-safety one.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map a BAR region of a VFIO device read/write, shared.
    ///
    /// # Errors
    ///
    /// [`DpiError::RegionMapFailed`] if the region-info query or the
    /// mapping itself fails.
    pub fn map(device: &File, bar: u32) -> Result<Self> {
        let mut info = VfioRegionInfo {
            argsz: std::mem::size_of::<VfioRegionInfo>() as u32,
            index: bar,
            ..Default::default()
        };

        // SAFETY: the fd is a VFIO device fd and info is a correctly sized,
        // initialized vfio_region_info the kernel fills in.
        let ret = unsafe {
            libc::ioctl(
                device.as_raw_fd(),
                ioctls::VFIO_DEVICE_GET_REGION_INFO as _,
                &raw mut info,
            )
        };
        if ret < 0 {
            return Err(DpiError::region_map_failed(
                bar,
                format!("region info query failed: {}", std::io::Error::last_os_error()),
            ));
        }

        tracing::debug!(
            "BAR{bar}: size={:#x}, offset={:#x}, flags={:#x}",
            info.size,
            info.offset,
            info.flags
        );

        // SAFETY: fd and offset/size come from the kernel's region info;
        // the result is checked by rustix.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                info.size as usize,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                device.as_fd(),
                info.offset,
            )
            .map_err(|e| DpiError::region_map_failed(bar, format!("mmap failed: {e}")))?
        };

        tracing::debug!("mapped BAR{bar} at {ptr:p}, size={:#x}", info.size);

        Ok(Self {
            ptr: ptr.cast(),
            size: info.size as usize,
            bar,
        })
    }

    /// VFIO region index this mapping came from.
    pub const fn bar(&self) -> u32 {
        self.bar
    }

    /// Region size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl RegisterIo for MappedRegion {
    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the mapped region size.
    fn read64(&self, offset: usize) -> u64 {
        assert!(offset + 8 <= self.size, "register offset out of bounds");
        // SAFETY: ptr is a live mapping of self.size bytes and the offset is
        // bounds-checked; MMIO registers are 8-byte aligned by hardware.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u64>()) }
    }

    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the mapped region size.
    fn write64(&self, offset: usize, value: u64) {
        assert!(offset + 8 <= self.size, "register offset out of bounds");
        // SAFETY: ptr is a live mapping of self.size bytes and the offset is
        // bounds-checked.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u64>(), value);
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size are the exact mmap result; Drop runs once.
        unsafe {
            let _ = munmap(self.ptr.cast(), self.size);
        }
        tracing::debug!("unmapped BAR{}", self.bar);
    }
}
