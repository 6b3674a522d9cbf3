//! VFIO device binding.
//!
//! Resolves a PCI address to its IOMMU group, walks the VFIO
//! container/group/device handshake, and hands out the device fd plus
//! mapped BAR regions. All handles live in a single [`VfioDevice`] value —
//! there is no process-global state, so several VFs can be bound in one
//! process and teardown is plain drop order.
//!
//! # Requirements
//!
//! 1. IOMMU enabled in firmware and kernel
//! 2. The VF unbound from its kernel driver and bound to `vfio-pci`
//!    (see [`bind_to_vfio`])
//! 3. Access to `/dev/vfio/<group>` (root or a udev grant)

// FFI/ioctl casts are intentional - the VFIO API requires specific types
#![allow(clippy::cast_possible_truncation)]

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};

use dpi_chip::addr::PciAddress;
use dpi_chip::pcie;

use crate::error::{DpiError, Result};
use crate::mmio::MappedRegion;

/// VFIO ioctl numbers (from Linux kernel headers).
///
/// All VFIO ioctls are plain `_IO(';', 100 + offset)` — no size or
/// direction encoded.
pub(crate) mod ioctls {
    use std::os::raw::c_ulong;

    /// `_IO(type, nr)` = `(type << 8) | nr`.
    const fn io(ty: u8, nr: u8) -> c_ulong {
        ((ty as c_ulong) << 8) | (nr as c_ulong)
    }

    const VFIO_TYPE: u8 = b';';
    const VFIO_BASE: u8 = 100;

    pub const VFIO_GET_API_VERSION: c_ulong = io(VFIO_TYPE, VFIO_BASE);
    pub const VFIO_CHECK_EXTENSION: c_ulong = io(VFIO_TYPE, VFIO_BASE + 1);
    pub const VFIO_SET_IOMMU: c_ulong = io(VFIO_TYPE, VFIO_BASE + 2);
    pub const VFIO_GROUP_GET_STATUS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 3);
    pub const VFIO_GROUP_SET_CONTAINER: c_ulong = io(VFIO_TYPE, VFIO_BASE + 4);
    pub const VFIO_GROUP_GET_DEVICE_FD: c_ulong = io(VFIO_TYPE, VFIO_BASE + 6);
    pub const VFIO_DEVICE_GET_REGION_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 8);

    pub const VFIO_API_VERSION: i32 = 0;
    pub const VFIO_TYPE1_IOMMU: u32 = 1;
    pub const VFIO_GROUP_FLAGS_VIABLE: u32 = 1 << 0;
}

/// VFIO group status structure, as the kernel defines it.
#[repr(C)]
#[derive(Debug, Default)]
struct VfioGroupStatus {
    argsz: u32,
    flags: u32,
}

/// An IOMMU-protected handle on one PCI device.
///
/// Field order is teardown order: the device fd closes before the group,
/// the group before the container.
#[derive(Debug)]
pub struct VfioDevice {
    address: PciAddress,
    iommu_group: u32,
    device: File,
    #[allow(dead_code)] // held for the lifetime of the device fd
    group: File,
    #[allow(dead_code)] // held for the lifetime of the group fd
    container: File,
}

impl VfioDevice {
    /// Bind a PCI device through VFIO and return the handle set.
    ///
    /// Walks the container/group/device handshake in the order the kernel
    /// requires: resolve the IOMMU group from sysfs, open the container,
    /// open the group and attach it, select the Type1 IOMMU, then request
    /// the device fd. On any failure everything acquired so far is released
    /// by drop.
    ///
    /// # Errors
    ///
    /// Each handshake step has its own [`DpiError`] variant naming the
    /// failing resource.
    pub fn bind(address: &PciAddress) -> Result<Self> {
        let sysfs = PathBuf::from(format!("/sys/bus/pci/devices/{address}"));
        if !sysfs.exists() {
            return Err(DpiError::device_not_found(sysfs));
        }

        let iommu_group = iommu_group(address)?;
        tracing::debug!("{address} is in IOMMU group {iommu_group}");

        let container = open_container()?;
        let group = open_group(iommu_group)?;

        // Attach the group to the container before selecting the IOMMU
        // model; the kernel rejects SET_IOMMU on an empty container.
        // SAFETY: both fds are open and the argument is a pointer to the
        // container's raw fd, as VFIO_GROUP_SET_CONTAINER expects.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_SET_CONTAINER as _,
                std::ptr::from_ref(&container.as_raw_fd()),
            )
        };
        if ret < 0 {
            return Err(DpiError::ContainerAttachFailed {
                source: std::io::Error::last_os_error(),
            });
        }

        // SAFETY: container fd is open; the argument is the IOMMU type.
        let ret = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::VFIO_SET_IOMMU as _,
                ioctls::VFIO_TYPE1_IOMMU,
            )
        };
        if ret < 0 {
            return Err(DpiError::IommuTypeUnsupported {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        let addr_str = address.to_string();
        let addr_cstr = CString::new(addr_str.clone()).map_err(|e| DpiError::DeviceBindFailed {
            address: addr_str.clone(),
            source: std::io::Error::other(e),
        })?;
        // SAFETY: group fd is open and the argument is a NUL-terminated
        // device name; the kernel returns a new owned fd.
        let device_fd = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_GET_DEVICE_FD as _,
                addr_cstr.as_ptr(),
            )
        };
        if device_fd < 0 {
            return Err(DpiError::DeviceBindFailed {
                address: addr_str,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: device_fd is a fresh fd from the kernel; ownership moves
        // to the File, which will close it.
        let device = unsafe { File::from_raw_fd(device_fd) };

        tracing::info!("bound {address} via VFIO (group {iommu_group})");

        Ok(Self {
            address: *address,
            iommu_group,
            device,
            group,
            container,
        })
    }

    /// Map one of the device's BAR regions.
    ///
    /// # Errors
    ///
    /// [`DpiError::RegionMapFailed`] if the query or mapping fails.
    pub fn map_region(&self, bar: u32) -> Result<MappedRegion> {
        MappedRegion::map(&self.device, bar)
    }

    /// The bound device's PCI address.
    pub const fn address(&self) -> &PciAddress {
        &self.address
    }

    /// The IOMMU group the device belongs to.
    pub const fn iommu_group(&self) -> u32 {
        self.iommu_group
    }
}

impl Drop for VfioDevice {
    fn drop(&mut self) {
        tracing::info!("releasing {} (group {})", self.address, self.iommu_group);
    }
}

fn open_container() -> Result<File> {
    let container = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/vfio/vfio")
        .map_err(|source| DpiError::VfioUnavailable { source })?;

    // SAFETY: container fd is open; VFIO_GET_API_VERSION takes no argument.
    let version = unsafe { libc::ioctl(container.as_raw_fd(), ioctls::VFIO_GET_API_VERSION as _) };
    if version != ioctls::VFIO_API_VERSION {
        return Err(DpiError::VfioUnavailable {
            source: std::io::Error::other(format!("unsupported VFIO API version {version}")),
        });
    }

    // SAFETY: container fd is open; the argument is the extension id.
    let has_type1 = unsafe {
        libc::ioctl(
            container.as_raw_fd(),
            ioctls::VFIO_CHECK_EXTENSION as _,
            ioctls::VFIO_TYPE1_IOMMU,
        )
    };
    if has_type1 != 1 {
        return Err(DpiError::IommuTypeUnsupported {
            reason: "kernel does not support the Type1 IOMMU".into(),
        });
    }

    Ok(container)
}

fn open_group(group_id: u32) -> Result<File> {
    let group_path = format!("/dev/vfio/{group_id}");
    let group = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&group_path)
        .map_err(|e| DpiError::group_unavailable(group_id, format!("cannot open {group_path}: {e}")))?;

    let mut status = VfioGroupStatus {
        argsz: std::mem::size_of::<VfioGroupStatus>() as u32,
        flags: 0,
    };
    // SAFETY: group fd is open and status is a correctly sized
    // vfio_group_status the kernel fills in.
    let ret = unsafe {
        libc::ioctl(
            group.as_raw_fd(),
            ioctls::VFIO_GROUP_GET_STATUS as _,
            &raw mut status,
        )
    };
    if ret < 0 || status.flags & ioctls::VFIO_GROUP_FLAGS_VIABLE == 0 {
        return Err(DpiError::group_unavailable(
            group_id,
            "group is not viable (all devices in the group must be bound to vfio-pci)",
        ));
    }

    Ok(group)
}

/// Find the IOMMU group number for a PCI device.
///
/// Reads the `/sys/bus/pci/devices/{addr}/iommu_group` symlink and parses
/// its trailing path component.
///
/// # Errors
///
/// [`DpiError::IommuGroupUnavailable`] if the link cannot be read or its
/// target does not end in a group number.
pub fn iommu_group(address: &PciAddress) -> Result<u32> {
    let link = format!("/sys/bus/pci/devices/{address}/iommu_group");
    let target = std::fs::read_link(&link)
        .map_err(|e| DpiError::iommu_group_unavailable(format!("cannot read {link}: {e}")))?;

    target
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            DpiError::iommu_group_unavailable(format!("cannot parse group from {}", target.display()))
        })
}

// ── vfio-pci driver binding helpers ──────────────────────────────────────────
// The sysfs dance that moves a VF between its kernel driver and vfio-pci.

/// Bind a DPI VF to `vfio-pci`, unbinding any current driver first.
///
/// Requires root or `CAP_SYS_ADMIN`.
///
/// # Errors
///
/// [`DpiError::Sysfs`] if a sysfs write fails (usually permission denied).
pub fn bind_to_vfio(address: &PciAddress) -> Result<()> {
    tracing::info!("binding {address} to vfio-pci");

    let unbind = format!("/sys/bus/pci/devices/{address}/driver/unbind");
    if Path::new(&unbind).exists() {
        std::fs::write(&unbind, address.to_string())
            .map_err(|e| DpiError::sysfs(&unbind, e))?;
        tracing::info!("unbound {address} from existing driver");
    }

    let new_id = "/sys/bus/pci/drivers/vfio-pci/new_id";
    let id_line = format!("{:04x} {:04x}", pcie::MARVELL_VENDOR_ID, pcie::device_id::DPI_VF);
    match std::fs::write(new_id, &id_line) {
        Ok(()) => {}
        // The id pair was registered by an earlier run.
        Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
            tracing::debug!("{id_line} already known to vfio-pci");
        }
        Err(e) => return Err(DpiError::sysfs(new_id, e)),
    }

    let bind = "/sys/bus/pci/drivers/vfio-pci/bind";
    match std::fs::write(bind, address.to_string()) {
        Ok(()) => {}
        // new_id can auto-bind the device the moment the id is registered.
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
            tracing::debug!("{address} already bound");
        }
        Err(e) => return Err(DpiError::sysfs(bind, e)),
    }

    tracing::info!("{address} bound to vfio-pci");
    Ok(())
}

/// Unbind a DPI VF from `vfio-pci`.
///
/// The VF is left unbound; rebinding to the kernel driver is the
/// administrator's call.
///
/// # Errors
///
/// [`DpiError::Sysfs`] if the sysfs write fails.
pub fn unbind_from_vfio(address: &PciAddress) -> Result<()> {
    let unbind = "/sys/bus/pci/drivers/vfio-pci/unbind";
    std::fs::write(unbind, address.to_string()).map_err(|e| DpiError::sysfs(unbind, e))?;
    tracing::info!("{address} unbound from vfio-pci");
    Ok(())
}
