//! PF control node.
//!
//! The privileged side of the engine — global FIFO sizing and the PCIe
//! MPS/MRRS transaction parameters — is owned by the kernel PF driver and
//! reached through two fixed-layout ioctls on its character device. The
//! request structures are kernel ABI and must stay byte-for-byte
//! compatible.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use dpi_chip::proto::ENGINE_COUNT;

use crate::error::{DpiError, Result};

/// The PF driver's character device.
pub const PF_NODE: &str = "/dev/mrvl_cn10k_dpi";

mod ioctls {
    use std::os::raw::c_ulong;

    /// `_IOW(type, nr, size)` — userspace writes `size` bytes to the kernel.
    const fn iow(ty: u8, nr: u8, size: usize) -> c_ulong {
        // _IOC(_IOC_WRITE, type, nr, size)
        (1 << 30) | ((size as c_ulong) << 16) | ((ty as c_ulong) << 8) | (nr as c_ulong)
    }

    const DPI_MAGIC: u8 = 0xB8;

    pub const DPI_MPS_MRRS_CFG: c_ulong =
        iow(DPI_MAGIC, 1, std::mem::size_of::<super::MpsMrrsCfg>());
    pub const DPI_ENGINE_CFG: c_ulong =
        iow(DPI_MAGIC, 2, std::mem::size_of::<super::EngineCfg>());
}

/// PCIe MPS/MRRS configuration request (kernel ABI).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MpsMrrsCfg {
    /// Max read request size, bytes.
    pub max_read_req_sz: u16,
    /// Max payload size, bytes.
    pub max_payload_sz: u16,
    /// Ebus (PEM) port the parameters apply to.
    pub port: u16,
    /// Reserved, must be zero.
    pub reserved: u16,
}

/// Engine FIFO configuration request (kernel ABI).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineCfg {
    /// Per-engine FIFO size mask, one byte per engine, in kilobytes.
    pub fifo_mask: u64,
    /// Max outstanding load requests per engine.
    pub molr: [u16; ENGINE_COUNT],
    /// Set to 1 to apply `molr`; 0 leaves the engine defaults.
    pub update_molr: u16,
    /// Reserved, must be zero.
    pub reserved: u16,
}

/// Handle on the PF control node.
#[derive(Debug)]
pub struct DpiPf {
    node: File,
}

impl DpiPf {
    /// Open the PF control node at its default path.
    ///
    /// # Errors
    ///
    /// [`DpiError::PfNodeUnavailable`] if the node cannot be opened (PF
    /// driver not loaded, or insufficient permissions).
    pub fn open() -> Result<Self> {
        Self::open_at(Path::new(PF_NODE))
    }

    /// Open a PF control node at a non-default path.
    ///
    /// # Errors
    ///
    /// [`DpiError::PfNodeUnavailable`] if the node cannot be opened.
    pub fn open_at(path: &Path) -> Result<Self> {
        let node = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DpiError::PfNodeUnavailable {
                path: path.into(),
                source,
            })?;
        tracing::debug!("opened PF control node {}", path.display());
        Ok(Self { node })
    }

    /// Set the PCIe max payload size and max read request size for a port.
    ///
    /// # Errors
    ///
    /// [`DpiError::PfConfigFailed`] if the PF rejects the request.
    pub fn set_mps_mrrs(&self, cfg: &MpsMrrsCfg) -> Result<()> {
        tracing::debug!(
            "PF: mps={} mrrs={} port={}",
            cfg.max_payload_sz,
            cfg.max_read_req_sz,
            cfg.port
        );
        // SAFETY: the fd is the open PF node and cfg is the fixed-layout
        // request struct the _IOW number was computed for.
        let ret = unsafe {
            libc::ioctl(
                self.node.as_raw_fd(),
                ioctls::DPI_MPS_MRRS_CFG as _,
                std::ptr::from_ref(cfg),
            )
        };
        if ret < 0 {
            return Err(DpiError::PfConfigFailed {
                what: "MPS/MRRS parameters",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Configure the engines' FIFO sizes (and optionally MOLR).
    ///
    /// # Errors
    ///
    /// [`DpiError::PfConfigFailed`] if the PF rejects the request.
    pub fn configure_engines(&self, cfg: &EngineCfg) -> Result<()> {
        tracing::debug!(
            "PF: fifo_mask={:#x} update_molr={}",
            cfg.fifo_mask,
            cfg.update_molr
        );
        // SAFETY: the fd is the open PF node and cfg is the fixed-layout
        // request struct the _IOW number was computed for.
        let ret = unsafe {
            libc::ioctl(
                self.node.as_raw_fd(),
                ioctls::DPI_ENGINE_CFG as _,
                std::ptr::from_ref(cfg),
            )
        };
        if ret < 0 {
            return Err(DpiError::PfConfigFailed {
                what: "engine FIFO configuration",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_structs_match_kernel_abi() {
        assert_eq!(std::mem::size_of::<MpsMrrsCfg>(), 8);
        assert_eq!(std::mem::size_of::<EngineCfg>(), 24);
    }

    #[test]
    fn ioctl_numbers() {
        // _IOW(0xB8, 1, 8) and _IOW(0xB8, 2, 24)
        assert_eq!(ioctls::DPI_MPS_MRRS_CFG, 0x4008_B801);
        assert_eq!(ioctls::DPI_ENGINE_CFG, 0x4018_B802);
    }
}
