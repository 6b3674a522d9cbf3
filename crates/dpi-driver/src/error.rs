//! Error types for DPI driver operations.

use std::path::PathBuf;

use dpi_chip::addr::AddressError;
use thiserror::Error;

/// Result type alias for DPI operations.
pub type Result<T> = std::result::Result<T, DpiError>;

/// Errors that can occur while binding or driving a DPI VF.
#[derive(Debug, Error)]
pub enum DpiError {
    /// No PCI device exists at the given address.
    #[error("no PCI device at {path}")]
    DeviceNotFound {
        /// Sysfs path that was checked.
        path: PathBuf,
    },

    /// The device's IOMMU group could not be resolved.
    #[error("cannot resolve IOMMU group: {reason}. Is the IOMMU enabled?")]
    IommuGroupUnavailable {
        /// Why resolution failed.
        reason: String,
    },

    /// The VFIO container node could not be opened.
    #[error("cannot open /dev/vfio/vfio: {source}. Is vfio-pci loaded?")]
    VfioUnavailable {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The VFIO group node could not be opened or is not viable.
    #[error("VFIO group {group} unavailable: {reason}")]
    GroupUnavailable {
        /// IOMMU group number.
        group: u32,
        /// Why the group cannot be used.
        reason: String,
    },

    /// Attaching the group to the container failed.
    #[error("failed to attach group to container: {source}")]
    ContainerAttachFailed {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The kernel rejected the requested IOMMU model.
    #[error("IOMMU type 1 unsupported: {reason}")]
    IommuTypeUnsupported {
        /// Why the model was rejected.
        reason: String,
    },

    /// The group would not hand out a descriptor for the device.
    #[error("failed to get device fd for {address}: {source}")]
    DeviceBindFailed {
        /// PCI address requested from the group.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Querying or mapping a BAR region failed.
    #[error("failed to map BAR{bar}: {reason}")]
    RegionMapFailed {
        /// VFIO region index.
        bar: u32,
        /// Why the mapping failed.
        reason: String,
    },

    /// The PF never overwrote the mailbox data register.
    #[error("mailbox command timed out after {polls} polls")]
    MailboxTimeout {
        /// Number of 1 ms polls performed.
        polls: u32,
    },

    /// The PF answered with something other than ACK.
    #[error("mailbox NACK from PF, response word {response:#x}")]
    MailboxNack {
        /// Raw response word, for diagnosis.
        response: u64,
    },

    /// A hardware idle-wait exhausted its poll budget.
    #[error("device unresponsive: {register} busy after {polls} polls")]
    DeviceUnresponsive {
        /// Register that was being polled.
        register: &'static str,
        /// Number of polls performed.
        polls: u32,
    },

    /// The PCI address string or its VF derivation was rejected.
    #[error(transparent)]
    InvalidAddress {
        /// Underlying parse/derivation error.
        #[from]
        source: AddressError,
    },

    /// The PF control node could not be opened.
    #[error("cannot open PF control node {path}: {source}")]
    PfNodeUnavailable {
        /// Device node path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A PF control ioctl was rejected.
    #[error("PF refused {what}: {source}")]
    PfConfigFailed {
        /// Which configuration request failed.
        what: &'static str,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A sysfs read or write failed.
    #[error("sysfs access failed at {path}: {source}")]
    Sysfs {
        /// Path that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error outside any more specific category.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl DpiError {
    /// Create a device-not-found error.
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an IOMMU-group resolution error.
    pub fn iommu_group_unavailable(reason: impl Into<String>) -> Self {
        Self::IommuGroupUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a group-unavailable error.
    pub fn group_unavailable(group: u32, reason: impl Into<String>) -> Self {
        Self::GroupUnavailable {
            group,
            reason: reason.into(),
        }
    }

    /// Create a region-map error.
    pub fn region_map_failed(bar: u32, reason: impl Into<String>) -> Self {
        Self::RegionMapFailed {
            bar,
            reason: reason.into(),
        }
    }

    /// Create a sysfs access error.
    pub fn sysfs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Sysfs {
            path: path.into(),
            source,
        }
    }
}
