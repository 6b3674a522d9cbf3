//! Runtime discovery of DPI VFs.
//!
//! Scans the PCI sysfs tree for Marvell DPI virtual functions. No
//! hardcoded device lists — everything is read from sysfs at runtime.

use std::path::Path;

use dpi_chip::pcie::{BINDABLE_DEVICE_IDS, MARVELL_VENDOR_ID};

use crate::error::{DpiError, Result};

/// One discovered DPI VF.
#[derive(Debug, Clone)]
pub struct VfInfo {
    /// PCI address, as sysfs spells it.
    pub pcie_address: String,
    /// IOMMU group, if the IOMMU is enabled.
    pub iommu_group: Option<u32>,
    /// Currently bound driver, if any.
    pub driver: Option<String>,
}

/// Scan `/sys/bus/pci/devices` for DPI VFs.
///
/// Devices whose vendor/device files cannot be read are skipped with a
/// warning rather than failing the whole scan.
///
/// # Errors
///
/// [`DpiError::Sysfs`] if the PCI device directory itself is unreadable.
pub fn enumerate_vfs() -> Result<Vec<VfInfo>> {
    let pci_devices = Path::new("/sys/bus/pci/devices");
    let entries =
        std::fs::read_dir(pci_devices).map_err(|e| DpiError::sysfs(pci_devices, e))?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let (vendor, device) = match (
            read_hex_sysfs(&path.join("vendor")),
            read_hex_sysfs(&path.join("device")),
        ) {
            (Ok(v), Ok(d)) => (v, d),
            _ => {
                tracing::warn!("skipping {}: unreadable id files", path.display());
                continue;
            }
        };
        if vendor != MARVELL_VENDOR_ID || !BINDABLE_DEVICE_IDS.contains(&device) {
            continue;
        }

        let pcie_address = entry.file_name().to_string_lossy().to_string();
        found.push(VfInfo {
            iommu_group: read_iommu_group(&path),
            driver: read_driver(&path),
            pcie_address,
        });
    }

    // Sysfs iteration order is arbitrary; keep the listing stable.
    found.sort_by(|a, b| a.pcie_address.cmp(&b.pcie_address));
    tracing::info!("discovered {} DPI VF(s)", found.len());
    Ok(found)
}

fn read_iommu_group(device_path: &Path) -> Option<u32> {
    let target = std::fs::read_link(device_path.join("iommu_group")).ok()?;
    target.file_name()?.to_str()?.parse().ok()
}

fn read_driver(device_path: &Path) -> Option<String> {
    let target = std::fs::read_link(device_path.join("driver")).ok()?;
    Some(target.file_name()?.to_string_lossy().to_string())
}

/// Read a hexadecimal value from a sysfs attribute (`0x177d` style).
fn read_hex_sysfs(path: &Path) -> Result<u16> {
    let content = std::fs::read_to_string(path).map_err(|e| DpiError::sysfs(path, e))?;
    let trimmed = content.trim().trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16).map_err(|e| {
        DpiError::sysfs(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}
