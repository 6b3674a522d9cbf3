//! PCIe identifiers for the DPI engine.

/// Marvell (Cavium) vendor ID.
pub const MARVELL_VENDOR_ID: u16 = 0x177D;

/// Device IDs for the DPI packet-interface engine.
pub mod device_id {
    /// DPI physical function — owned by the kernel PF driver.
    pub const DPI_PF: u16 = 0xA080;
    /// DPI virtual function — the userspace-controlled side.
    pub const DPI_VF: u16 = 0xA081;
}

/// Device IDs a userspace driver may bind.
pub const BINDABLE_DEVICE_IDS: &[u16] = &[device_id::DPI_VF];

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{:04x}:{:04x}", MARVELL_VENDOR_ID, device_id::DPI_VF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vf_follows_pf() {
        assert_eq!(device_id::DPI_VF, device_id::DPI_PF + 1);
    }

    #[test]
    fn lspci_filter_format() {
        assert_eq!(lspci_filter(), "177d:a081");
    }
}
