//! PCI address parsing and VF-index derivation.
//!
//! The engine derives a VF's mailbox index from its position on the bus:
//! the low 5 bits of the device number and the low 3 bits of the function
//! number pack into one byte, and the PF itself (device 0, function 0 of
//! the DPI bus) occupies slot 0, so VFs count from the packed value minus
//! one. The packing is part of the PF driver contract and must not change.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::proto::MAX_VFS;

/// Errors from [`PciAddress`] parsing or VF-index derivation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Input does not match the `domain:bus:device.function` grammar.
    #[error("malformed PCI address {input:?}, expected domain:bus:device.function")]
    Malformed {
        /// The rejected input.
        input: String,
    },

    /// A component parsed but is out of its architectural range.
    #[error("PCI address component {component} out of range: {value:#x}")]
    ComponentRange {
        /// Which component was rejected.
        component: &'static str,
        /// The offending value.
        value: u32,
    },

    /// The address names the physical function, which has no VF index.
    #[error("{address} is the physical function, not a VF")]
    NotAVirtualFunction {
        /// The offending address.
        address: PciAddress,
    },

    /// The derived VF index is beyond what the engine exposes.
    #[error("{address} derives VF index {index}, engine exposes {MAX_VFS}")]
    VfIndexOutOfRange {
        /// The offending address.
        address: PciAddress,
        /// The derived index.
        index: u8,
    },
}

/// A parsed `domain:bus:device.function` PCI address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    /// PCI domain (segment).
    pub domain: u16,
    /// Bus number.
    pub bus: u8,
    /// Device number, 0..=31.
    pub device: u8,
    /// Function number, 0..=7.
    pub function: u8,
}

impl PciAddress {
    /// Derive the DPI VF index for this address.
    ///
    /// Packs `device[4:0]` and `function[2:0]` into one byte and subtracts
    /// one. The PF's own slot (packed value 0) is rejected rather than
    /// wrapped, and so is anything past the engine's VF count.
    ///
    /// # Errors
    ///
    /// [`AddressError::NotAVirtualFunction`] for the PF slot,
    /// [`AddressError::VfIndexOutOfRange`] past [`MAX_VFS`].
    pub fn vf_index(&self) -> Result<u8, AddressError> {
        let packed = ((self.device & 0x1F) << 3) | (self.function & 0x7);
        let index = packed
            .checked_sub(1)
            .ok_or(AddressError::NotAVirtualFunction { address: *self })?;
        if index >= MAX_VFS {
            return Err(AddressError::VfIndexOutOfRange {
                address: *self,
                index,
            });
        }
        Ok(index)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = AddressError;

    #[allow(clippy::cast_possible_truncation)] // components are range-checked
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::Malformed {
            input: s.to_string(),
        };

        // domain:bus:device.function — all components hex.
        let (domain, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (bus, rest) = rest.split_once(':').ok_or_else(malformed)?;
        let (device, function) = rest.split_once('.').ok_or_else(malformed)?;
        if domain.is_empty() || bus.is_empty() || device.is_empty() || function.is_empty() {
            return Err(malformed());
        }

        let domain = u16::from_str_radix(domain, 16).map_err(|_| malformed())?;
        let bus = u8::from_str_radix(bus, 16).map_err(|_| malformed())?;
        let device = u32::from_str_radix(device, 16).map_err(|_| malformed())?;
        let function = u32::from_str_radix(function, 16).map_err(|_| malformed())?;

        if device > 0x1F {
            return Err(AddressError::ComponentRange {
                component: "device",
                value: device,
            });
        }
        if function > 7 {
            return Err(AddressError::ComponentRange {
                component: "function",
                value: function,
            });
        }

        Ok(Self {
            domain,
            bus,
            device: device as u8,
            function: function as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_address() {
        let addr: PciAddress = "0000:01:00.1".parse().unwrap();
        assert_eq!(
            addr,
            PciAddress {
                domain: 0,
                bus: 1,
                device: 0,
                function: 1
            }
        );
        assert_eq!(addr.to_string(), "0000:01:00.1");
    }

    #[test]
    fn first_vf_derives_index_zero() {
        let addr: PciAddress = "0000:01:00.1".parse().unwrap();
        assert_eq!(addr.vf_index(), Ok(0));
    }

    #[test]
    fn vf_index_packs_device_and_function() {
        // device 2, function 3 → (2 << 3) | 3 = 19 → index 18
        let addr: PciAddress = "0002:06:02.3".parse().unwrap();
        assert_eq!(addr.vf_index(), Ok(18));
    }

    #[test]
    fn pf_slot_is_rejected() {
        let addr: PciAddress = "0000:06:00.0".parse().unwrap();
        assert!(matches!(
            addr.vf_index(),
            Err(AddressError::NotAVirtualFunction { .. })
        ));
    }

    #[test]
    fn index_past_engine_limit_is_rejected() {
        // device 4, function 1 → (4 << 3) | 1 = 33 → index 32 == MAX_VFS
        let addr: PciAddress = "0000:06:04.1".parse().unwrap();
        assert!(matches!(
            addr.vf_index(),
            Err(AddressError::VfIndexOutOfRange { index: 32, .. })
        ));
    }

    #[test]
    fn rejects_malformed_inputs() {
        for bad in ["", "0000:01:00", "01:00.1.2", "zzzz:01:00.1", "0000:01:00.", "0000::00.1"] {
            assert!(bad.parse::<PciAddress>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert!(matches!(
            "0000:01:20.0".parse::<PciAddress>(),
            Err(AddressError::ComponentRange {
                component: "device",
                ..
            })
        ));
        assert!(matches!(
            "0000:01:00.8".parse::<PciAddress>(),
            Err(AddressError::ComponentRange {
                component: "function",
                ..
            })
        ));
    }
}
