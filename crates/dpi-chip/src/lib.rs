//! Silicon model for the Marvell CN10K DPI DMA engine.
//!
//! This crate has **no hardware access** — it is a pure model of the DPI
//! virtual function as seen from userspace: the VF BAR0 register map, the
//! VF→PF mailbox wire format, PCIe identifiers, and the protocol constants
//! used when sizing a command queue.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device IDs for the DPI physical and virtual functions |
//! | [`addr`] | `domain:bus:device.function` address parsing and VF-index derivation |
//! | [`regs`] | VF BAR0 register map — all offsets and bit definitions |
//! | [`mbox`] | VF→PF mailbox message layout, command codes, response words |
//! | [`proto`] | Queue-sizing and timing constants shared by both protocol versions |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod mbox;
pub mod pcie;
pub mod proto;
pub mod regs;
