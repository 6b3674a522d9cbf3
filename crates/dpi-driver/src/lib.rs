//! Userspace driver for the Marvell CN10K DPI DMA engine.
//!
//! Binds a DPI virtual function through VFIO, negotiates a DMA queue with
//! the privileged PF driver over the VF→PF mailbox, and tears everything
//! down again. The silicon model (registers, wire formats, identifiers)
//! lives in [`dpi_chip`].
//!
//! # Bring-up sequence
//!
//! ```no_run
//! use dpi_chip::addr::PciAddress;
//! use dpi_driver::{DpiVf, VfioDevice};
//!
//! # fn main() -> dpi_driver::Result<()> {
//! let address: PciAddress = "0000:06:00.1".parse()?;
//! let vfio = VfioDevice::bind(&address)?;
//! let vf = DpiVf::attach(&vfio)?;
//!
//! let version = vf.open_with_fallback(0)?;
//! vf.enable();
//! println!("queue up via {version:?}");
//!
//! vf.disable();
//! vf.close()?;
//! // drop order unmaps the BAR, then closes device, group, container
//! # Ok(())
//! # }
//! ```
//!
//! Everything is synchronous and single-threaded by design: the mailbox
//! protocol allows one command in flight, and every wait is a bounded
//! poll on the calling thread.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod discovery;
mod error;
pub mod mbox;
pub mod mmio;
mod pf;
mod queue;
pub mod vfio;

pub use discovery::{enumerate_vfs, VfInfo};
pub use error::{DpiError, Result};
pub use mbox::Mailbox;
pub use mmio::{MappedRegion, RegisterIo};
pub use pf::{DpiPf, EngineCfg, MpsMrrsCfg, PF_NODE};
pub use queue::{DpiVf, ProtocolVersion, VdmaRegisters};
pub use vfio::VfioDevice;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        DpiError, DpiPf, DpiVf, EngineCfg, MpsMrrsCfg, ProtocolVersion, Result, VfioDevice,
    };
    pub use dpi_chip::addr::PciAddress;
}
