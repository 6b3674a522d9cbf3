//! DMA queue lifecycle for one DPI VF.
//!
//! The queue walks `Disabled → Configured → Enabled` on the way up and
//! `Disabled → Closed` on the way down. Reconfiguration has a strict
//! hardware ordering: disable, wait for the engine to drain (SADDR idle
//! bit), clear the request-queue control, then ask the PF to open the
//! queue over the mailbox. Two open-command versions exist; v2 is
//! preferred and v1 is the single fallback.

use std::time::Duration;

use dpi_chip::mbox::{Command, Message};
use dpi_chip::proto::{MBOX_TIMEOUT_MS, QUEUE_BUF_SIZE_V1, QUEUE_BUF_SIZE_V2};
use dpi_chip::regs::{self, saddr};

use crate::error::{DpiError, Result};
use crate::mbox::{poll_until, Mailbox};
use crate::mmio::{MappedRegion, RegisterIo};
use crate::vfio::VfioDevice;

/// Queue-open protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// First-generation open command; chunk size travels on the wire as-is.
    V1,
    /// Extended open command; chunk size travels in 8-byte words.
    V2,
}

impl ProtocolVersion {
    /// Mailbox command code for this version.
    #[must_use]
    pub const fn command(self) -> Command {
        match self {
            Self::V1 => Command::QueueOpen,
            Self::V2 => Command::QueueOpenV2,
        }
    }

    /// Transform a chunk size into the unit this version's csize field uses.
    #[must_use]
    pub const fn wire_csize(self, chunk_size: u32) -> u32 {
        match self {
            Self::V1 => chunk_size,
            Self::V2 => chunk_size / 8,
        }
    }

    /// The command-buffer size the PF driver contract pairs with this
    /// version.
    #[must_use]
    pub const fn default_chunk_size(self) -> u32 {
        match self {
            Self::V1 => QUEUE_BUF_SIZE_V1,
            Self::V2 => QUEUE_BUF_SIZE_V2,
        }
    }
}

/// Open attempts in preference order: v2 first, v1 as the one fallback.
const OPEN_ATTEMPTS: [ProtocolVersion; 2] = [ProtocolVersion::V2, ProtocolVersion::V1];

/// Snapshot of the VDMA register block, for diagnostics.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)] // field names mirror the register names
pub struct VdmaRegisters {
    pub en: u64,
    pub reqq_ctl: u64,
    pub dbell: u64,
    pub saddr: u64,
    pub counts: u64,
    pub naddr: u64,
    pub iwbusy: u64,
    pub cnt: u64,
}

/// One DPI virtual function's DMA queue.
///
/// Generic over [`RegisterIo`] so the protocol state machine can run
/// against a simulated register file; on hardware `R` is [`MappedRegion`].
///
/// Not safe for concurrent use: the mailbox assumes one command in flight.
#[derive(Debug)]
pub struct DpiVf<R: RegisterIo = MappedRegion> {
    vf_index: u8,
    regs: R,
    max_polls: u32,
    poll_interval: Duration,
}

impl DpiVf<MappedRegion> {
    /// Attach to a VFIO-bound VF: derive the VF index from its PCI address
    /// and map the VDMA register BAR.
    ///
    /// # Errors
    ///
    /// Address derivation errors from [`dpi_chip::addr::PciAddress::vf_index`],
    /// or [`DpiError::RegionMapFailed`].
    pub fn attach(vfio: &VfioDevice) -> Result<Self> {
        let vf_index = vfio.address().vf_index()?;
        let regs = vfio.map_region(regs::VDMA_BAR_INDEX)?;
        tracing::info!("{} is DPI VF {vf_index}", vfio.address());
        Ok(Self::new(vf_index, regs))
    }
}

impl<R: RegisterIo> DpiVf<R> {
    /// Queue with the default poll budget (1000 × 1 ms) for both the
    /// mailbox response and the idle-wait.
    pub fn new(vf_index: u8, regs: R) -> Self {
        Self::with_timeout(vf_index, regs, MBOX_TIMEOUT_MS, Duration::from_millis(1))
    }

    /// Queue with a caller-chosen poll budget.
    pub const fn with_timeout(
        vf_index: u8,
        regs: R,
        max_polls: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            vf_index,
            regs,
            max_polls,
            poll_interval,
        }
    }

    /// The VF index commands are issued for.
    pub const fn vf_index(&self) -> u8 {
        self.vf_index
    }

    /// Borrow the underlying register window.
    pub const fn regs(&self) -> &R {
        &self.regs
    }

    /// Enable the DMA queue.
    pub fn enable(&self) {
        tracing::debug!("vf {}: queue enable", self.vf_index);
        self.regs.write64(regs::VDMA_EN, 1);
    }

    /// Disable the DMA queue.
    pub fn disable(&self) {
        tracing::debug!("vf {}: queue disable", self.vf_index);
        self.regs.write64(regs::VDMA_EN, 0);
    }

    /// Configure the queue with one protocol version.
    ///
    /// Disables the queue, waits for the engine to go idle, clears the
    /// request-queue control, then sends the open command and waits for
    /// the PF's answer. The queue is left disabled; call [`enable`](Self::enable)
    /// once configuration succeeds.
    ///
    /// # Errors
    ///
    /// [`DpiError::DeviceUnresponsive`] if the engine never drains,
    /// [`DpiError::MailboxTimeout`] / [`DpiError::MailboxNack`] from the PF.
    #[allow(clippy::cast_possible_truncation)] // csize is 16 bits on the wire
    pub fn configure(&self, chunk_size: u32, aura: u32, version: ProtocolVersion) -> Result<()> {
        self.disable();
        self.wait_queue_idle()?;
        self.regs.write64(regs::VDMA_REQQ_CTL, 0);

        let csize = version.wire_csize(chunk_size) as u16;
        let msg = Message::queue_open(version.command(), self.vf_index, csize, aura);
        self.mailbox().send(&msg, true)?;

        tracing::info!(
            "vf {}: queue configured ({version:?}, chunk size {chunk_size}, aura {aura:#x})",
            self.vf_index
        );
        Ok(())
    }

    /// Open the queue, preferring v2 and falling back to v1 exactly once.
    ///
    /// Each version is tried with its own contract chunk size. Only a
    /// mailbox timeout or NACK triggers the fallback; anything else (an
    /// unresponsive engine, say) aborts immediately. Returns the version
    /// that succeeded.
    ///
    /// # Errors
    ///
    /// The last attempt's error once the list is exhausted.
    pub fn open_with_fallback(&self, aura: u32) -> Result<ProtocolVersion> {
        for (i, &version) in OPEN_ATTEMPTS.iter().enumerate() {
            match self.configure(version.default_chunk_size(), aura, version) {
                Ok(()) => return Ok(version),
                Err(e @ (DpiError::MailboxTimeout { .. } | DpiError::MailboxNack { .. }))
                    if i + 1 < OPEN_ATTEMPTS.len() =>
                {
                    tracing::warn!(
                        "vf {}: queue open {version:?} refused ({e}), trying fallback",
                        self.vf_index
                    );
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("the final open attempt either returned or errored")
    }

    /// Close the queue on the PF side.
    ///
    /// Waits for the engine to drain, then sends the close command. The
    /// caller is expected to have disabled the queue already; VFIO
    /// teardown proceeds regardless of the result.
    ///
    /// # Errors
    ///
    /// Same classes as [`configure`](Self::configure).
    pub fn close(&self) -> Result<()> {
        self.wait_queue_idle()?;
        self.mailbox().send(&Message::queue_close(self.vf_index), true)?;
        tracing::info!("vf {}: queue closed", self.vf_index);
        Ok(())
    }

    /// Read the whole VDMA register block.
    pub fn registers(&self) -> VdmaRegisters {
        VdmaRegisters {
            en: self.regs.read64(regs::VDMA_EN),
            reqq_ctl: self.regs.read64(regs::VDMA_REQQ_CTL),
            dbell: self.regs.read64(regs::VDMA_DBELL),
            saddr: self.regs.read64(regs::VDMA_SADDR),
            counts: self.regs.read64(regs::VDMA_COUNTS),
            naddr: self.regs.read64(regs::VDMA_NADDR),
            iwbusy: self.regs.read64(regs::VDMA_IWBUSY),
            cnt: self.regs.read64(regs::VDMA_CNT),
        }
    }

    /// Wait for the engine to report the queue idle (SADDR bit 63).
    ///
    /// Bounded by the same poll budget as the mailbox; an engine that
    /// never drains is reported instead of hanging the caller.
    fn wait_queue_idle(&self) -> Result<()> {
        if self.regs.read64(regs::VDMA_SADDR) & saddr::IDLE != 0 {
            return Ok(());
        }
        match poll_until(self.max_polls, self.poll_interval, || {
            (self.regs.read64(regs::VDMA_SADDR) & saddr::IDLE != 0).then_some(())
        }) {
            Some(((), polls)) => {
                tracing::debug!("vf {}: queue idle after {polls} polls", self.vf_index);
                Ok(())
            }
            None => Err(DpiError::DeviceUnresponsive {
                register: "VDMA_SADDR",
                polls: self.max_polls,
            }),
        }
    }

    fn mailbox(&self) -> Mailbox<'_, R> {
        Mailbox::with_timeout(&self.regs, self.max_polls, self.poll_interval)
    }
}
