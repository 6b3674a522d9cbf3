//! VF→PF mailbox transport.
//!
//! A software polling protocol over two memory-mapped registers: the VF
//! writes the message words and then watches `MBOX_VF_PF_DATA0` until the
//! PF overwrites it with a response word. Setup-time only — every exchange
//! blocks the calling thread for up to the poll budget.

use std::time::Duration;

use dpi_chip::mbox::{response, Message};
use dpi_chip::proto::MBOX_TIMEOUT_MS;
use dpi_chip::regs;

use crate::error::{DpiError, Result};
use crate::mmio::RegisterIo;

/// Poll `check` once per `interval` until it yields a value, at most
/// `max_polls` times. Returns the value and the number of polls used.
pub(crate) fn poll_until<T>(
    max_polls: u32,
    interval: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> Option<(T, u32)> {
    for i in 0..max_polls {
        std::thread::sleep(interval);
        if let Some(value) = check() {
            return Some((value, i + 1));
        }
    }
    None
}

/// Mailbox transport over one VF's register window.
///
/// The default poll budget matches the PF driver contract: one poll per
/// millisecond, 1000 polls. Tests shrink both through [`Mailbox::with_timeout`].
#[derive(Debug)]
pub struct Mailbox<'r, R: RegisterIo> {
    regs: &'r R,
    max_polls: u32,
    poll_interval: Duration,
}

impl<'r, R: RegisterIo> Mailbox<'r, R> {
    /// Transport with the default 1000 × 1 ms response budget.
    pub fn new(regs: &'r R) -> Self {
        Self::with_timeout(regs, MBOX_TIMEOUT_MS, Duration::from_millis(1))
    }

    /// Transport with a caller-chosen response budget.
    pub const fn with_timeout(regs: &'r R, max_polls: u32, poll_interval: Duration) -> Self {
        Self {
            regs,
            max_polls,
            poll_interval,
        }
    }

    /// Send a message, optionally blocking for the PF's response.
    ///
    /// The primary word is written to `DATA1` first, then the secondary
    /// word to `DATA0`. That order is the wire contract: the PF latches on
    /// the `DATA0` write and responds by overwriting `DATA0`.
    ///
    /// With `expect_response == false` this is fire-and-forget and always
    /// succeeds. Otherwise the response word is returned once it appears.
    ///
    /// # Errors
    ///
    /// [`DpiError::MailboxTimeout`] if the PF never overwrites `DATA0`
    /// within the budget; [`DpiError::MailboxNack`] (carrying the raw word)
    /// if it overwrites it with anything but ACK.
    pub fn send(&self, msg: &Message, expect_response: bool) -> Result<Option<u64>> {
        let words = msg.pack();
        tracing::debug!(
            "mbox send: cmd={:?} vfid={} words=[{:#x}, {:#x}]",
            msg.cmd,
            msg.vfid,
            words[0],
            words[1]
        );

        self.regs.write64(regs::MBOX_VF_PF_DATA1, words[0]);
        self.regs.write64(regs::MBOX_VF_PF_DATA0, words[1]);

        if !expect_response {
            return Ok(None);
        }

        let outcome = poll_until(self.max_polls, self.poll_interval, || {
            let value = self.regs.read64(regs::MBOX_VF_PF_DATA0);
            (value != words[1]).then_some(value)
        });

        match outcome {
            None => Err(DpiError::MailboxTimeout {
                polls: self.max_polls,
            }),
            Some((value, polls)) if value == response::ACK => {
                tracing::debug!("mbox ACK after {polls} polls");
                Ok(Some(value))
            }
            Some((value, _)) => {
                tracing::error!("mbox NACK from PF, response {value:#x}");
                Err(DpiError::MailboxNack { response: value })
            }
        }
    }
}
