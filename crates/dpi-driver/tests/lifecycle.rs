//! Protocol tests against a simulated register file.
//!
//! The mailbox transport and the queue lifecycle are generic over
//! `RegisterIo`, so every protocol path — ack, nack, timeout, version
//! fallback, idle-wait — runs here without hardware. The `#[ignore]`d
//! tests at the bottom need a real DPI VF bound to vfio-pci.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use dpi_chip::mbox::{response, Command, Message};
use dpi_chip::regs::{self, saddr};
use dpi_driver::{DpiError, DpiVf, Mailbox, ProtocolVersion, RegisterIo};

/// Simulated VF register window.
///
/// Reads of `MBOX_VF_PF_DATA0` pop a scripted response word when one is
/// queued; everything else behaves like plain backing memory.
#[derive(Default)]
struct FakeRegs {
    mem: RefCell<HashMap<usize, u64>>,
    writes: RefCell<Vec<(usize, u64)>>,
    responses: RefCell<VecDeque<u64>>,
    data0_reads: Cell<u32>,
}

impl FakeRegs {
    fn idle() -> Self {
        let fake = Self::default();
        fake.mem.borrow_mut().insert(regs::VDMA_SADDR, saddr::IDLE);
        fake
    }

    fn respond(self, words: &[u64]) -> Self {
        self.responses.borrow_mut().extend(words);
        self
    }

    fn writes_to(&self, offset: usize) -> Vec<u64> {
        self.writes
            .borrow()
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Decode the messages sent so far, pairing each DATA1 (primary)
    /// write with its DATA0 (secondary) write.
    fn sent_messages(&self) -> Vec<Message> {
        let primaries = self.writes_to(regs::MBOX_VF_PF_DATA1);
        let secondaries = self.writes_to(regs::MBOX_VF_PF_DATA0);
        assert_eq!(primaries.len(), secondaries.len());
        primaries
            .into_iter()
            .zip(secondaries)
            .map(|(w0, w1)| Message::unpack([w0, w1]).expect("sent an undecodable message"))
            .collect()
    }
}

impl RegisterIo for FakeRegs {
    fn read64(&self, offset: usize) -> u64 {
        if offset == regs::MBOX_VF_PF_DATA0 {
            self.data0_reads.set(self.data0_reads.get() + 1);
            if let Some(scripted) = self.responses.borrow_mut().pop_front() {
                return scripted;
            }
        }
        self.mem.borrow().get(&offset).copied().unwrap_or(0)
    }

    fn write64(&self, offset: usize, value: u64) {
        self.writes.borrow_mut().push((offset, value));
        self.mem.borrow_mut().insert(offset, value);
    }
}

fn mailbox(fake: &FakeRegs) -> Mailbox<'_, FakeRegs> {
    Mailbox::with_timeout(fake, 3, Duration::ZERO)
}

fn vf(fake: FakeRegs) -> DpiVf<FakeRegs> {
    DpiVf::with_timeout(0, fake, 3, Duration::ZERO)
}

// ── mailbox transport ────────────────────────────────────────────────────────

#[test]
fn fire_and_forget_never_polls() {
    let fake = FakeRegs::default();
    let out = mailbox(&fake).send(&Message::queue_close(4), false).unwrap();
    assert_eq!(out, None);
    assert_eq!(fake.data0_reads.get(), 0);
}

#[test]
fn send_writes_data1_before_data0() {
    let fake = FakeRegs::default();
    let msg = Message::queue_open(Command::QueueOpen, 2, 100, 7);
    mailbox(&fake).send(&msg, false).unwrap();

    let words = msg.pack();
    assert_eq!(
        *fake.writes.borrow(),
        vec![
            (regs::MBOX_VF_PF_DATA1, words[0]),
            (regs::MBOX_VF_PF_DATA0, words[1]),
        ]
    );
}

#[test]
fn ack_on_last_allowed_poll_succeeds() {
    // Two polls see the word unchanged, the third sees the ACK.
    let fake = FakeRegs::default().respond(&[0, 0, response::ACK]);
    let out = mailbox(&fake).send(&Message::queue_close(0), true).unwrap();
    assert_eq!(out, Some(response::ACK));
    assert_eq!(fake.data0_reads.get(), 3);
}

#[test]
fn non_ack_response_is_a_nack_with_the_raw_word() {
    let fake = FakeRegs::default().respond(&[0xdead]);
    let err = mailbox(&fake)
        .send(&Message::queue_close(0), true)
        .unwrap_err();
    assert!(matches!(err, DpiError::MailboxNack { response: 0xdead }));
}

#[test]
fn unchanged_register_times_out() {
    let fake = FakeRegs::default();
    let err = mailbox(&fake)
        .send(&Message::queue_close(0), true)
        .unwrap_err();
    assert!(matches!(err, DpiError::MailboxTimeout { polls: 3 }));
    assert_eq!(fake.data0_reads.get(), 3);
}

// ── queue lifecycle ──────────────────────────────────────────────────────────

#[test]
fn enable_and_disable_write_the_enable_register() {
    let vf = vf(FakeRegs::idle());
    vf.enable();
    vf.disable();
    assert_eq!(vf.regs().writes_to(regs::VDMA_EN), vec![1, 0]);
}

#[test]
fn configure_v1_sends_the_raw_chunk_size() {
    let vf = vf(FakeRegs::idle().respond(&[response::ACK]));
    vf.configure(16256, 0, ProtocolVersion::V1).unwrap();

    let sent = vf.regs().sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd, Command::QueueOpen);
    assert_eq!(sent[0].csize, 16256);
}

#[test]
fn configure_v2_sends_the_chunk_size_in_8_byte_words() {
    let vf = vf(FakeRegs::idle().respond(&[response::ACK]));
    vf.configure(130_944, 0x123, ProtocolVersion::V2).unwrap();

    let sent = vf.regs().sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd, Command::QueueOpenV2);
    assert_eq!(sent[0].csize, 16368);
    assert_eq!(sent[0].aura, 0x123);
}

#[test]
fn configure_disables_and_clears_reqq_ctl_before_opening() {
    let vf = vf(FakeRegs::idle().respond(&[response::ACK]));
    vf.configure(16256, 0, ProtocolVersion::V1).unwrap();

    assert_eq!(vf.regs().writes_to(regs::VDMA_EN), vec![0]);
    assert_eq!(vf.regs().writes_to(regs::VDMA_REQQ_CTL), vec![0]);

    // The disable and control clear must precede the mailbox write.
    let writes = vf.regs().writes.borrow();
    let first_mbox = writes
        .iter()
        .position(|(o, _)| *o == regs::MBOX_VF_PF_DATA1)
        .unwrap();
    let reqq = writes
        .iter()
        .position(|(o, _)| *o == regs::VDMA_REQQ_CTL)
        .unwrap();
    assert!(reqq < first_mbox);
}

#[test]
fn busy_engine_reports_unresponsive_without_touching_the_mailbox() {
    // SADDR never shows the idle bit.
    let vf = vf(FakeRegs::default());
    let err = vf.configure(16256, 0, ProtocolVersion::V1).unwrap_err();
    assert!(matches!(
        err,
        DpiError::DeviceUnresponsive {
            register: "VDMA_SADDR",
            polls: 3,
        }
    ));
    assert!(vf.regs().writes_to(regs::MBOX_VF_PF_DATA1).is_empty());
}

#[test]
fn open_fallback_tries_v1_after_a_v2_nack() {
    let vf = vf(FakeRegs::idle().respond(&[response::NACK, response::ACK]));
    let version = vf.open_with_fallback(0).unwrap();
    assert_eq!(version, ProtocolVersion::V1);

    let sent = vf.regs().sent_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].cmd, Command::QueueOpenV2);
    assert_eq!(sent[0].csize, 16368);
    assert_eq!(sent[1].cmd, Command::QueueOpen);
    assert_eq!(sent[1].csize, 16256);
}

#[test]
fn open_fallback_stops_at_a_v2_ack() {
    let vf = vf(FakeRegs::idle().respond(&[response::ACK]));
    let version = vf.open_with_fallback(0).unwrap();
    assert_eq!(version, ProtocolVersion::V2);

    let sent = vf.regs().sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd, Command::QueueOpenV2);
}

#[test]
fn open_fallback_surfaces_the_final_failure() {
    let vf = vf(FakeRegs::idle().respond(&[response::NACK, 0xbad]));
    let err = vf.open_with_fallback(0).unwrap_err();
    assert!(matches!(err, DpiError::MailboxNack { response: 0xbad }));
    assert_eq!(vf.regs().sent_messages().len(), 2);
}

#[test]
fn close_waits_for_idle_then_sends_the_close_command() {
    let vf = vf(FakeRegs::idle().respond(&[response::ACK]));
    vf.close().unwrap();

    let sent = vf.regs().sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], Message::queue_close(0));
}

#[test]
fn messages_carry_the_vf_index() {
    let vf = DpiVf::with_timeout(
        17,
        FakeRegs::idle().respond(&[response::ACK]),
        3,
        Duration::ZERO,
    );
    vf.configure(16256, 0, ProtocolVersion::V1).unwrap();
    assert_eq!(vf.regs().sent_messages()[0].vfid, 17);
}

// ── hardware ─────────────────────────────────────────────────────────────────

#[test]
#[ignore] // requires a DPI VF bound to vfio-pci, run as root
fn hardware_end_to_end() {
    use dpi_chip::addr::PciAddress;
    use dpi_driver::VfioDevice;

    let vfs = dpi_driver::enumerate_vfs().expect("sysfs scan");
    let info = vfs.first().expect("no DPI VFs on this system");
    let address: PciAddress = info.pcie_address.parse().expect("sysfs address parses");

    let vfio = VfioDevice::bind(&address).expect("vfio bind");
    let vf = DpiVf::attach(&vfio).expect("bar map");

    let version = vf.open_with_fallback(0).expect("queue open");
    println!("queue opened via {version:?}");
    vf.enable();

    println!("{:x?}", vf.registers());

    vf.disable();
    vf.close().expect("queue close");
}
