//! VF→PF mailbox wire format.
//!
//! A mailbox message is two little-endian 64-bit words, bit-packed LSB
//! first. The primary word carries the VF index, the command code, the
//! command-buffer size and the aura; the secondary word carries the
//! peer-subsystem function identifiers and the completion-status fields.
//!
//! ```text
//! word 0 (primary)     word 1 (secondary)
//! [ 0: 8)  vfid        [ 0:16)  npa_pf_func
//! [ 8:12)  cmd         [16:17)  wqecs
//! [12:28)  csize       [17:24)  wqecsoff
//! [28:48)  aura        [24:64)  reserved
//! [48:64)  sso_pf_func
//! ```
//!
//! Packing and unpacking are explicit shift/mask arithmetic so the wire
//! layout is visible at the point of definition rather than hidden behind
//! overlapping storage. The layout must match the PF driver bit for bit.

/// Mailbox command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Open a DMA queue (protocol v1, csize in raw words).
    QueueOpen = 1,
    /// Close the DMA queue.
    QueueClose = 2,
    /// Ask the PF to dump the VF's registers to the kernel log.
    RegDump = 3,
    /// Ask the PF for the engine register configuration.
    GetRegCfg = 4,
    /// Open a DMA queue (protocol v2, csize in 8-byte words).
    QueueOpenV2 = 5,
}

impl Command {
    /// Decode a wire command code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::QueueOpen),
            2 => Some(Self::QueueClose),
            3 => Some(Self::RegDump),
            4 => Some(Self::GetRegCfg),
            5 => Some(Self::QueueOpenV2),
            _ => None,
        }
    }
}

/// PF response words, read back from `MBOX_VF_PF_DATA0`.
pub mod response {
    /// Command accepted.
    pub const ACK: u64 = 1;
    /// Command rejected. The PF is only required to overwrite the data
    /// register with *something* other than what was written; any non-ACK
    /// value is treated as a rejection.
    pub const NACK: u64 = 2;
}

/// One VF→PF mailbox message.
///
/// Fields the lifecycle never populates (`sso_pf_func`, `npa_pf_func`,
/// `wqecs`, `wqecsoff`) default to zero; the PF fills in the peer-subsystem
/// wiring on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// VF index the command applies to.
    pub vfid: u8,
    /// Command code.
    pub cmd: Command,
    /// Command-buffer size. Raw words for [`Command::QueueOpen`], 8-byte
    /// words for [`Command::QueueOpenV2`].
    pub csize: u16,
    /// Aura (memory-pool handle) backing the command buffer. 20 bits.
    pub aura: u32,
    /// SSO PF function identifier. Always zero from this side.
    pub sso_pf_func: u16,
    /// NPA PF function identifier. Always zero from this side.
    pub npa_pf_func: u16,
    /// Completion-status enable for the WQE queue.
    pub wqecs: bool,
    /// Completion-status offset within the WQE queue. 7 bits.
    pub wqecsoff: u8,
}

const VFID_SHIFT: u32 = 0;
const CMD_SHIFT: u32 = 8;
const CSIZE_SHIFT: u32 = 12;
const AURA_SHIFT: u32 = 28;
const SSO_SHIFT: u32 = 48;

const NPA_SHIFT: u32 = 0;
const WQECS_SHIFT: u32 = 16;
const WQECSOFF_SHIFT: u32 = 17;

const AURA_MASK: u64 = (1 << 20) - 1;
const WQECSOFF_MASK: u64 = (1 << 7) - 1;

impl Message {
    /// Queue-open message for the given protocol version's command code.
    #[must_use]
    pub const fn queue_open(cmd: Command, vfid: u8, csize: u16, aura: u32) -> Self {
        Self {
            vfid,
            cmd,
            csize,
            aura,
            sso_pf_func: 0,
            npa_pf_func: 0,
            wqecs: false,
            wqecsoff: 0,
        }
    }

    /// Queue-close message.
    #[must_use]
    pub const fn queue_close(vfid: u8) -> Self {
        Self::queue_open(Command::QueueClose, vfid, 0, 0)
    }

    /// Pack into the two wire words. Word 0 is the primary (command) word.
    #[must_use]
    pub fn pack(&self) -> [u64; 2] {
        let word0 = (u64::from(self.vfid) << VFID_SHIFT)
            | (u64::from(self.cmd as u8) << CMD_SHIFT)
            | (u64::from(self.csize) << CSIZE_SHIFT)
            | ((u64::from(self.aura) & AURA_MASK) << AURA_SHIFT)
            | (u64::from(self.sso_pf_func) << SSO_SHIFT);
        let word1 = (u64::from(self.npa_pf_func) << NPA_SHIFT)
            | (u64::from(self.wqecs) << WQECS_SHIFT)
            | ((u64::from(self.wqecsoff) & WQECSOFF_MASK) << WQECSOFF_SHIFT);
        [word0, word1]
    }

    /// Unpack from the two wire words. `None` if the command code is not
    /// one the protocol defines.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // fields are masked to width
    pub fn unpack(words: [u64; 2]) -> Option<Self> {
        let cmd = Command::from_code(((words[0] >> CMD_SHIFT) & 0xF) as u8)?;
        Some(Self {
            vfid: (words[0] >> VFID_SHIFT) as u8,
            cmd,
            csize: (words[0] >> CSIZE_SHIFT) as u16,
            aura: ((words[0] >> AURA_SHIFT) & AURA_MASK) as u32,
            sso_pf_func: (words[0] >> SSO_SHIFT) as u16,
            npa_pf_func: (words[1] >> NPA_SHIFT) as u16,
            wqecs: (words[1] >> WQECS_SHIFT) & 1 == 1,
            wqecsoff: ((words[1] >> WQECSOFF_SHIFT) & WQECSOFF_MASK) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_v1_wire_words() {
        let msg = Message::queue_open(Command::QueueOpen, 0, 16256, 0);
        let words = msg.pack();
        // vfid=0, cmd=1 at bit 8, csize=0x3f80 at bit 12, rest zero.
        assert_eq!(words[0], (1 << 8) | (0x3f80 << 12));
        assert_eq!(words[1], 0);
    }

    #[test]
    fn open_v2_wire_words() {
        let msg = Message::queue_open(Command::QueueOpenV2, 3, 16368, 0xABC);
        let words = msg.pack();
        assert_eq!(words[0] & 0xFF, 3);
        assert_eq!((words[0] >> 8) & 0xF, 5);
        assert_eq!((words[0] >> 12) & 0xFFFF, 16368);
        assert_eq!((words[0] >> 28) & 0xF_FFFF, 0xABC);
        assert_eq!(words[1], 0);
    }

    #[test]
    fn close_wire_words() {
        let words = Message::queue_close(7).pack();
        assert_eq!(words[0], 7 | (2 << 8));
        assert_eq!(words[1], 0);
    }

    #[test]
    fn aura_is_masked_to_20_bits() {
        let msg = Message::queue_open(Command::QueueOpen, 0, 0, 0xFFF_FFFF);
        let words = msg.pack();
        assert_eq!((words[0] >> 28) & 0xF_FFFF, 0xF_FFFF);
        // Nothing may leak into the sso_pf_func field above the aura.
        assert_eq!(words[0] >> 48, 0);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let msg = Message {
            vfid: 31,
            cmd: Command::QueueOpenV2,
            csize: 16368,
            aura: 0x12345,
            sso_pf_func: 0,
            npa_pf_func: 0,
            wqecs: true,
            wqecsoff: 0x55,
        };
        assert_eq!(Message::unpack(msg.pack()), Some(msg));
    }

    #[test]
    fn unpack_rejects_unknown_command() {
        assert_eq!(Message::unpack([9 << 8, 0]), None);
        assert_eq!(Message::unpack([0, 0]), None);
    }

    #[test]
    fn command_codes() {
        assert_eq!(Command::QueueOpen as u8, 1);
        assert_eq!(Command::QueueClose as u8, 2);
        assert_eq!(Command::RegDump as u8, 3);
        assert_eq!(Command::GetRegCfg as u8, 4);
        assert_eq!(Command::QueueOpenV2 as u8, 5);
    }
}
