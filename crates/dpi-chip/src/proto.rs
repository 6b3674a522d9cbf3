//! Protocol constants shared by both queue-open versions.
//!
//! The command buffer is a chain of fixed-size chunks the engine fetches
//! descriptors from. v1 and v2 of the open command express the chunk size in
//! different units (raw words vs 8-byte words) and use different buffer
//! sizes; both sets of constants come from the PF driver contract.

/// Command-buffer size for a v1 `QueueOpen`, passed on the wire as-is.
pub const QUEUE_BUF_SIZE_V1: u32 = 16256;

/// Command-buffer size for a v2 `QueueOpenV2`, passed on the wire divided
/// by 8 (the v2 csize field counts 8-byte words).
pub const QUEUE_BUF_SIZE_V2: u32 = 130_944;

/// Header length of a single DMA command, in 8-byte words.
pub const CMD_HDR_LEN: u32 = 4;

/// Maximum scatter/gather pointers per transfer direction.
pub const MAX_POINTERS: u32 = 15;

/// Length in 8-byte words of a command moving `src` source and `dst`
/// destination pointers.
#[must_use]
pub const fn cmd_len(src: u32, dst: u32) -> u32 {
    CMD_HDR_LEN + (src << 1) + (dst << 1)
}

/// Largest possible single command, in 8-byte words.
pub const MAX_CMD_LEN: u32 = cmd_len(MAX_POINTERS, MAX_POINTERS);

/// Maximum number of VFs the engine exposes.
pub const MAX_VFS: u8 = 32;

/// Number of DMA engines behind the PF.
pub const ENGINE_COUNT: usize = 6;

/// Default mailbox response budget: polls once per millisecond.
pub const MBOX_TIMEOUT_MS: u32 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_csize_fits_the_16_bit_field() {
        assert!(QUEUE_BUF_SIZE_V2 / 8 <= u32::from(u16::MAX));
        assert_eq!(QUEUE_BUF_SIZE_V2 / 8, 16368);
    }

    #[test]
    fn max_cmd_len() {
        assert_eq!(MAX_CMD_LEN, 64);
    }
}
