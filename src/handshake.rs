//! A producer/consumer convention over a block of the target's memory:
//!
//! ```text
//! | start marker (4) | control word (4) | payload ...          | end marker (4) |
//! ```
//!
//! A control word of 0 means the producer may write; nonzero means the consumer owns the payload.
//! Only the producer side is implemented here, and the consumer is trusted to reset the control word.

use log::{debug, info};

use crate::search::SearchMode;
use crate::target::Process;
use crate::value::Buffer;
use crate::MemEditResult;

/// Offset of the control word from the start marker.
const CONTROL_OFFSET: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub start_marker: u32,
    pub end_marker: u32,
    /// Bytes between the start marker and the payload.
    pub header_len: usize,
    /// Written into the control word after a payload has been delivered.
    pub release_flag: u8,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            start_marker: 1_234_567_890,
            end_marker: 987_654_321,
            header_len: 8,
            release_flag: 128,
        }
    }
}

/// A block found in a target process, from its start marker to its end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedBlock {
    pub start: usize,
    pub end: usize,
}

impl SharedBlock {
    pub fn payload_start(&self, config: &HandshakeConfig) -> usize {
        self.start + config.header_len
    }

    /// Number of payload bytes that fit before the end marker.
    pub fn capacity(&self, config: &HandshakeConfig) -> usize {
        self.end.saturating_sub(self.payload_start(config))
    }
}

/// Locates marker-delimited blocks in the writable memory of `process`.
///
/// Start and end markers are paired in address order. If their counts differ the pairing is
/// ambiguous and nothing is returned. Pairs too close together to hold a header are dropped.
pub fn scan_shared_blocks<P: Process>(
    process: &P,
    config: &HandshakeConfig,
) -> MemEditResult<Vec<SharedBlock>> {
    let starts = process.search_all_memory(
        &Buffer::from_value(config.start_marker),
        true,
        SearchMode::Verbatim,
    )?;
    if starts.is_empty() {
        return Ok(Vec::new());
    }
    debug!("pid {}: start markers at {:x?}", process.pid(), starts);

    let ends = process.search_all_memory(
        &Buffer::from_value(config.end_marker),
        true,
        SearchMode::Verbatim,
    )?;
    debug!("pid {}: end markers at {:x?}", process.pid(), ends);

    if starts.len() != ends.len() {
        info!(
            "pid {}: {} start markers but {} end markers, skipping",
            process.pid(),
            starts.len(),
            ends.len()
        );
        return Ok(Vec::new());
    }

    Ok(starts
        .into_iter()
        .zip(ends)
        .map(|(start, end)| SharedBlock { start, end })
        .filter(|block| {
            let large_enough = block.end > block.start + config.header_len;
            if !large_enough {
                info!("Block at {:#x} is too small to be shared", block.start);
            }
            large_enough
        })
        .collect())
}

/// Hands `payload` to the consumer if it is the producer's turn and the payload fits.
///
/// Returns `Ok(false)` without writing anything when the consumer still owns the block.
pub fn write_frame<P: Process>(
    process: &P,
    block: &SharedBlock,
    payload: &[u8],
    config: &HandshakeConfig,
) -> MemEditResult<bool> {
    let control: u32 = process.read_value(block.start + CONTROL_OFFSET)?;
    if control != 0 || payload.len() > block.capacity(config) {
        return Ok(false);
    }

    process.write_bytes(block.payload_start(config), payload)?;
    process.write_value(block.start + CONTROL_OFFSET, config.release_flag)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::fake::{self, FakeProcess};

    fn place_block<P: Process>(process: &P, start: usize, end: usize) -> MemEditResult<()> {
        let config = HandshakeConfig::default();
        process.write_value(start, config.start_marker)?;
        process.write_value(end, config.end_marker)
    }

    #[test]
    fn finds_and_fills_block() {
        let pid = fake::spawn(vec![fake::segment(0x1000, 0x100, true)]);
        let config = HandshakeConfig::default();

        FakeProcess::with_open(pid, |process| {
            place_block(process, 0x1010, 0x1040)?;

            let blocks = scan_shared_blocks(process, &config)?;
            assert_eq!(blocks, vec![SharedBlock { start: 0x1010, end: 0x1040 }]);
            let block = blocks[0];
            assert_eq!(block.capacity(&config), 0x28);

            let payload = [0x81u8; 0x20];
            assert!(write_frame(process, &block, &payload, &config)?);
            let mut written = [0u8; 0x20];
            process.read_bytes(0x1018, &mut written)?;
            assert_eq!(written, payload);
            assert_eq!(process.read_value::<u8>(0x1014)?, 128);

            // The consumer hasn't reset the control word yet.
            assert!(!write_frame(process, &block, &[1, 2, 3], &config)?);
            assert_eq!(process.read_value::<u8>(0x1018)?, 0x81);

            process.write_value(0x1014, 0u32)?;
            assert!(!write_frame(process, &block, &[0u8; 0x29], &config)?);
            assert!(write_frame(process, &block, &[0u8; 0x28], &config)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn mismatched_marker_counts_yield_nothing() {
        let pid = fake::spawn(vec![fake::segment(0x1000, 0x100, true)]);
        let config = HandshakeConfig::default();

        FakeProcess::with_open(pid, |process| {
            place_block(process, 0x1000, 0x1040)?;
            process.write_value(0x1080, config.start_marker)?;
            assert!(scan_shared_blocks(process, &config)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn drops_blocks_without_room_for_a_header() {
        let pid = fake::spawn(vec![fake::segment(0x1000, 0x100, true)]);
        let config = HandshakeConfig::default();

        FakeProcess::with_open(pid, |process| {
            place_block(process, 0x1000, 0x1008)?;
            place_block(process, 0x1020, 0x1060)?;
            assert_eq!(
                scan_shared_blocks(process, &config)?,
                vec![SharedBlock { start: 0x1020, end: 0x1060 }]
            );
            Ok(())
        })
        .unwrap();
    }
}
