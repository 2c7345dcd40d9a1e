//! Range calculator: decides which `[from, to]` block range the next
//! emitter cycle scans.
//!
//! Pure functions only: no network or storage access happens here.
//!
//! Three policies, in precedence order:
//! 1. **First run**: look back `scan_width * retries` blocks behind the
//!    checkpoint, because nothing is known about recent history.
//! 2. **Reorging**: the previous `from` block was itself reorged; walk
//!    `from` back by one scan width while keeping the forward edge.
//! 3. **Normal**: re-scan one width behind the checkpoint and advance up to
//!    one width past it.

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;
use crate::types::EmitterStatus;

/// Static inputs of the range calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeParams {
    /// Lowest block ever scanned.
    pub start_block: u64,
    /// Blocks covered by one cycle. Must be at least 1.
    pub scan_width: u64,
    /// How many times `from` may walk back while a reorg is unresolved.
    pub max_retries: u64,
}

/// Compute the next `(from_block, to_block)` to scan.
///
/// `last_checkpoint == None` means nothing was ever persisted; scanning then
/// starts at `start_block`. The result always satisfies
/// `start_block <= from <= to <= current_height`.
pub fn compute_range(
    status: &EmitterStatus,
    current_height: u64,
    last_checkpoint: Option<u64>,
    params: &RangeParams,
) -> Result<(u64, u64), WatcherError> {
    let start = params.start_block;
    let width = params.scan_width.max(1);

    if current_height < start {
        return Err(WatcherError::Other(format!(
            "chain height {current_height} is below start block {start}"
        )));
    }

    let next = last_checkpoint
        .map_or(start, |cp| cp.saturating_add(1))
        .max(start);

    if status.is_first_run {
        let go_back = width.saturating_mul(status.retries_count);
        let from = next.saturating_sub(go_back).max(start).min(current_height);
        let to = from.saturating_add(width - 1).min(current_height);
        return Ok((from, to));
    }

    if status.is_reorging {
        if status.retries_count > params.max_retries {
            return Err(WatcherError::MaxRetriesReached {
                from_block: status.from_block,
                to_block: status.to_block,
                retries: status.retries_count,
            });
        }
        let to = status.to_block.min(current_height).max(start);
        let from = status.from_block.saturating_sub(width).max(start).min(to);
        return Ok((from, to));
    }

    let to = next.saturating_add(width - 1).min(current_height);
    let from = next.min(current_height).saturating_sub(width).max(start);
    Ok((from, to))
}
