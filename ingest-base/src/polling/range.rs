use ingest_core::{BlockRange, SourceConfig};

/// What a polling iteration should do next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NextRange {
    /// Fetch this range
    Fetch(BlockRange),
    /// The chain has not produced the next block yet
    Wait,
    /// The configured `toBlock` has been processed
    Done,
}

/// Whether a job with `cursor` has processed its terminal block.
pub fn reached_to_block(cursor: Option<u64>, config: &SourceConfig) -> bool {
    matches!((cursor, config.to_block), (Some(cursor), Some(to)) if cursor >= to)
}

/// Compute the range to fetch after `cursor` with the chain at `head`.
///
/// The range starts right after the cursor, at `fromBlock` when there is no
/// cursor or when `fromBlock` is ahead of it, and at the head when neither is
/// known. It spans at most `blockBatchSize` blocks and never extends past the
/// head or `toBlock`.
pub fn next_range(cursor: Option<u64>, config: &SourceConfig, head: u64) -> NextRange {
    if reached_to_block(cursor, config) {
        return NextRange::Done;
    }

    let from = match (cursor, config.from_block) {
        (Some(cursor), Some(from_block)) if from_block > cursor => from_block,
        (Some(cursor), _) => match cursor.checked_add(1) {
            Some(from) => from,
            None => return NextRange::Done,
        },
        (None, Some(from_block)) => from_block,
        (None, None) => head,
    };

    if config.to_block.is_some_and(|to_block| from > to_block) {
        return NextRange::Done;
    }
    if from > head {
        return NextRange::Wait;
    }

    let batch = config.batch_size().max(1);
    let mut to = from.saturating_add(batch - 1).min(head);
    if let Some(to_block) = config.to_block {
        to = to.min(to_block);
    }

    BlockRange::new(from, to)
        .map(NextRange::Fetch)
        .unwrap_or(NextRange::Wait)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(from: Option<u64>, to: Option<u64>, batch: u64) -> SourceConfig {
        SourceConfig {
            from_block: from,
            to_block: to,
            block_batch_size: Some(batch),
            ..Default::default()
        }
    }

    fn fetch(from: u64, to: u64) -> NextRange {
        NextRange::Fetch(BlockRange::new(from, to).unwrap())
    }

    #[test]
    fn walks_from_configured_start_to_head() {
        let cfg = config(Some(10), None, 1);
        assert_eq!(next_range(None, &cfg, 11), fetch(10, 10));
        assert_eq!(next_range(Some(10), &cfg, 11), fetch(11, 11));
        assert_eq!(next_range(Some(11), &cfg, 11), NextRange::Wait);
    }

    #[test]
    fn starts_at_head_without_cursor_or_from_block() {
        let cfg = config(None, None, 100);
        assert_eq!(next_range(None, &cfg, 500), fetch(500, 500));
    }

    #[test]
    fn from_block_ahead_of_cursor_skips_ahead() {
        let cfg = config(Some(1_000), None, 10);
        assert_eq!(next_range(Some(50), &cfg, 2_000), fetch(1_000, 1_009));
        // a from block behind the cursor is ignored
        let cfg = config(Some(10), None, 10);
        assert_eq!(next_range(Some(50), &cfg, 2_000), fetch(51, 60));
    }

    #[test]
    fn clamps_to_head_and_to_block() {
        let cfg = config(Some(1), Some(30), 100);
        assert_eq!(next_range(None, &cfg, 20), fetch(1, 20));
        assert_eq!(next_range(Some(20), &cfg, 50), fetch(21, 30));
        assert_eq!(next_range(Some(30), &cfg, 50), NextRange::Done);
        assert_eq!(next_range(Some(31), &cfg, 50), NextRange::Done);
    }

    #[test]
    fn ranges_are_contiguous_and_valid() {
        let cfg = config(Some(0), None, 7);
        let mut cursor = None;
        let mut head = 3;
        for _ in 0..50 {
            match next_range(cursor, &cfg, head) {
                NextRange::Fetch(range) => {
                    assert!(range.from() <= range.to());
                    if let Some(cursor) = cursor {
                        assert_eq!(range.from(), cursor + 1);
                    }
                    assert!(range.to() <= head);
                    cursor = Some(range.to());
                }
                NextRange::Wait => head += 5,
                NextRange::Done => unreachable!(),
            }
        }
    }

    #[test]
    fn zero_batch_size_fetches_one_block() {
        let cfg = config(Some(5), None, 0);
        assert_eq!(next_range(None, &cfg, 9), fetch(5, 5));
    }
}
