use ingest_core::{BlockInfo, RawLog, RawTransaction};

/// A header whose hash is derived from its number.
pub fn block(number: u64, timestamp: u64) -> BlockInfo {
    BlockInfo {
        number,
        hash: block_hash(number),
        timestamp,
    }
}

/// Hash used by [`block`] and [`log_at`] for `number`.
pub fn block_hash(number: u64) -> String {
    format!("0x{number:064x}")
}

/// A log emitted in block `number` without a timestamp.
pub fn log_at(number: u64, log_index: u64) -> RawLog {
    RawLog {
        address: "0x3ee18b2214aff97000d974cf647e7c347e8fa585".into(),
        topics: vec![
            "0x6eb224fb001ed210e379b335e35efe88672a8ce935d981a6896b27ffdf52a3b2".into(),
        ],
        data: "0x".into(),
        block_number: number,
        block_hash: block_hash(number),
        transaction_hash: format!("0x{:064x}", number * 1_000 + log_index),
        transaction_index: 0,
        log_index,
        block_time: None,
    }
}

/// A transaction in block `number` without a block hash or timestamp.
pub fn transaction_at(number: u64, hash: &str) -> RawTransaction {
    RawTransaction {
        hash: hash.into(),
        block_number: number,
        block_hash: None,
        block_time: None,
        sender: None,
        payload: serde_json::json!({ "hash": hash }),
    }
}
