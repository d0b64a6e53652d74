use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{deserialize_u64_from_str_or_int, serialize_u64_as_string};

/// The last block, slot, checkpoint or round a job has fully processed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCursor {
    #[serde(
        alias = "lastSlot",
        alias = "lastCheckpoint",
        alias = "lastRound",
        serialize_with = "serialize_u64_as_string",
        deserialize_with = "deserialize_u64_from_str_or_int"
    )]
    pub last_block: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PollCursor {
    pub fn new(last_block: u64) -> Self {
        Self {
            last_block,
            updated_at: Utc::now(),
        }
    }
}
