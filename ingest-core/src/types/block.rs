use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

/// How irreversible a queried block must be.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FinalityTag {
    /// Chain head as seen by the provider
    #[default]
    #[serde(alias = "confirmed", alias = "processed")]
    #[strum(to_string = "latest", serialize = "confirmed", serialize = "processed")]
    Latest,
    /// Unlikely to be reorged
    Safe,
    /// Irreversible
    Finalized,
}

impl FinalityTag {
    /// Tag as understood by `eth_getBlockByNumber`.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// An inclusive range of block numbers, slots, checkpoints or rounds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    from: u64,
    to: u64,
}

impl BlockRange {
    /// Create a range; `None` when `from > to`.
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// First block of the range
    pub fn from(&self) -> u64 {
        self.from
    }

    /// Last block of the range
    pub fn to(&self) -> u64 {
        self.to
    }

    /// Number of blocks covered
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Ranges are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `block` is covered by this range
    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    /// Iterate over every block of the range
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        self.from..=self.to
    }
}

impl Display for BlockRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Header data attached to fetched records.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block number, slot, checkpoint sequence number or round
    pub number: u64,
    /// Block hash (or digest)
    pub hash: String,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}
