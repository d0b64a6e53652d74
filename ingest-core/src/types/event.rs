use serde::{Deserialize, Serialize};

use crate::utils::{deserialize_u64_from_str_or_int, serialize_u64_as_string};

/// The canonical event shape handed to targets.
///
/// Heights are written as decimal strings; block time is unix seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub name: String,
    pub chain_id: u16,
    pub tx_hash: String,
    #[serde(
        serialize_with = "serialize_u64_as_string",
        deserialize_with = "deserialize_u64_from_str_or_int"
    )]
    pub block_height: u64,
    pub block_time: u64,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedEvent {
    /// Serialize for a sink.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn block_height_is_written_as_string() {
        let event = sample_event();
        let value = event.to_json().unwrap();
        assert_eq!(value["blockHeight"], json!("18446744073709551615"));
        assert_eq!(value["chainId"], json!(2));

        let back: NormalizedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent {
            name: "transfer-redeemed".into(),
            chain_id: 2,
            tx_hash: "0xabc".into(),
            block_height: u64::MAX,
            block_time: 1_700_000_000,
            attributes: Default::default(),
        }
    }
}
