use serde_json::{Map, Value};

use ingest_core::{ChainRecord, HandlerError, Mapper, MapperContext, NormalizedEvent};

/// Name of the built-in mapper.
pub const RAW_MAPPER: &str = "raw";
/// Event name used by [`RawMapper`] when the handler config has no
/// `eventName`.
pub const RAW_EVENT_NAME: &str = "raw-record";

/// Passes each record through unchanged: the record's own JSON becomes the
/// event attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawMapper;

impl Mapper for RawMapper {
    fn map(
        &self,
        record: &ChainRecord,
        ctx: &MapperContext<'_>,
    ) -> Result<Option<NormalizedEvent>, HandlerError> {
        let block_time = record.block_time().ok_or_else(|| HandlerError::Mapper {
            mapper: RAW_MAPPER.into(),
            message: format!(
                "record {} of block {} has no block time",
                record.tx_hash(),
                record.block_number()
            ),
        })?;
        let name = ctx
            .config
            .get("eventName")
            .and_then(Value::as_str)
            .unwrap_or(RAW_EVENT_NAME);

        let attributes = match serde_json::to_value(record) {
            Ok(Value::Object(map)) => map,
            Ok(other) => Map::from_iter([("record".to_owned(), other)]),
            Err(e) => {
                return Err(HandlerError::Mapper {
                    mapper: RAW_MAPPER.into(),
                    message: e.to_string(),
                })
            }
        };

        Ok(Some(NormalizedEvent {
            name: name.to_owned(),
            chain_id: ctx.chain.id(),
            tx_hash: record.tx_hash().to_owned(),
            block_height: record.block_number(),
            block_time,
            attributes,
        }))
    }
}
