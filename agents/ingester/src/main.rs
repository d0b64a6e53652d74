//! The ingester polls the configured chains and hands every fetched range to
//! the handlers of its jobs, committing a cursor per job once all handlers
//! succeeded.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use ingest_base::agent_main;

use crate::ingester::Ingester;

mod ingester;
mod jobs;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Logging is not initialised at this point, so, using `println!`
    println!("Ingester starting up...");

    agent_main::<Ingester>().await
}
