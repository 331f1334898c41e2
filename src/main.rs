//! bashclaw CLI - entry point only; all logic lives in the library.

use bashclaw::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
