use anyhow::Result;

use workbench::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli().await
}
