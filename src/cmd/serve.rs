//! Session server command: `conductor serve`.

use anyhow::Result;

use conductor::config::Config;
use conductor::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: Config, dev: bool) -> Result<()> {
    // Fail at startup rather than on the first session
    config.require_endpoint()?;

    start_server(
        ServerConfig {
            port: config.port,
            dev_mode: dev,
        },
        config,
    )
    .await
}
