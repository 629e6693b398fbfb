use std::process::ExitCode;

use gphotos_sync::config::{CliCommand, SyncConfig, USAGE, parse_cli};
use gphotos_sync::logging::init_logging;
use gphotos_sync::runner::{RunOptions, Synchronizer};
use tracing::warn;

const PARTIAL_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let options = match parse_cli(std::env::args())? {
        CliCommand::Help => {
            println!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        CliCommand::Run(options) => options,
    };
    init_logging();

    let config = SyncConfig::from_env()?;
    let options = RunOptions {
        include_video: options.include_video || config.include_video,
        ..options
    };
    let synchronizer = Synchronizer::bootstrap(&config).await?;
    let summary = synchronizer.run(&options).await?;
    println!("{summary}");

    if summary.has_failures() {
        warn!(
            failed = summary.download.failed,
            "some items failed to download; re-run to retry them"
        );
        return Ok(ExitCode::from(PARTIAL_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}
