use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::runner::RunOptions;

const DEFAULT_ROOT_DIR: &str = "Pictures/gphotos";
const INDEX_DB_NAME: &str = "gphotos.sqlite";
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_INDEX_BATCH: u64 = 1000;
const DEFAULT_DOWNLOAD_CONCURRENCY: u64 = 1;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BACKOFF_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub root: PathBuf,
    pub index_db: PathBuf,
    pub token_file: PathBuf,
    pub static_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base_url: Option<String>,
    pub oauth_base_url: Option<String>,
    pub page_size: u32,
    pub index_batch: usize,
    pub download_concurrency: usize,
    pub max_retries: u32,
    pub backoff: Duration,
    pub include_video: bool,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let root = std::env::var("GPHOTOS_ROOT")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_ROOT_DIR));
        let index_db = std::env::var("GPHOTOS_INDEX_DB")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| root.join(INDEX_DB_NAME));
        let token_file = std::env::var("GPHOTOS_TOKEN_FILE")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| default_token_file(&home));

        Ok(Self {
            root,
            index_db,
            token_file,
            static_token: read_string_env("GPHOTOS_TOKEN"),
            client_id: read_string_env("GPHOTOS_CLIENT_ID"),
            client_secret: read_string_env("GPHOTOS_CLIENT_SECRET"),
            api_base_url: read_string_env("GPHOTOS_API_BASE_URL"),
            oauth_base_url: read_string_env("GPHOTOS_OAUTH_BASE_URL"),
            page_size: u32::try_from(read_u64_env("GPHOTOS_PAGE_SIZE", DEFAULT_PAGE_SIZE))
                .unwrap_or(u32::MAX),
            index_batch: read_u64_env("GPHOTOS_INDEX_BATCH", DEFAULT_INDEX_BATCH) as usize,
            download_concurrency: read_u64_env(
                "GPHOTOS_DOWNLOAD_CONCURRENCY",
                DEFAULT_DOWNLOAD_CONCURRENCY,
            ) as usize,
            max_retries: read_env("GPHOTOS_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
            backoff: Duration::from_secs(read_u64_env("GPHOTOS_BACKOFF_SECS", DEFAULT_BACKOFF_SECS)),
            include_video: read_bool_env("GPHOTOS_INCLUDE_VIDEO", false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Run(RunOptions),
    Help,
}

pub const USAGE: &str = "\
Usage: gphotos-sync [OPTIONS]
  --start-date YYYY-MM-DD  Only items modified on or after this day (UTC)
  --end-date YYYY-MM-DD    Only items modified on or before this day (UTC)
  --include-video          Index and download videos as well as photos
  --skip-index             Do not scan the remote catalog
  --skip-download          Do not download pending items
  --flush-index            Forget every indexed item before running
  --remove-untracked       Delete local files the index does not know
  -h, --help               Show this help";

pub fn parse_cli<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut options = RunOptions::default();
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--start-date" => {
                let value = args.next().context("--start-date needs a value")?;
                options.start_date = Some(parse_date(&value)?);
            }
            "--end-date" => {
                let value = args.next().context("--end-date needs a value")?;
                options.end_date = Some(parse_date(&value)?);
            }
            "--include-video" => options.include_video = true,
            "--skip-index" => options.skip_index = true,
            "--skip-download" => options.skip_download = true,
            "--flush-index" => options.flush_index = true,
            "--remove-untracked" => options.remove_untracked = true,
            "--help" | "-h" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    if let (Some(start), Some(end)) = (options.start_date, options.end_date) {
        anyhow::ensure!(start <= end, "--start-date is after --end-date");
    }
    Ok(CliCommand::Run(options))
}

/// `YYYY-MM-DD` as midnight UTC of that day.
pub fn parse_date(value: &str) -> anyhow::Result<OffsetDateTime> {
    let date = Date::parse(value, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date {value:?}, expected YYYY-MM-DD"))?;
    Ok(date.midnight().assume_utc())
}

fn default_token_file(home: &Path) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home.join(".config"))
        .join("gphotos-sync")
        .join("token.json")
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    read_env::<u64>(name)
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
