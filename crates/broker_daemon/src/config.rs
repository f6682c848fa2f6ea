//! CLI arguments and environment-derived watcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use broker_watch::{WatcherConfig, WatcherMode};
use clap::Parser;

/// Session broker daemon: supervises one BSL language server process and
/// exposes it to tool clients over a line-delimited JSON-RPC TCP API.
#[derive(Parser, Debug)]
#[command(name = "broker-daemon")]
#[command(about = "Session broker daemon for the BSL language server", long_about = None)]
#[command(version)]
pub struct Args {
    /// Command used to launch the LSP backend process.
    #[arg(long)]
    pub command: String,

    /// Arguments forwarded to the LSP backend process, in order.
    #[arg(trailing_var_arg = true)]
    pub lsp_args: Vec<String>,

    /// Root directory of the workspace the LSP backend analyzes.
    #[arg(long, value_name = "PATH", default_value = "/projects")]
    pub workspace: PathBuf,

    /// TCP port the downstream API server listens on.
    #[arg(long, default_value_t = 9999)]
    pub port: u16,

    /// Directory for rotated log files. Logs go to stdout when unset.
    #[arg(long, value_name = "PATH")]
    pub log_dir: Option<PathBuf>,
}

/// Build a [`WatcherConfig`] from the documented `FILE_WATCHER_*`
/// environment variables, falling back to their defaults when unset or
/// unparsable.
pub fn watcher_config_from_env(workspace_root: PathBuf) -> WatcherConfig {
    let mode = std::env::var("FILE_WATCHER_MODE")
        .map(|raw| WatcherMode::parse(&raw))
        .unwrap_or(WatcherMode::Auto);

    let interval = std::env::var("FILE_WATCHER_INTERVAL")
        .ok()
        .and_then(|raw| parse_duration(&raw))
        .unwrap_or(broker_watch::polling::DEFAULT_INTERVAL);

    let workers = std::env::var("FILE_WATCHER_WORKERS")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(broker_watch::polling::DEFAULT_WORKERS);

    WatcherConfig { mode, interval, workers, workspace_root }
}

/// Parse a duration in the `FILE_WATCHER_INTERVAL` format: a number
/// followed by `ms` or `s` (e.g. `30s`, `500ms`). A bare number is read as
/// whole seconds, for leniency.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(millis) = raw.strip_suffix("ms") {
        return millis.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_workspace_and_trailing_lsp_args() {
        let args = Args::parse_from([
            "broker-daemon",
            "--command",
            "/usr/bin/bsl-language-server",
            "--workspace",
            "/projects/demo",
            "--port",
            "8080",
            "--",
            "--lsp-flag",
            "value",
        ]);
        assert_eq!(args.command, "/usr/bin/bsl-language-server");
        assert_eq!(args.workspace, PathBuf::from("/projects/demo"));
        assert_eq!(args.port, 8080);
        assert_eq!(args.lsp_args, vec!["--lsp-flag".to_string(), "value".to_string()]);
    }

    #[test]
    fn parses_suffixed_and_bare_durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("nonsense"), None);
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let args = Args::parse_from(["broker-daemon", "--command", "server"]);
        assert_eq!(args.workspace, PathBuf::from("/projects"));
        assert_eq!(args.port, 9999);
        assert!(args.log_dir.is_none());
    }
}
