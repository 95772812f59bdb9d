use anyhow::Context;
use hubsyncd::config::DaemonConfig;
use hubsyncd::daemon::DaemonRuntime;
use hubsyncd::logging::{LogQueue, init_tracing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Paused,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--paused" => mode = CliMode::Paused,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: hubsyncd [--paused]");
        println!("  --paused   Serve the control interface but wait for an explicit start");
        return Ok(());
    }

    let logs = LogQueue::default();
    init_tracing(&logs);
    let config = DaemonConfig::load().context("invalid settings")?;
    let daemon = DaemonRuntime::bootstrap(config, logs)?;
    daemon.run(mode == CliMode::Run).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["hubsyncd".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_paused() {
        let mode = parse_cli_mode(vec!["hubsyncd".to_string(), "--paused".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Paused);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(vec!["hubsyncd".to_string(), "-h".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(vec!["hubsyncd".to_string(), "--logout".to_string()]).is_err());
    }
}
