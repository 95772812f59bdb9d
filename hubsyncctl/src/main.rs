mod control_client;

use anyhow::Context;
use control_client::ControlClient;
use hubsyncd::config::SettingsDocument;

const LOG_BATCH: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Status,
    Start,
    Stop,
    ReloadConfig,
    Logs,
    ShowSettings,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Status;
    for arg in args.into_iter().skip(1) {
        mode = match arg.as_str() {
            "--status" => CliMode::Status,
            "--start" => CliMode::Start,
            "--stop" => CliMode::Stop,
            "--reload-config" => CliMode::ReloadConfig,
            "--logs" => CliMode::Logs,
            "--show-settings" => CliMode::ShowSettings,
            "--help" | "-h" => CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        };
    }
    Ok(mode)
}

fn print_help() {
    println!("Usage: hubsyncctl [COMMAND]");
    println!("  --status          Print the upload service state (default)");
    println!("  --start           Start the upload loop");
    println!("  --stop            Stop the upload loop");
    println!("  --reload-config   Re-read settings (only while stopped)");
    println!("  --logs            Print and drain buffered daemon log lines");
    println!("  --show-settings   Print the effective settings as JSON, token masked");
}

fn show_settings() -> anyhow::Result<()> {
    let home = dirs::home_dir().context("home directory is unknown")?;
    let document = SettingsDocument::load_with_env(&home)?;
    println!("{}", serde_json::to_string_pretty(&document.redacted())?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    match parse_cli_mode(std::env::args())? {
        CliMode::Help => print_help(),
        CliMode::ShowSettings => show_settings()?,
        CliMode::Status => println!("{}", ControlClient::connect()?.status()?.as_str()),
        CliMode::Start => {
            ControlClient::connect()?.start()?;
            println!("start requested");
        }
        CliMode::Stop => {
            if ControlClient::connect()?.stop()? {
                println!("stop requested");
            } else {
                println!("already stopped");
            }
        }
        CliMode::ReloadConfig => {
            ControlClient::connect()?.reload_config()?;
            println!("settings reloaded");
        }
        CliMode::Logs => {
            for line in ControlClient::connect()?.recent_logs(LOG_BATCH)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}
