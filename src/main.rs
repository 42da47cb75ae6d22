use clap::{Parser, ValueEnum};
use hil_monitor::config::{Config, ConfigLoader};
use hil_monitor::transport::open_transport;
use hil_monitor::{
    logging, AppError, AppResult, CancelToken, Completion, Orchestrator, PatternTable,
    RebootPolicy, ReportFormat, RunOutcome, TransportChoice,
};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Exit status when the run did not finish normally.
const ABORTED: u8 = 255;

/// Highest exit status used for a failure count.
const MAX_FAILURE_STATUS: u32 = 254;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Runs a Unity test build on a target and reports the outcome.",
    long_about = "Connects to a device console over a serial port, a telnet port on the configured host, or by launching a program, runs every test through the Unity menu and writes a JUnit-style report. The exit status is the number of failed tests, or 255 if the run did not complete."
)]
struct Args {
    /// Serial port name, telnet port number or command line of a test program.
    source: String,

    /// File that receives every console line.
    log_file: PathBuf,

    /// File the report is written to.
    report_file: PathBuf,

    /// How to interpret SOURCE.
    #[arg(short, long, value_enum, default_value_t = TransportArg::Auto)]
    transport: TransportArg,

    /// Configuration file (otherwise the standard locations are searched).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report format.
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// What a target reboot does to the run.
    #[arg(long, value_enum)]
    reboot_policy: Option<RebootPolicyArg>,

    /// Give up if the run has not finished after this many seconds.
    #[arg(long)]
    run_timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Auto,
    Serial,
    Telnet,
    Process,
}

impl From<TransportArg> for TransportChoice {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Auto => Self::Auto,
            TransportArg::Serial => Self::Serial,
            TransportArg::Telnet => Self::Telnet,
            TransportArg::Process => Self::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Xml,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xml => Self::Xml,
            FormatArg::Json => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RebootPolicyArg {
    EndRun,
    KeepWatching,
}

impl From<RebootPolicyArg> for RebootPolicy {
    fn from(arg: RebootPolicyArg) -> Self {
        match arg {
            RebootPolicyArg::EndRun => Self::EndRun,
            RebootPolicyArg::KeepWatching => Self::KeepWatching,
        }
    }
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(outcome) => ExitCode::from(exit_status(outcome.completion())),
        Err(e) => {
            error!("{}", e);
            eprintln!("hil-monitor: {}", e);
            ExitCode::from(ABORTED)
        }
    }
}

async fn run(args: Args) -> AppResult<RunOutcome> {
    let config = load_config(&args)?;
    logging::init(&config.logging)?;
    info!("hil-monitor v{}", env!("CARGO_PKG_VERSION"));

    let table = PatternTable::with_reboot_marker(&config.run.reboot_marker)?;
    let capture = File::create(&args.log_file).map_err(|e| AppError::ConsoleLog {
        path: args.log_file.clone(),
        source: e,
    })?;

    let cancel = CancelToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    // Opening and reading block, so the whole run lives on the blocking pool.
    let source = args.source.clone();
    let choice = TransportChoice::from(args.transport);
    let transport_settings = config.transport_settings();
    let run_settings = config.run.settings();
    let outcome = tokio::task::spawn_blocking(move || -> AppResult<RunOutcome> {
        let transport = open_transport(&source, choice, &transport_settings)
            .ok_or_else(|| AppError::NoTransport(source.clone()))?;
        Ok(Orchestrator::new(transport, table, run_settings)
            .with_capture(Box::new(capture))
            .with_cancel(cancel)
            .run())
    })
    .await
    .map_err(std::io::Error::from)??;

    if outcome.decode_errors > 0 {
        warn!("{} undecodable line(s) were dropped", outcome.decode_errors);
    }

    let report = outcome.report(&config.report.suite, &config.report.class_name);
    report.write_to_path(config.report.format, &args.report_file)?;
    info!("Report written to {}", args.report_file.display());

    println!("{}", outcome.summary_line());
    Ok(outcome)
}

fn load_config(args: &Args) -> AppResult<Config> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();

    // Command-line flags win over the file and the environment.
    if let Some(format) = args.format {
        config.report.format = format.into();
    }
    if let Some(policy) = args.reboot_policy {
        config.run.reboot_policy = policy.into();
    }
    if let Some(secs) = args.run_timeout {
        config.run.run_timeout_secs = Some(secs);
    }
    Ok(config)
}

async fn cancel_on_ctrl_c(cancel: CancelToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, stopping the run...");
        cancel.cancel();
    }
}

fn exit_status(completion: Completion) -> u8 {
    match completion {
        Completion::Failures(n) => n.min(MAX_FAILURE_STATUS) as u8,
        Completion::Aborted => ABORTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(Completion::Failures(0)), 0);
        assert_eq!(exit_status(Completion::Failures(3)), 3);
        assert_eq!(exit_status(Completion::Failures(1000)), 254);
        assert_eq!(exit_status(Completion::Aborted), 255);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "hil-monitor",
            "19021",
            "console.log",
            "report.xml",
            "--transport",
            "telnet",
            "--reboot-policy",
            "keep-watching",
        ])
        .unwrap();
        assert_eq!(args.source, "19021");
        assert!(matches!(args.transport, TransportArg::Telnet));
        assert!(matches!(args.reboot_policy, Some(RebootPolicyArg::KeepWatching)));
    }
}
