use std::{collections::HashMap, sync::Arc};

use analysis_stream::{model::StepStatus, transport::HttpStreamTransport};
use anyhow::{Context, Result};
use chart_sync::{
    config::{AppConfig, load_config_path},
    controller::AnalysisController,
    memory::MemorySurface,
    orchestrator::{AnalysisOrchestrator, RunPhase, RunRequest, RunSnapshot},
};
use clap::{Parser, Subcommand, ValueEnum};
use market_data_client::{
    models::{indicator::IndicatorRequest, timeframe::TimeFrame},
    providers::{
        http::{ApiCredentials, build_http_client},
        rest::RestProvider,
    },
};
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(version, about = "Streamed market analysis CLI")]
struct Cli {
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one analysis and print it as it streams in
    Run {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: TimeFrame,
        /// `name` or `name:key=value,...`; repeatable. Overrides the config list.
        #[arg(long = "indicator", value_name = "SPEC")]
        indicators: Vec<IndicatorRequest>,
        /// Number of candles; defaults to `analysis.candle_limit`
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, value_name = "FILE", default_value = "analysis.toml")]
        config: String,
    },
    /// Print the normalized configuration
    Config {
        #[arg(long, value_name = "FILE", default_value = "analysis.toml")]
        config: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.cmd {
        Cmd::Run {
            symbol,
            timeframe,
            indicators,
            limit,
            config,
        } => {
            let cfg = load_config_path(&config)?;
            let request = RunRequest {
                symbol: symbol.trim().to_uppercase(),
                timeframe,
                limit: limit.unwrap_or(cfg.analysis.candle_limit),
                indicators: if indicators.is_empty() {
                    cfg.indicator_requests()
                } else {
                    indicators
                },
            };
            run(&cfg, request).await
        }
        Cmd::Config { config } => {
            let cfg = load_config_path(&config)?;
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}

fn orchestrator(cfg: &AppConfig) -> Result<AnalysisOrchestrator> {
    let credentials = ApiCredentials::from_env().context("missing API credentials")?;
    let client = build_http_client(&credentials, &cfg.api.session_header)?;

    let mut provider = RestProvider::new(client.clone(), cfg.endpoints());
    if let Some(rps) = cfg.rate_limit() {
        provider = provider.with_rate_limit(rps);
    }
    let transport = HttpStreamTransport::new(client, &cfg.api.base_url, &cfg.api.stream_path);

    Ok(AnalysisOrchestrator::new(
        Arc::new(provider),
        Arc::new(transport),
        cfg.session_config(),
    ))
}

async fn run(cfg: &AppConfig, request: RunRequest) -> Result<()> {
    let orchestrator = Arc::new(orchestrator(cfg)?);
    let mut controller = AnalysisController::new(orchestrator, MemorySurface::new());

    info!(symbol = %request.symbol, timeframe = %request.timeframe, "starting");
    let mut snapshots = controller.start(request).await;
    let mut printer = Printer::default();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                printer.print(&snapshot);
                if snapshot.phase.is_terminal() {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "could not listen for ctrl-c");
                }
                controller.cancel();
                break;
            }
        }
    }

    let last = match controller.wait().await {
        Some(snapshot) => snapshot,
        None => final_snapshot(&snapshots),
    };
    printer.print(&last);
    report(&last, &*controller.surface().lock().await);

    match &last.phase {
        RunPhase::Failed(failure) => Err(anyhow::anyhow!("{failure}")),
        _ => Ok(()),
    }
}

fn final_snapshot(rx: &watch::Receiver<RunSnapshot>) -> RunSnapshot {
    rx.borrow().clone()
}

/// Prints only what changed since the previous snapshot.
#[derive(Default)]
struct Printer {
    steps: HashMap<String, StepStatus>,
    narrative_len: usize,
    notices: usize,
    summary_printed: bool,
}

impl Printer {
    fn print(&mut self, snapshot: &RunSnapshot) {
        for step in &snapshot.view.steps {
            if self.steps.get(&step.name) != Some(&step.status) {
                self.steps.insert(step.name.clone(), step.status);
                let mark = match step.status {
                    StepStatus::Pending => "·",
                    StepStatus::InProgress => "…",
                    StepStatus::Completed => "✓",
                    StepStatus::Skipped => "-",
                };
                let desc = step.description.as_deref().unwrap_or_default();
                eprintln!("[{mark}] {} {desc}", step.name);
            }
        }

        if snapshot.view.final_summary.is_none() {
            let narrative = snapshot.view.narrative();
            if narrative.len() > self.narrative_len {
                print!("{}", &narrative[self.narrative_len..]);
                self.narrative_len = narrative.len();
            }
        } else if !self.summary_printed {
            self.summary_printed = true;
            if self.narrative_len > 0 {
                println!();
            }
            println!("\n{}", snapshot.view.narrative());
        }

        for notice in snapshot.notices.iter().skip(self.notices) {
            eprintln!("! {notice}");
        }
        self.notices = snapshot.notices.len();
    }
}

fn report(snapshot: &RunSnapshot, surface: &MemorySurface) {
    println!();
    match &snapshot.phase {
        RunPhase::Done => println!("status: done"),
        RunPhase::Cancelled => println!("status: cancelled"),
        RunPhase::Failed(failure) => println!("status: failed ({failure})"),
        phase => println!("status: {phase:?}"),
    }
    if let Some(message) = &snapshot.view.error_message {
        println!("error: {message}");
    }
    println!("candles: {}", surface.candles().len());

    if !snapshot.view.levels.is_empty() {
        println!("levels:");
        for level in &snapshot.view.levels {
            let price = level
                .price
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".into());
            println!(
                "  {:<10} {:<12} {price:>10}  strength {:.2}",
                level.kind, level.label, level.strength
            );
        }
    }
    if !snapshot.view.patterns.is_empty() {
        println!("patterns:");
        for pattern in &snapshot.view.patterns {
            println!(
                "  {:<20} score {:.2}  confidence {:.2}",
                pattern.name, pattern.score, pattern.confidence
            );
        }
    }
    if surface.series().next().is_some() {
        println!("overlays:");
        for series in surface.series() {
            let drawn = series.points.iter().filter(|p| p.value.is_some()).count();
            println!(
                "  {:<24} {:<10} {}/{} pts",
                series.id,
                series.pane.id(),
                drawn,
                series.points.len()
            );
        }
    }
}
