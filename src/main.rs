mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use callguard::{
    AlertBoard, CallOrchestrator, CallguardConfig, MemoryEventLog, MockService, Payload,
};
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => CallguardConfig::load_from(path)?,
        None => CallguardConfig::load()?,
    };
    if let Some(max) = cli.max_attempts {
        config.max_attempts = max;
    }
    if let Some(delay) = cli.initial_delay_ms {
        config.initial_delay_ms = delay;
    }

    match cli.command {
        Command::Simulate {
            calls,
            failure_rate,
            pause_ms,
            concurrent,
        } => {
            let pause = Duration::from_millis(pause_ms);
            simulate(&config, calls, failure_rate, pause, concurrent).await
        }
        Command::Status => {
            let orchestrator = build(&config, 0.0)?.0;
            println!("{}", serde_json::to_string_pretty(&orchestrator.system_status())?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "callguard=debug" } else { "callguard=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

type Demo = (
    CallOrchestrator<Payload>,
    Arc<MemoryEventLog>,
    Arc<AlertBoard>,
);

fn build(config: &CallguardConfig, failure_rate: f64) -> Result<Demo> {
    let log = Arc::new(MemoryEventLog::new());
    let alerts = Arc::new(AlertBoard::new());
    let latency = Duration::from_millis(500);

    let builder = CallOrchestrator::<Payload>::builder()
        .event_log(log.clone())
        .alert_sink(alerts.clone())
        .call_agent(
            MockService::transcriber(failure_rate).with_latency(latency),
            MockService::responder(failure_rate).with_latency(latency),
            MockService::synthesizer(failure_rate).with_latency(latency),
        );
    let orchestrator = config
        .apply(builder)
        .context("invalid resilience configuration")?
        .build();
    Ok((orchestrator, log, alerts))
}

async fn simulate(
    config: &CallguardConfig,
    calls: u32,
    failure_rate: f64,
    pause: Duration,
    concurrent: bool,
) -> Result<()> {
    let (orchestrator, log, alerts) = build(config, failure_rate)?;
    let orchestrator = Arc::new(orchestrator);

    if concurrent {
        let progress = ui::CallProgress::batch(calls);
        let handles: Vec<_> = (1..=calls)
            .map(|call| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    let input = simulated_audio(call);
                    (call, orchestrator.process(input).await)
                })
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await?);
        }
        progress.finish();
        for (call, result) in &results {
            ui::print_result(*call, result);
        }
    } else {
        for call in 1..=calls {
            let progress = ui::CallProgress::start(call);
            let input = simulated_audio(call);
            let result = orchestrator.process(input).await;
            progress.complete(call, &result);
            if call < calls {
                tokio::time::sleep(pause).await;
            }
        }
    }

    ui::print_status(&orchestrator.system_status());
    ui::print_alerts(&alerts.active());
    println!("\n  {} log entries recorded", log.len());
    Ok(())
}

fn simulated_audio(call: u32) -> Payload {
    Payload::Audio(format!("<simulated_audio_call_{call}>").into_bytes())
}
