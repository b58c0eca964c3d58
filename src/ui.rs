//! Interface de terminal do callguard — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`CallProgress`] acompanha visualmente
//! o processamento de uma chamada no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use callguard::{Alert, BreakerState, PipelineResult, Severity, SystemStatus};

/// Indicador visual de progresso para uma ou mais chamadas no terminal.
pub struct CallProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
}

impl CallProgress {
    /// Inicia o spinner para a chamada `call`.
    pub fn start(call: u32) -> Self {
        Self::spinner(format!("Call #{call}: processing"))
    }

    /// Inicia um único spinner para `calls` chamadas executadas em paralelo.
    pub fn batch(calls: u32) -> Self {
        Self::spinner(format!("Processing {calls} calls concurrently"))
    }

    fn spinner(message: String) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    /// Finaliza o spinner e exibe o resultado da chamada.
    pub fn complete<P>(&self, call: u32, result: &PipelineResult<P>) {
        self.finish();
        print_result(call, result);
    }

    /// Remove o spinner do terminal.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Imprime o resultado de uma chamada: ✓ em verde ou ✗ em vermelho.
pub fn print_result<P>(call: u32, result: &PipelineResult<P>) {
    match result {
        PipelineResult::Completed(_) => {
            let green = Style::new().green().bold();
            println!("  {} Call #{call} completed successfully", green.apply_to("✓"));
        }
        PipelineResult::Aborted(abort) => {
            let red = Style::new().red().bold();
            println!(
                "  {} Call #{call} failed at {}: {}",
                red.apply_to("✗"),
                abort.stage,
                abort.message
            );
        }
    }
}

fn state_style(state: BreakerState) -> Style {
    match state {
        BreakerState::Closed => Style::new().green(),
        BreakerState::HalfOpen => Style::new().yellow(),
        BreakerState::Open => Style::new().red().bold(),
    }
}

/// Imprime o status final dos circuitos e da política de retry.
pub fn print_status(status: &SystemStatus) {
    println!();
    println!("{}", Style::new().bold().apply_to("─── System Status ───"));
    for stage in &status.stages {
        println!(
            "  {:<4} circuit: {}  failures: {}  max attempts: {}",
            stage.stage,
            state_style(stage.breaker.state).apply_to(stage.breaker.state),
            stage.breaker.failure_count,
            stage.retry.max_attempts,
        );
    }
    println!(
        "  retry: initial delay {}ms, multiplier {}, max attempts {}",
        status.retry.initial_delay_ms, status.retry.backoff_multiplier, status.retry.max_attempts
    );
}

/// Imprime os alertas ainda não resolvidos.
pub fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        return;
    }
    println!();
    println!("{}", Style::new().bold().apply_to("─── Active Alerts ───"));
    for alert in alerts {
        let style = match alert.severity {
            Severity::Low => Style::new().dim(),
            Severity::Medium => Style::new().yellow(),
            Severity::High | Severity::Critical => Style::new().red().bold(),
        };
        println!(
            "  [{}] {}: {}",
            style.apply_to(alert.severity),
            alert.service,
            alert.message
        );
    }
}
