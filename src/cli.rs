//! Interface de linha de comando do callguard baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (simulate, status)
//! e flags globais (--config, --max-attempts, --initial-delay-ms, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// callguard — orquestração resiliente de chamadas STT → LLM → TTS.
#[derive(Debug, Parser)]
#[command(name = "callguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./callguard.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de tentativas por estágio.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Atraso inicial do backoff, em milissegundos.
    #[arg(long, global = true)]
    pub initial_delay_ms: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simula chamadas contra serviços falsos com falhas aleatórias.
    Simulate {
        /// Quantidade de chamadas a processar.
        #[arg(long, default_value_t = 5)]
        calls: u32,

        /// Probabilidade de falha de cada serviço (0.0 a 1.0).
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,

        /// Pausa entre chamadas, em milissegundos.
        #[arg(long, default_value_t = 2000)]
        pause_ms: u64,

        /// Processa todas as chamadas em paralelo em vez de sequencialmente.
        #[arg(long, default_value_t = false)]
        concurrent: bool,
    },

    /// Mostra o status dos circuit breakers e a política de retry em JSON.
    Status,
}
