//! Configuração do callguard carregada a partir de `callguard.toml`.
//!
//! A struct [`CallguardConfig`] contém os parâmetros de retry e de circuit
//! breaker. Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `CALLGUARD_MAX_ATTEMPTS` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::ConfigError;
use crate::orchestrator::{PipelineBuilder, StageOverride};
use crate::retry::RetryPolicy;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "callguard.toml";

/// Variável de ambiente que sobrescreve `max_attempts`.
pub const MAX_ATTEMPTS_ENV: &str = "CALLGUARD_MAX_ATTEMPTS";

/// Configuração de nível superior carregada de `callguard.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallguardConfig {
    /// Atraso inicial em milissegundos antes da primeira retentativa.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Fator multiplicado ao atraso a cada retentativa.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Máximo de tentativas por estágio, incluindo a primeira.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Falhas consecutivas que abrem o circuito.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Tempo em milissegundos que um circuito aberto espera antes de testar.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Ajustes por estágio, indexados pelo nome (ex.: `[stages.LLM]`).
    #[serde(default)]
    pub stages: HashMap<String, StageConfig>,
}

/// Sobrescritas opcionais para um único estágio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub initial_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_attempts: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub reset_timeout_ms: Option<u64>,
}

// Valor padrão para o atraso inicial: 5000ms.
fn default_initial_delay_ms() -> u64 {
    5000
}

// Valor padrão para o multiplicador: 2.0.
fn default_backoff_multiplier() -> f64 {
    2.0
}

// Valor padrão para tentativas máximas: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o limiar de falhas: 3.
fn default_failure_threshold() -> u32 {
    3
}

// Valor padrão para o tempo de reset: 60000ms.
fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CallguardConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            stages: HashMap::new(),
        }
    }
}

impl CallguardConfig {
    /// Carrega a configuração de `callguard.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega de um caminho explícito, aplicando a variável de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<CallguardConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Aplica sobrescritas vindas de `lookup` (normalmente `std::env::var`).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(MAX_ATTEMPTS_ENV).filter(|v| !v.trim().is_empty()) {
            self.max_attempts = raw
                .trim()
                .parse()
                .with_context(|| format!("{MAX_ATTEMPTS_ENV} must be a positive integer"))?;
        }
        Ok(self)
    }

    /// Política de retry padrão, validada.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            self.backoff_multiplier,
            self.max_attempts,
        )
    }

    /// Configuração padrão dos circuit breakers, validada.
    pub fn breaker_config(&self) -> Result<BreakerConfig, ConfigError> {
        BreakerConfig::new(
            self.failure_threshold,
            Duration::from_millis(self.reset_timeout_ms),
        )
    }

    /// Combina os ajustes de um estágio com os valores globais.
    pub fn stage_override(&self, stage: &str) -> Result<StageOverride, ConfigError> {
        let Some(sc) = self.stages.get(stage) else {
            return Ok(StageOverride::default());
        };

        let retry = if sc.initial_delay_ms.is_some()
            || sc.backoff_multiplier.is_some()
            || sc.max_attempts.is_some()
        {
            Some(RetryPolicy::new(
                Duration::from_millis(sc.initial_delay_ms.unwrap_or(self.initial_delay_ms)),
                sc.backoff_multiplier.unwrap_or(self.backoff_multiplier),
                sc.max_attempts.unwrap_or(self.max_attempts),
            )?)
        } else {
            None
        };

        let breaker = if sc.failure_threshold.is_some() || sc.reset_timeout_ms.is_some() {
            Some(BreakerConfig::new(
                sc.failure_threshold.unwrap_or(self.failure_threshold),
                Duration::from_millis(sc.reset_timeout_ms.unwrap_or(self.reset_timeout_ms)),
            )?)
        } else {
            None
        };

        Ok(StageOverride { retry, breaker })
    }

    /// Aplica toda a configuração a um builder de pipeline.
    pub fn apply<P>(&self, builder: PipelineBuilder<P>) -> Result<PipelineBuilder<P>, ConfigError> {
        let mut builder = builder
            .retry_policy(self.retry_policy()?)
            .breaker_config(self.breaker_config()?);
        for name in self.stages.keys() {
            builder = builder.stage_override(name.clone(), self.stage_override(name)?);
        }
        Ok(builder)
    }
}
