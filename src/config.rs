use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::common::constants::*;
use crate::common::error::{ImportError, Result};
use crate::pipeline::engine::ChunkOptions;
use crate::pipeline::processing::commit::CommitConfig;
use crate::pipeline::processing::validators::business_rules::BusinessRule;
use crate::pipeline::processing::validators::format::FormatThresholds;
use crate::pipeline::processing::validators::fraud::FraudPattern;
use crate::pipeline::processing::validators::seasonal::SeasonalBounds;
use crate::pipeline::retry::RetryPolicy;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV_VAR: &str = "SHIPMENT_IMPORT_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub validation: ValidationConfig,
    pub lookup: LookupConfig,
    pub session: SessionConfig,
    pub commit: CommitSettings,
    pub thresholds: FormatThresholds,
    pub business_rules: Vec<BusinessRule>,
    pub seasonal: Vec<SeasonalBounds>,
    pub fraud_patterns: Vec<FraudPattern>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub preview_rows: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_VALIDATION_CHUNK_SIZE,
            chunk_delay_ms: 0,
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub requests_per_min: u64,
    pub concurrency: u32,
    pub postal_code_lookup: bool,
    pub postal_code_base_url: String,
    pub timeout_seconds: u64,
    /// Carrier codes recognized by the static directory
    pub carriers: Vec<String>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
            chunk_delay_ms: DEFAULT_LOOKUP_DELAY_MS,
            requests_per_min: DEFAULT_LOOKUP_REQUESTS_PER_MIN,
            concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            postal_code_lookup: true,
            postal_code_base_url: DEFAULT_POSTAL_CODE_BASE_URL.to_string(),
            timeout_seconds: 10,
            carriers: [
                "CORREIOS",
                "JADLOG",
                "LOGGI",
                "TOTAL_EXPRESS",
                "AZUL_CARGO",
                "BRASPRESS",
                "SEQUOIA",
                "MERCADO_ENVIOS",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub debounce_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommitSettings {
    pub chunk_size: usize,
    pub insert_attempts: u32,
    pub insert_delay_ms: u64,
    pub audit_attempts: u32,
    pub audit_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_COMMIT_CHUNK_SIZE,
            insert_attempts: DEFAULT_INSERT_ATTEMPTS,
            insert_delay_ms: DEFAULT_INSERT_DELAY_MS,
            audit_attempts: DEFAULT_AUDIT_ATTEMPTS,
            audit_delay_ms: DEFAULT_AUDIT_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ImportConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load from `SHIPMENT_IMPORT_CONFIG` (after reading `.env`), or defaults when unset.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn check(&self) -> Result<()> {
        if self.validation.chunk_size == 0 || self.lookup.chunk_size == 0 || self.commit.chunk_size == 0 {
            return Err(ImportError::Config("chunk sizes must be greater than zero".to_string()));
        }
        if self.lookup.requests_per_min == 0 {
            return Err(ImportError::Config("lookup.requests_per_min must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions::new(self.validation.chunk_size).with_delay(millis(self.validation.chunk_delay_ms))
    }

    pub fn lookup_chunk_options(&self) -> ChunkOptions {
        ChunkOptions::new(self.lookup.chunk_size).with_delay(millis(self.lookup.chunk_delay_ms))
    }

    pub fn commit_config(&self) -> CommitConfig {
        let c = &self.commit;
        CommitConfig {
            chunk_size: c.chunk_size,
            insert_retry: RetryPolicy::new(c.insert_attempts, c.insert_delay_ms, c.backoff_multiplier),
            audit_retry: RetryPolicy::new(c.audit_attempts, c.audit_delay_ms, c.backoff_multiplier),
        }
    }

    pub fn debounce(&self) -> Duration {
        millis(self.session.debounce_ms)
    }
}
