mod expand;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ArchiverError, Result};

pub use expand::{expand_env_placeholders, resolve_document_refs};

/// File kinds with a registered text-to-FHiCL converter.
pub const CONVERTER_NAMES: &[&str] = &[
    "metadata",
    "boot",
    "settings",
    "setup",
    "environment",
    "ranks",
    "known_boardreaders_list",
];

/// Derived files the import stage can generate from metadata.
pub const GENERATOR_NAMES: &[&str] = &["RunHistory", "RunHistory2"];

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/run_record_archiver")
}

fn default_batch_size() -> usize {
    50
}

fn default_parallel_workers() -> usize {
    4
}

fn default_run_process_retries() -> u32 {
    2
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_smtp_port() -> u16 {
    587
}

fn default_metrics_port() -> u16 {
    2003
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    import_state_file: Option<PathBuf>,
    import_failure_log: Option<PathBuf>,
    migrate_state_file: Option<PathBuf>,
    migrate_failure_log: Option<PathBuf>,
    lock_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_run_process_retries")]
    pub run_process_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            import_state_file: None,
            import_failure_log: None,
            migrate_state_file: None,
            migrate_failure_log: None,
            lock_file: None,
            log_file: None,
            log_level: default_log_level(),
            batch_size: default_batch_size(),
            parallel_workers: default_parallel_workers(),
            run_process_retries: default_run_process_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl AppConfig {
    pub fn import_state_file(&self) -> PathBuf {
        self.import_state_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("importer_state.json"))
    }

    pub fn import_failure_log(&self) -> PathBuf {
        self.import_failure_log
            .clone()
            .unwrap_or_else(|| self.work_dir.join("import_failures.log"))
    }

    pub fn migrate_state_file(&self) -> PathBuf {
        self.migrate_state_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("migrator_state.json"))
    }

    pub fn migrate_failure_log(&self) -> PathBuf {
        self.migrate_failure_log
            .clone()
            .unwrap_or_else(|| self.work_dir.join("migrate_failures.log"))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join(".archiver.lock"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceFilesConfig {
    pub run_records_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationStoreConfig {
    /// Store location: `fsdb:///path` for the in-process driver, any other
    /// URI requires `use_cli_tools`.
    pub uri: String,
    #[serde(default)]
    pub use_cli_tools: bool,
    /// `user@host` target for the cli-remote transport.
    #[serde(default)]
    pub remote_host: Option<String>,
    /// Directory holding `schema.fcl`, copied into every prepared record.
    pub schema_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveStoreConfig {
    pub url: String,
    pub folder_name: String,
    pub object_name: String,
    pub writer_user: String,
    pub writer_password: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportingConfig {
    #[serde(default)]
    pub send_email_on_error: bool,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: default_metrics_port(),
            prefix: None,
        }
    }
}

/// Failure-injection knobs for soak testing. All zeros in production.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzConfig {
    #[serde(default)]
    pub random_skip_percent: u8,
    #[serde(default)]
    pub random_error_percent: u8,
    #[serde(default)]
    pub random_skip_retry: bool,
    #[serde(default)]
    pub random_error_retry: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    pub source_files: SourceFilesConfig,
    pub configuration_store: ConfigurationStoreConfig,
    pub archive_store: ArchiveStoreConfig,
    #[serde(default)]
    pub fhiclize_generate: Vec<String>,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub fuzz: FuzzConfig,
}

impl Config {
    /// Load, expand and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ArchiverError::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        let expanded = expand_env_placeholders(&contents, path)?;
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&expanded).map_err(|e| {
            ArchiverError::Config(format!("invalid config '{}': {e}", path.display()))
        })?;
        resolve_document_refs(&mut doc, path)?;
        let config: Config = serde_yaml::from_value(doc).map_err(|e| {
            ArchiverError::Config(format!("invalid config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for name in &self.fhiclize_generate {
            if !CONVERTER_NAMES.contains(&name.as_str())
                && !GENERATOR_NAMES.contains(&name.as_str())
            {
                return Err(ArchiverError::Config(format!(
                    "unknown fhiclize_generate entry '{name}' (known: {}, {})",
                    CONVERTER_NAMES.join(", "),
                    GENERATOR_NAMES.join(", ")
                )));
            }
        }

        if self.app.parallel_workers == 0 {
            return Err(ArchiverError::Config(
                "app.parallel_workers must be at least 1".into(),
            ));
        }
        if self.app.batch_size == 0 {
            return Err(ArchiverError::Config(
                "app.batch_size must be at least 1".into(),
            ));
        }

        if self.reporting.send_email_on_error
            && (self.reporting.recipient_email.is_none()
                || self.reporting.sender_email.is_none()
                || self.reporting.smtp_host.is_none())
        {
            return Err(ArchiverError::Config(
                "reporting: recipient_email, sender_email and smtp_host are required \
                 when send_email_on_error is true"
                    .into(),
            ));
        }

        let metrics = &self.reporting.metrics;
        if metrics.enabled && (metrics.host.is_none() || metrics.prefix.is_none()) {
            return Err(ArchiverError::Config(
                "reporting.metrics: host and prefix are required when enabled".into(),
            ));
        }

        if self.fuzz.random_skip_percent > 100 || self.fuzz.random_error_percent > 100 {
            return Err(ArchiverError::Config(
                "fuzz: percentages must be within 0..=100".into(),
            ));
        }

        Ok(())
    }

    pub fn should_convert(&self, kind: &str) -> bool {
        self.fhiclize_generate.iter().any(|n| n == kind)
    }

    pub fn should_generate(&self, name: &str) -> bool {
        self.fhiclize_generate.iter().any(|n| n == name)
    }
}
