//! Configuration loading and resolution
//!
//! Resolution priority per field (highest first):
//! 1. Command-line argument
//! 2. Environment variable (`PCAL_*`)
//! 3. TOML config file
//! 4. Compiled default (only for fields that have one)
//!
//! The resolved [`GlossaryConfig`] is an explicit value: it is built once at
//! startup and passed by reference to every component. Nothing below `main`
//! reads the environment.

use crate::locale::{parse_locale_list, LocaleCode};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PCAL_CONFIG";

/// Default number of concurrent outbound requests
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default per-request timeout for external services
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// TOML file schema
// ============================================================================

/// Raw TOML configuration (every field optional; validated in [`ConfigResolver`])
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub corpus_path: Option<PathBuf>,
    pub glossary_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub per_locale_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub locales: Option<Vec<String>>,
    pub reference_locale: Option<String>,
    pub locale_priority: Option<Vec<String>>,
    pub max_in_flight: Option<usize>,
    pub corpus: CorpusSection,
    pub knowledge_base: ServiceSection,
    pub translation: ServiceSection,
    pub logging: LoggingConfig,
}

/// `[corpus]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSection {
    pub name_fields: Option<Vec<String>>,
    pub labels_field: Option<String>,
    pub translate_from_existing_labels: Option<bool>,
}

/// `[knowledge_base]` / `[translation]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub batch_size: Option<usize>,
    pub locales_per_query: Option<usize>,
    pub requests_per_second: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub retry: RetrySection,
}

/// `[*.retry]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

/// `[logging]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Parse TOML configuration text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// A TOML config together with the file it came from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TomlConfig,
    /// `None` when no config file was found
    pub source: Option<PathBuf>,
}

impl LoadedConfig {
    /// Report where configuration came from
    ///
    /// Called once logging is initialized, since loading happens before.
    pub fn log_source(&self) {
        match &self.source {
            Some(path) => info!("Loaded config file: {}", path.display()),
            None => warn!("No config file found, using ENV/CLI values only"),
        }
    }
}

/// Load the TOML config file
///
/// An explicit path must exist. Without one, the platform default locations
/// are tried; when none exists the pipeline starts from an empty config and
/// relies on ENV/CLI values.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_file() {
            Some(path) => path,
            None => return Ok(LoadedConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config = parse_toml_config(&content)?;
    Ok(LoadedConfig {
        config,
        source: Some(path),
    })
}

/// First existing default config file for the platform
///
/// `<config_dir>/pcal/glossary.toml`, then `/etc/pcal/glossary.toml` on Linux.
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("pcal").join("glossary.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/pcal/glossary.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), doubling and capped
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Corpus field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusOptions {
    /// Fields tried in order for the scientific name
    pub name_fields: Vec<String>,
    /// Object field holding pre-existing `locale → text` labels
    pub labels_field: String,
    /// Allow pre-existing corpus labels as machine-translation source text
    pub translate_from_existing_labels: bool,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        Self {
            name_fields: vec!["scientificName".to_string(), "name".to_string()],
            labels_field: "labels".to_string(),
            translate_from_existing_labels: false,
        }
    }
}

/// Knowledge-base service settings
#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    pub endpoint: String,
    pub user_agent: String,
    /// Scientific names per query
    pub batch_size: usize,
    /// Locales per query; `None` sends every locale in one query
    pub locales_per_query: Option<usize>,
    pub requests_per_second: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Translation service settings
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub requests_per_second: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Fully resolved and validated pipeline configuration
#[derive(Debug, Clone)]
pub struct GlossaryConfig {
    pub corpus_path: PathBuf,
    pub glossary_path: PathBuf,
    pub output_path: PathBuf,
    /// Translation cache database; `None` keeps the cache in memory for the run
    pub cache_path: Option<PathBuf>,
    pub per_locale_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    /// Configured locale set, in configuration order
    pub locales: Vec<LocaleCode>,
    pub reference_locale: LocaleCode,
    /// Total source-selection order over `locales`
    pub locale_priority: Vec<LocaleCode>,
    pub corpus: CorpusOptions,
    /// `None` in offline mode
    pub knowledge_base: Option<KnowledgeBaseConfig>,
    /// `None` in offline mode
    pub translation: Option<TranslationConfig>,
    pub max_in_flight: usize,
    pub logging: LoggingConfig,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub corpus_path: Option<PathBuf>,
    pub glossary_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub per_locale_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub locales: Option<Vec<String>>,
    pub max_in_flight: Option<usize>,
    pub log_level: Option<String>,
    /// Skip knowledge-base and translation stages
    pub offline: bool,
}

/// Layers CLI → ENV → TOML → defaults into a [`GlossaryConfig`]
pub struct ConfigResolver<'a> {
    toml: TomlConfig,
    overrides: ConfigOverrides,
    env: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl<'a> ConfigResolver<'a> {
    /// Resolver reading the process environment
    pub fn new(toml: TomlConfig) -> Self {
        Self {
            toml,
            overrides: ConfigOverrides::default(),
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the environment lookup (tests, embedding)
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'a,
    {
        self.env = Box::new(lookup);
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    fn env_var(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|v| !v.trim().is_empty())
    }

    fn env_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.env_var(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
            None => Ok(None),
        }
    }

    fn path(
        &self,
        cli: &Option<PathBuf>,
        env_key: &str,
        toml: &Option<PathBuf>,
    ) -> Option<PathBuf> {
        cli.clone()
            .or_else(|| self.env_var(env_key).map(PathBuf::from))
            .or_else(|| toml.clone())
    }

    fn required_path(
        &self,
        cli: &Option<PathBuf>,
        env_key: &str,
        toml: &Option<PathBuf>,
        toml_key: &str,
    ) -> Result<PathBuf> {
        self.path(cli, env_key, toml)
            .ok_or_else(|| missing(toml_key, env_key))
    }

    fn locale_list(
        &self,
        cli: Option<&Vec<String>>,
        env_key: &str,
        toml: Option<&Vec<String>>,
    ) -> Result<Option<Vec<LocaleCode>>> {
        if let Some(values) = cli {
            return parse_codes(values).map(Some);
        }
        if let Some(raw) = self.env_var(env_key) {
            return parse_locale_list(&raw).map(Some);
        }
        match toml {
            Some(values) => parse_codes(values).map(Some),
            None => Ok(None),
        }
    }

    fn retry_policy(&self, section: &RetrySection, env_key: &str, table: &str) -> Result<RetryPolicy> {
        let max_retries = match self.env_parsed::<u32>(env_key)? {
            Some(value) => value,
            None => section
                .max_retries
                .ok_or_else(|| missing(&format!("{}.retry.max_retries", table), env_key))?,
        };
        let initial_backoff_ms = section.initial_backoff_ms.ok_or_else(|| {
            Error::Config(format!("{}.retry.initial_backoff_ms not configured", table))
        })?;
        let max_backoff_ms = section.max_backoff_ms.ok_or_else(|| {
            Error::Config(format!("{}.retry.max_backoff_ms not configured", table))
        })?;

        if initial_backoff_ms > max_backoff_ms {
            return Err(Error::Config(format!(
                "{}.retry.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                table, initial_backoff_ms, max_backoff_ms
            )));
        }

        Ok(RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        })
    }

    fn knowledge_base(&self) -> Result<KnowledgeBaseConfig> {
        let section = &self.toml.knowledge_base;
        let endpoint = self
            .env_var("PCAL_KB_ENDPOINT")
            .or_else(|| section.endpoint.clone())
            .ok_or_else(|| missing("knowledge_base.endpoint", "PCAL_KB_ENDPOINT"))?;
        let user_agent = self
            .env_var("PCAL_KB_USER_AGENT")
            .or_else(|| section.user_agent.clone())
            .unwrap_or_else(default_user_agent);
        let batch_size = match self.env_parsed::<usize>("PCAL_KB_BATCH_SIZE")? {
            Some(value) => value,
            None => section
                .batch_size
                .ok_or_else(|| missing("knowledge_base.batch_size", "PCAL_KB_BATCH_SIZE"))?,
        };
        if batch_size == 0 {
            return Err(Error::Config("knowledge_base.batch_size must be at least 1".to_string()));
        }
        if section.locales_per_query == Some(0) {
            return Err(Error::Config(
                "knowledge_base.locales_per_query must be at least 1".to_string(),
            ));
        }

        Ok(KnowledgeBaseConfig {
            endpoint,
            user_agent,
            batch_size,
            locales_per_query: section.locales_per_query,
            requests_per_second: positive_rate(section.requests_per_second, "knowledge_base")?,
            timeout: Duration::from_secs(section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            retry: self.retry_policy(&section.retry, "PCAL_KB_MAX_RETRIES", "knowledge_base")?,
        })
    }

    fn translation(&self) -> Result<TranslationConfig> {
        let section = &self.toml.translation;
        let endpoint = self
            .env_var("PCAL_TRANSLATION_ENDPOINT")
            .or_else(|| section.endpoint.clone())
            .ok_or_else(|| missing("translation.endpoint", "PCAL_TRANSLATION_ENDPOINT"))?;

        Ok(TranslationConfig {
            endpoint,
            api_key: self
                .env_var("PCAL_TRANSLATION_API_KEY")
                .or_else(|| section.api_key.clone()),
            user_agent: section.user_agent.clone().unwrap_or_else(default_user_agent),
            requests_per_second: positive_rate(section.requests_per_second, "translation")?,
            timeout: Duration::from_secs(section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            retry: self.retry_policy(
                &section.retry,
                "PCAL_TRANSLATION_MAX_RETRIES",
                "translation",
            )?,
        })
    }

    /// Resolve and validate
    pub fn resolve(self) -> Result<GlossaryConfig> {
        let cli = &self.overrides;
        let toml = &self.toml;

        let corpus_path = self.required_path(
            &cli.corpus_path,
            "PCAL_CORPUS_PATH",
            &toml.corpus_path,
            "corpus_path",
        )?;
        let glossary_path = self.required_path(
            &cli.glossary_path,
            "PCAL_GLOSSARY_PATH",
            &toml.glossary_path,
            "glossary_path",
        )?;
        let output_path = self.required_path(
            &cli.output_path,
            "PCAL_OUTPUT_PATH",
            &toml.output_path,
            "output_path",
        )?;
        let cache_path = self.path(&cli.cache_path, "PCAL_CACHE_PATH", &toml.cache_path);
        let per_locale_dir =
            self.path(&cli.per_locale_dir, "PCAL_PER_LOCALE_DIR", &toml.per_locale_dir);
        let report_path = self.path(&cli.report_path, "PCAL_REPORT_PATH", &toml.report_path);

        let locales = self
            .locale_list(cli.locales.as_ref(), "PCAL_LOCALES", toml.locales.as_ref())?
            .ok_or_else(|| missing("locales", "PCAL_LOCALES"))?;
        if locales.is_empty() {
            return Err(Error::Config("locales must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for locale in &locales {
            if !seen.insert(locale) {
                return Err(Error::Config(format!("locale '{}' configured twice", locale)));
            }
        }

        let reference_locale = match self.env_var("PCAL_REFERENCE_LOCALE") {
            Some(raw) => LocaleCode::parse(&raw)?,
            None => toml
                .reference_locale
                .as_deref()
                .map(LocaleCode::parse)
                .transpose()?
                .ok_or_else(|| missing("reference_locale", "PCAL_REFERENCE_LOCALE"))?,
        };
        if !locales.contains(&reference_locale) {
            return Err(Error::Config(format!(
                "reference_locale '{}' is not one of the configured locales",
                reference_locale
            )));
        }

        let priority = self
            .locale_list(None, "PCAL_LOCALE_PRIORITY", toml.locale_priority.as_ref())?
            .ok_or_else(|| missing("locale_priority", "PCAL_LOCALE_PRIORITY"))?;
        let locale_priority = complete_priority(&priority, &locales)?;

        let corpus = CorpusOptions {
            name_fields: toml
                .corpus
                .name_fields
                .clone()
                .filter(|fields| !fields.is_empty())
                .unwrap_or_else(|| CorpusOptions::default().name_fields),
            labels_field: toml
                .corpus
                .labels_field
                .clone()
                .unwrap_or_else(|| CorpusOptions::default().labels_field),
            translate_from_existing_labels: toml
                .corpus
                .translate_from_existing_labels
                .unwrap_or(false),
        };

        let (knowledge_base, translation) = if cli.offline {
            (None, None)
        } else {
            (Some(self.knowledge_base()?), Some(self.translation()?))
        };

        let max_in_flight = match cli.max_in_flight {
            Some(value) => value,
            None => self
                .env_parsed::<usize>("PCAL_MAX_IN_FLIGHT")?
                .or(toml.max_in_flight)
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT),
        };
        if max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be at least 1".to_string()));
        }

        let logging = LoggingConfig {
            level: cli
                .log_level
                .clone()
                .or_else(|| self.env_var("PCAL_LOG_LEVEL"))
                .unwrap_or_else(|| toml.logging.level.clone()),
        };

        Ok(GlossaryConfig {
            corpus_path,
            glossary_path,
            output_path,
            cache_path,
            per_locale_dir,
            report_path,
            locales,
            reference_locale,
            locale_priority,
            corpus,
            knowledge_base,
            translation,
            max_in_flight,
            logging,
        })
    }
}

fn missing(toml_key: &str, env_key: &str) -> Error {
    Error::Config(format!(
        "{} not configured. Configure using one of:\n\
         1. Environment: {}=...\n\
         2. TOML config: {} = ... (file given by --config / {}, or ~/.config/pcal/glossary.toml)",
        toml_key, env_key, toml_key, CONFIG_ENV_VAR
    ))
}

fn parse_codes(values: &[String]) -> Result<Vec<LocaleCode>> {
    values.iter().map(|v| LocaleCode::parse(v)).collect()
}

fn positive_rate(value: Option<u32>, table: &str) -> Result<u32> {
    match value.unwrap_or(1) {
        0 => Err(Error::Config(format!(
            "{}.requests_per_second must be at least 1",
            table
        ))),
        rate => Ok(rate),
    }
}

fn default_user_agent() -> String {
    format!("pcal-glossary/{}", env!("CARGO_PKG_VERSION"))
}

/// Extend a configured priority list into a total order over `locales`
///
/// Configured entries come first, in order; locales it does not mention
/// follow sorted by code.
pub fn complete_priority(priority: &[LocaleCode], locales: &[LocaleCode]) -> Result<Vec<LocaleCode>> {
    let mut ordered: Vec<LocaleCode> = Vec::with_capacity(locales.len());
    for locale in priority {
        if !locales.contains(locale) {
            return Err(Error::Config(format!(
                "locale_priority entry '{}' is not one of the configured locales",
                locale
            )));
        }
        if !ordered.contains(locale) {
            ordered.push(locale.clone());
        }
    }

    let mut rest: Vec<LocaleCode> = locales
        .iter()
        .filter(|l| !ordered.contains(l))
        .cloned()
        .collect();
    rest.sort();
    ordered.extend(rest);
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(raw: &[&str]) -> Vec<LocaleCode> {
        raw.iter().map(|c| LocaleCode::parse(c).unwrap()).collect()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[test]
    fn test_complete_priority_appends_unlisted_sorted() {
        let order = complete_priority(&codes(&["fr", "en"]), &codes(&["fr", "pt-BR", "en", "de"]))
            .unwrap();
        assert_eq!(order, codes(&["fr", "en", "de", "pt-BR"]));
    }

    #[test]
    fn test_complete_priority_rejects_unknown_locale() {
        assert!(complete_priority(&codes(&["it"]), &codes(&["fr"])).is_err());
    }
}
