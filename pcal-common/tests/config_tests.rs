//! Tests for configuration loading and layered resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate PCAL_* variables are marked with #[serial].

use pcal_common::config::{
    load_toml_config, parse_toml_config, ConfigOverrides, ConfigResolver, TomlConfig,
};
use pcal_common::LocaleCode;
use serial_test::serial;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

const FULL_TOML: &str = r#"
corpus_path = "assets/data/plants.json"
glossary_path = "glossary_seed.json"
output_path = "assets/data/plant_names.json"
cache_path = "translation_cache.db"
locales = ["fr", "en", "es", "pt_BR", "de"]
reference_locale = "fr"
locale_priority = ["fr", "en"]
max_in_flight = 8

[corpus]
name_fields = ["latin"]

[knowledge_base]
endpoint = "https://query.wikidata.org/sparql"
batch_size = 50
requests_per_second = 5

[knowledge_base.retry]
max_retries = 3
initial_backoff_ms = 500
max_backoff_ms = 8000

[translation]
endpoint = "https://api-free.deepl.com/v2/translate"
api_key = "toml-key"

[translation.retry]
max_retries = 2
initial_backoff_ms = 250
max_backoff_ms = 4000

[logging]
level = "debug"
"#;

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn codes(raw: &[&str]) -> Vec<LocaleCode> {
    raw.iter().map(|c| LocaleCode::parse(c).unwrap()).collect()
}

#[test]
fn test_full_toml_resolves() {
    let toml = parse_toml_config(FULL_TOML).unwrap();
    let config = ConfigResolver::new(toml).with_env(no_env).resolve().unwrap();

    assert_eq!(config.corpus_path, PathBuf::from("assets/data/plants.json"));
    assert_eq!(config.locales, codes(&["fr", "en", "es", "pt-BR", "de"]));
    assert_eq!(config.reference_locale.as_str(), "fr");
    assert_eq!(config.locale_priority, codes(&["fr", "en", "de", "es", "pt-BR"]));
    assert_eq!(config.max_in_flight, 8);
    assert_eq!(config.corpus.name_fields, vec!["latin".to_string()]);
    assert_eq!(config.corpus.labels_field, "labels");
    assert_eq!(config.logging.level, "debug");

    let kb = config.knowledge_base.unwrap();
    assert_eq!(kb.batch_size, 50);
    assert_eq!(kb.requests_per_second, 5);
    assert_eq!(kb.retry.max_retries, 3);
    assert_eq!(kb.retry.initial_backoff, Duration::from_millis(500));
    assert!(kb.user_agent.starts_with("pcal-glossary/"));

    let mt = config.translation.unwrap();
    assert_eq!(mt.api_key.as_deref(), Some("toml-key"));
    assert_eq!(mt.retry.max_retries, 2);
}

#[test]
fn test_env_overrides_toml() {
    let toml = parse_toml_config(FULL_TOML).unwrap();
    let config = ConfigResolver::new(toml)
        .with_env(env_from(&[
            ("PCAL_CORPUS_PATH", "/data/env-plants.json"),
            ("PCAL_LOCALES", "fr,de"),
            ("PCAL_LOCALE_PRIORITY", "de"),
            ("PCAL_TRANSLATION_API_KEY", "env-key"),
            ("PCAL_KB_BATCH_SIZE", "10"),
        ]))
        .resolve()
        .unwrap();

    assert_eq!(config.corpus_path, PathBuf::from("/data/env-plants.json"));
    assert_eq!(config.locales, codes(&["fr", "de"]));
    assert_eq!(config.locale_priority, codes(&["de", "fr"]));
    assert_eq!(config.knowledge_base.unwrap().batch_size, 10);
    assert_eq!(config.translation.unwrap().api_key.as_deref(), Some("env-key"));
}

#[test]
fn test_cli_overrides_env() {
    let toml = parse_toml_config(FULL_TOML).unwrap();
    let overrides = ConfigOverrides {
        output_path: Some(PathBuf::from("/tmp/cli-out.json")),
        max_in_flight: Some(2),
        ..Default::default()
    };
    let config = ConfigResolver::new(toml)
        .with_env(env_from(&[
            ("PCAL_OUTPUT_PATH", "/tmp/env-out.json"),
            ("PCAL_MAX_IN_FLIGHT", "16"),
        ]))
        .with_overrides(overrides)
        .resolve()
        .unwrap();

    assert_eq!(config.output_path, PathBuf::from("/tmp/cli-out.json"));
    assert_eq!(config.max_in_flight, 2);
}

#[test]
fn test_missing_required_field_names_sources() {
    let mut toml = parse_toml_config(FULL_TOML).unwrap();
    toml.glossary_path = None;

    let err = ConfigResolver::new(toml)
        .with_env(no_env)
        .resolve()
        .unwrap_err()
        .to_string();
    assert!(err.contains("glossary_path"), "got: {}", err);
    assert!(err.contains("PCAL_GLOSSARY_PATH"), "got: {}", err);
}

#[test]
fn test_batch_size_and_retry_bounds_are_required() {
    let mut toml = parse_toml_config(FULL_TOML).unwrap();
    toml.knowledge_base.batch_size = None;
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());

    let mut toml = parse_toml_config(FULL_TOML).unwrap();
    toml.translation.retry.max_retries = None;
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());
}

#[test]
fn test_offline_skips_service_sections() {
    let toml = TomlConfig {
        corpus_path: Some("c.json".into()),
        glossary_path: Some("g.json".into()),
        output_path: Some("o.json".into()),
        locales: Some(vec!["fr".into(), "en".into()]),
        reference_locale: Some("fr".into()),
        locale_priority: Some(vec!["fr".into()]),
        ..Default::default()
    };
    let config = ConfigResolver::new(toml)
        .with_env(no_env)
        .with_overrides(ConfigOverrides {
            offline: true,
            ..Default::default()
        })
        .resolve()
        .unwrap();

    assert!(config.knowledge_base.is_none());
    assert!(config.translation.is_none());
    assert_eq!(config.max_in_flight, 4);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_validation_errors() {
    let base = parse_toml_config(FULL_TOML).unwrap();

    let mut toml = base.clone();
    toml.reference_locale = Some("it".into());
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());

    let mut toml = base.clone();
    toml.locales = Some(vec!["fr".into(), "FR".into()]);
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());

    let mut toml = base.clone();
    toml.knowledge_base.retry.initial_backoff_ms = Some(10_000);
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());

    let mut toml = base;
    toml.max_in_flight = Some(0);
    assert!(ConfigResolver::new(toml).with_env(no_env).resolve().is_err());
}

#[test]
fn test_invalid_env_number_is_config_error() {
    let toml = parse_toml_config(FULL_TOML).unwrap();
    let err = ConfigResolver::new(toml)
        .with_env(env_from(&[("PCAL_KB_BATCH_SIZE", "many")]))
        .resolve()
        .unwrap_err();
    assert!(err.to_string().contains("PCAL_KB_BATCH_SIZE"));
}

#[test]
fn test_load_explicit_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL_TOML.as_bytes()).unwrap();

    let loaded = load_toml_config(Some(file.path())).unwrap();
    assert_eq!(loaded.config.knowledge_base.batch_size, Some(50));
    assert_eq!(loaded.source.as_deref(), Some(file.path()));
}

#[test]
fn test_missing_explicit_config_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_toml_config(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_malformed_toml_is_error() {
    assert!(parse_toml_config("locales = [\"fr\"").is_err());
}

#[test]
#[serial]
fn test_process_environment_is_default_lookup() {
    std::env::set_var("PCAL_REPORT_PATH", "/tmp/pcal-report.json");

    let toml = parse_toml_config(FULL_TOML).unwrap();
    let config = ConfigResolver::new(toml).resolve().unwrap();
    assert_eq!(config.report_path, Some(PathBuf::from("/tmp/pcal-report.json")));

    // Cleanup
    std::env::remove_var("PCAL_REPORT_PATH");
}
