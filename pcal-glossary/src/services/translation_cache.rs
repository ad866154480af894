//! Translation cache
//!
//! SQLite store of successful translations keyed by
//! `(source_text, source_locale, target_locale)`. Writes are append-only
//! (`INSERT OR IGNORE`): the first translation stored for a key is the one
//! every later run reuses, which keeps reruns stable and off the provider's
//! quota.
//!
//! One writer process at a time; the pool holds a single connection.

use crate::error::CacheError;
use chrono::Utc;
use pcal_common::LocaleCode;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Cache key for one translation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TranslationKey {
    pub source_text: String,
    pub source_locale: LocaleCode,
    pub target_locale: LocaleCode,
}

impl TranslationKey {
    pub fn new(source_text: impl Into<String>, source_locale: LocaleCode, target_locale: LocaleCode) -> Self {
        Self {
            source_text: source_text.into(),
            source_locale,
            target_locale,
        }
    }
}

/// Persistent (or in-memory) translation cache
#[derive(Clone)]
pub struct TranslationCache {
    pool: SqlitePool,
}

impl TranslationCache {
    /// Open or create the cache database at `path`
    pub async fn open(path: &Path) -> Result<Self, CacheError> {
        let open_error = |source| CacheError::Open {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_error(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(open_error)?;

        let cache = Self { pool };
        cache.init_table().await.map_err(open_error)?;

        tracing::debug!(path = %path.display(), "Translation cache opened");
        Ok(cache)
    }

    /// Cache that lives only for this process
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // The database disappears with its connection: never recycle it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let cache = Self { pool };
        cache.init_table().await?;
        Ok(cache)
    }

    async fn init_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS translation_cache (
                source_text TEXT NOT NULL,
                source_locale TEXT NOT NULL,
                target_locale TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_text, source_locale, target_locale)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cached translation for `key`, if any
    pub async fn get(&self, key: &TranslationKey) -> Result<Option<String>, CacheError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT translated_text FROM translation_cache \
             WHERE source_text = ? AND source_locale = ? AND target_locale = ?",
        )
        .bind(&key.source_text)
        .bind(key.source_locale.as_str())
        .bind(key.target_locale.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(text,)| text))
    }

    /// Store a translation; an existing entry for `key` is kept
    pub async fn put(&self, key: &TranslationKey, translated: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT OR IGNORE INTO translation_cache \
             (source_text, source_locale, target_locale, translated_text, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&key.source_text)
        .bind(key.source_locale.as_str())
        .bind(key.target_locale.as_str())
        .bind(translated)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of cached translations
    pub async fn len(&self) -> Result<u64, CacheError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM translation_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str, source: &str, target: &str) -> TranslationKey {
        TranslationKey::new(
            text,
            LocaleCode::parse(source).unwrap(),
            LocaleCode::parse(target).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = TranslationCache::in_memory().await.unwrap();
        let k = key("Tomate", "fr", "de");

        assert_eq!(cache.get(&k).await.unwrap(), None);
        cache.put(&k, "Tomate").await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap().as_deref(), Some("Tomate"));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let cache = TranslationCache::in_memory().await.unwrap();
        let k = key("Laitue", "fr", "en");

        cache.put(&k, "Lettuce").await.unwrap();
        cache.put(&k, "Salad").await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap().as_deref(), Some("Lettuce"));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_includes_both_locales() {
        let cache = TranslationCache::in_memory().await.unwrap();
        cache.put(&key("Carotte", "fr", "de"), "Karotte").await.unwrap();

        assert_eq!(cache.get(&key("Carotte", "fr", "es")).await.unwrap(), None);
        assert_eq!(cache.get(&key("Carotte", "en", "de")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_cache_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("translations.db");
        let k = key("Tomate", "fr", "pt-BR");

        let cache = TranslationCache::open(&path).await.unwrap();
        cache.put(&k, "Tomate").await.unwrap();
        cache.close().await;

        let reopened = TranslationCache::open(&path).await.unwrap();
        assert_eq!(reopened.get(&k).await.unwrap().as_deref(), Some("Tomate"));
    }
}
