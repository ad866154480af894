//! Translation service client
//!
//! Concrete [`TranslationProvider`] speaking the DeepL v2 JSON API:
//!
//! ```text
//! POST {endpoint}
//! Authorization: DeepL-Auth-Key {api_key}
//! {"text": ["Tomate"], "source_lang": "FR", "target_lang": "PT-BR"}
//! → {"translations": [{"detected_source_language": "FR", "text": "Tomate"}]}
//! ```
//!
//! Source languages are sent as the bare language subtag (`PT`), targets as
//! the full uppercase code (`PT-BR`). One call = one request; rate limiting is
//! enforced here, retries and caching in the fallback stage.

use crate::error::TranslationError;
use crate::types::TranslationProvider;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use pcal_common::config::TranslationConfig;
use pcal_common::LocaleCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
}

/// DeepL-compatible translation client
pub struct TranslationClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TranslationClient {
    pub fn new(config: &TranslationConfig) -> Result<Self, TranslationError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TranslationError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn source_code(locale: &LocaleCode) -> String {
        locale.language().to_ascii_uppercase()
    }

    fn target_code(locale: &LocaleCode) -> String {
        locale.as_str().to_ascii_uppercase()
    }
}

#[async_trait]
impl TranslationProvider for TranslationClient {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(
        &self,
        text: &str,
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<String, TranslationError> {
        self.rate_limiter.until_ready().await;

        let body = TranslateRequest {
            text: [text],
            source_lang: Self::source_code(source),
            target_lang: Self::target_code(target),
        };

        debug!(source = %source, target = %target, "Requesting translation");

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("DeepL-Auth-Key {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslationError::Network(format!("Translation request failed: {}", e)))?;

        let status = response.status();
        match status.as_u16() {
            429 => return Err(TranslationError::RateLimited),
            456 => return Err(TranslationError::QuotaExceeded),
            _ if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TranslationError::Api(
                    status.as_u16(),
                    body.chars().take(200).collect(),
                ));
            }
            _ => {}
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::Parse(format!("Invalid translation response: {}", e)))?;

        let translated = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            return Err(TranslationError::Empty);
        }
        Ok(translated)
    }
}
