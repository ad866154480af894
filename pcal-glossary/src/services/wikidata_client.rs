//! Wikidata SPARQL client
//!
//! Concrete [`KnowledgeBase`]: resolves scientific names to taxon items via
//! `wdt:P225` (taxon name) and reads their `wdt:P1843` (taxon common name)
//! values, which carry a language tag per value.
//!
//! One call = one SPARQL request covering a batch of names and locales.
//! Rate limiting is enforced here (token bucket, `requests_per_second`);
//! batching, retries and failure isolation live in the resolver.
//!
//! API Documentation: https://www.mediawiki.org/wiki/Wikidata_Query_Service/User_Manual

use crate::error::ResolutionError;
use crate::types::{KnowledgeBase, LabelMap, ScientificName};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use pcal_common::config::KnowledgeBaseConfig;
use pcal_common::LocaleCode;
use reqwest::{header, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// SPARQL JSON results (`application/sparql-results+json`)
#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
    #[serde(rename = "xml:lang")]
    lang: Option<String>,
}

/// Wikidata Query Service client
pub struct WikidataClient {
    /// HTTP client with configured timeouts
    client: Client,
    /// SPARQL endpoint URL
    endpoint: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl WikidataClient {
    /// Create client from knowledge-base settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built (TLS backend failure)
    pub fn new(config: &KnowledgeBaseConfig) -> Result<Self, ResolutionError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ResolutionError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Build the SPARQL query for one batch
    ///
    /// Names are sent in their space-separated form; language tags are
    /// lowercase (`pt-br`), as stored by Wikidata.
    pub fn build_query(names: &[ScientificName], locales: &[LocaleCode]) -> String {
        let values = names
            .iter()
            .map(|n| sparql_literal(&n.display_form()))
            .collect::<Vec<_>>()
            .join(" ");
        let langs = locales
            .iter()
            .map(|l| sparql_literal(&l.to_lowercase_tag()))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "SELECT ?taxonName ?label WHERE {{\n  \
               VALUES ?taxonName {{ {values} }}\n  \
               ?item wdt:P225 ?taxonName .\n  \
               ?item wdt:P1843 ?label .\n  \
               FILTER(LANG(?label) IN ({langs}))\n\
             }}"
        )
    }

    /// Map SPARQL bindings back onto requested (name, locale) pairs
    ///
    /// When a taxon has several common names in one language the
    /// lexicographically smallest wins, so the result does not depend on the
    /// service's row order.
    fn collect_labels(
        response: SparqlResponse,
        names: &[ScientificName],
        locales: &[LocaleCode],
    ) -> LabelMap {
        let mut labels = LabelMap::new();

        for binding in response.results.bindings {
            let (Some(taxon), Some(label)) = (binding.get("taxonName"), binding.get("label"))
            else {
                continue;
            };
            let Some(name) = ScientificName::parse(&taxon.value) else {
                continue;
            };
            if !names.contains(&name) {
                continue;
            }
            let Some(locale) = label
                .lang
                .as_deref()
                .and_then(|tag| LocaleCode::parse(tag).ok())
            else {
                continue;
            };
            if !locales.contains(&locale) {
                continue;
            }

            let text = label.value.trim();
            if text.is_empty() {
                continue;
            }

            labels
                .entry((name, locale))
                .and_modify(|current| {
                    if text < current.as_str() {
                        *current = text.to_string();
                    }
                })
                .or_insert_with(|| text.to_string());
        }

        labels
    }
}

#[async_trait]
impl KnowledgeBase for WikidataClient {
    fn name(&self) -> &'static str {
        "wikidata"
    }

    async fn query_labels(
        &self,
        names: &[ScientificName],
        locales: &[LocaleCode],
    ) -> Result<LabelMap, ResolutionError> {
        if names.is_empty() || locales.is_empty() {
            return Ok(LabelMap::new());
        }

        // Wait for rate limiter permit
        self.rate_limiter.until_ready().await;

        let query = Self::build_query(names, locales);
        debug!(
            endpoint = %self.endpoint,
            names = names.len(),
            locales = locales.len(),
            "Querying knowledge base"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/sparql-results+json")
            .form(&[("query", query.as_str())])
            .send()
            .await
            .map_err(|e| ResolutionError::Network(format!("SPARQL request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ResolutionError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolutionError::Api(status.as_u16(), truncate(&body, 200)));
        }

        let parsed: SparqlResponse = response
            .json()
            .await
            .map_err(|e| ResolutionError::Parse(format!("Invalid SPARQL response: {}", e)))?;

        let labels = Self::collect_labels(parsed, names, locales);
        debug!(labels = labels.len(), "Knowledge-base query complete");
        Ok(labels)
    }
}

/// Quote a string as a SPARQL literal
fn sparql_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
