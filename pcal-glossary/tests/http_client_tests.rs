//! HTTP client tests against in-process mock services
//!
//! Each test binds an axum router on 127.0.0.1:0 standing in for the SPARQL
//! endpoint or the translation API, and counts requests through shared state.

use axum::{
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use pcal_common::config::{KnowledgeBaseConfig, RetryPolicy, TranslationConfig};
use pcal_common::LocaleCode;
use pcal_glossary::error::{ResolutionError, TranslationError};
use pcal_glossary::services::{
    BatchOutcome, KnowledgeBaseResolver, TranslationClient, WikidataClient,
};
use pcal_glossary::{KnowledgeBase, ScientificName, TranslationProvider};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Serve `app` on an ephemeral port, returning its base URL
async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server error");
    });
    format!("http://{}", addr)
}

fn locale(raw: &str) -> LocaleCode {
    LocaleCode::parse(raw).expect("valid locale")
}

fn name(raw: &str) -> ScientificName {
    ScientificName::parse(raw).expect("valid name")
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

// ============================================================================
// Knowledge base (SPARQL)
// ============================================================================

#[derive(Clone, Default)]
struct SparqlState {
    requests: Arc<AtomicUsize>,
    /// Respond 429 to this many requests before answering
    rate_limited: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

async fn sparql_handler(
    State(state): State<SparqlState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let throttled = state
        .rate_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if throttled {
        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
    }

    assert_eq!(
        headers.get("accept").and_then(|v| v.to_str().ok()),
        Some("application/sparql-results+json")
    );
    let query = form.get("query").cloned().unwrap_or_default();
    state.queries.lock().expect("lock").push(query.clone());

    let mut bindings = Vec::new();
    if query.contains("\"Solanum lycopersicum\"") {
        bindings.push(json!({
            "taxonName": {"type": "literal", "value": "Solanum lycopersicum"},
            "label": {"type": "literal", "xml:lang": "en", "value": "Tomato"}
        }));
        bindings.push(json!({
            "taxonName": {"type": "literal", "value": "Solanum lycopersicum"},
            "label": {"type": "literal", "xml:lang": "pt-br", "value": "Tomate"}
        }));
    }

    Json(json!({
        "head": {"vars": ["taxonName", "label"]},
        "results": {"bindings": bindings}
    }))
    .into_response()
}

async fn failing_sparql_handler(State(state): State<SparqlState>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "query timeout").into_response()
}

fn kb_config(endpoint: String) -> KnowledgeBaseConfig {
    KnowledgeBaseConfig {
        endpoint,
        user_agent: "pcal-glossary-tests/0.1".to_string(),
        batch_size: 10,
        locales_per_query: None,
        requests_per_second: 1000,
        timeout: Duration::from_secs(5),
        retry: quick_retry(),
    }
}

#[tokio::test]
async fn test_wikidata_client_maps_labels() {
    let state = SparqlState::default();
    let app = Router::new()
        .route("/sparql", post(sparql_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;
    let client = WikidataClient::new(&kb_config(format!("{}/sparql", base))).expect("client");

    let labels = client
        .query_labels(
            &[name("Solanum_lycopersicum"), name("Daucus_carota")],
            &[locale("en"), locale("pt-BR")],
        )
        .await
        .expect("query succeeds");

    assert_eq!(labels.len(), 2);
    assert_eq!(
        labels.get(&(name("Solanum_lycopersicum"), locale("pt-BR"))).map(String::as_str),
        Some("Tomate")
    );
    let queries = state.queries.lock().expect("lock").clone();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].contains(r#"FILTER(LANG(?label) IN ("en", "pt-br"))"#));
}

#[tokio::test]
async fn test_wikidata_client_classifies_http_errors() {
    let state = SparqlState::default();
    state.rate_limited.store(1, Ordering::SeqCst);
    let app = Router::new()
        .route("/sparql", post(sparql_handler))
        .route("/broken", post(failing_sparql_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;

    let client = WikidataClient::new(&kb_config(format!("{}/sparql", base))).expect("client");
    let err = client
        .query_labels(&[name("Solanum_lycopersicum")], &[locale("en")])
        .await
        .expect_err("first request is throttled");
    assert_eq!(err, ResolutionError::RateLimited);

    let broken = WikidataClient::new(&kb_config(format!("{}/broken", base))).expect("client");
    let err = broken
        .query_labels(&[name("Solanum_lycopersicum")], &[locale("en")])
        .await
        .expect_err("server error");
    assert!(matches!(err, ResolutionError::Api(500, ref body) if body == "query timeout"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_resolver_retries_through_rate_limiting() {
    let state = SparqlState::default();
    state.rate_limited.store(2, Ordering::SeqCst);
    let app = Router::new()
        .route("/sparql", post(sparql_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;
    let config = kb_config(format!("{}/sparql", base));
    let client = Arc::new(WikidataClient::new(&config).expect("client"));
    let resolver = KnowledgeBaseResolver::new(client, &config, 2);

    let names: BTreeSet<ScientificName> = [name("Solanum_lycopersicum")].into_iter().collect();
    let locales: BTreeSet<LocaleCode> = [locale("en")].into_iter().collect();
    let resolution = resolver
        .resolve_batch(&names, &locales, &CancellationToken::new())
        .await;

    assert_eq!(state.requests.load(Ordering::SeqCst), 3);
    assert_eq!(resolution.failed_batches().count(), 0);
    assert_eq!(
        resolution
            .labels
            .get(&(name("Solanum_lycopersicum"), locale("en")))
            .map(String::as_str),
        Some("Tomato")
    );
}

#[tokio::test]
async fn test_resolver_gives_up_after_retry_bound() {
    let state = SparqlState::default();
    let app = Router::new()
        .route("/sparql", post(failing_sparql_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;
    let config = kb_config(format!("{}/sparql", base));
    let resolver = KnowledgeBaseResolver::new(
        Arc::new(WikidataClient::new(&config).expect("client")),
        &config,
        1,
    );

    let names: BTreeSet<ScientificName> = [name("Solanum_lycopersicum")].into_iter().collect();
    let locales: BTreeSet<LocaleCode> = [locale("en")].into_iter().collect();
    let resolution = resolver
        .resolve_batch(&names, &locales, &CancellationToken::new())
        .await;

    // max_retries = 2 → 3 attempts
    assert_eq!(state.requests.load(Ordering::SeqCst), 3);
    assert!(resolution.labels.is_empty());
    assert!(matches!(
        resolution.batches[0].outcome,
        BatchOutcome::Failure { attempts: 3, .. }
    ));
}

// ============================================================================
// Translation service
// ============================================================================

#[derive(Clone, Default)]
struct TranslateState {
    requests: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

async fn translate_handler(
    State(state): State<TranslateState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    state.auth.lock().expect("lock").push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    state.bodies.lock().expect("lock").push(body.clone());

    let text = body["text"][0].as_str().unwrap_or_default();
    let target = body["target_lang"].as_str().unwrap_or_default();
    let translated = match (text, target) {
        ("Tomate", "DE") => "Tomate",
        ("Carotte", "DE") => "Karotte",
        ("Vide", _) => "",
        _ => return (StatusCode::BAD_REQUEST, "unsupported").into_response(),
    };

    Json(json!({
        "translations": [{"detected_source_language": "FR", "text": translated}]
    }))
    .into_response()
}

async fn quota_handler() -> Response {
    (StatusCode::from_u16(456).expect("valid status"), "Quota exceeded").into_response()
}

fn translation_config(endpoint: String, api_key: Option<&str>) -> TranslationConfig {
    TranslationConfig {
        endpoint,
        api_key: api_key.map(str::to_string),
        user_agent: "pcal-glossary-tests/0.1".to_string(),
        requests_per_second: 1000,
        timeout: Duration::from_secs(5),
        retry: quick_retry(),
    }
}

#[tokio::test]
async fn test_translation_client_request_and_response() {
    let state = TranslateState::default();
    let app = Router::new()
        .route("/v2/translate", post(translate_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;
    let client = TranslationClient::new(&translation_config(
        format!("{}/v2/translate", base),
        Some("secret-key"),
    ))
    .expect("client");

    let translated = client
        .translate("Carotte", &locale("fr"), &locale("de"))
        .await
        .expect("translation succeeds");

    assert_eq!(translated, "Karotte");
    assert_eq!(
        state.bodies.lock().expect("lock")[0],
        json!({"text": ["Carotte"], "source_lang": "FR", "target_lang": "DE"})
    );
    assert_eq!(
        state.auth.lock().expect("lock")[0].as_deref(),
        Some("DeepL-Auth-Key secret-key")
    );
}

#[tokio::test]
async fn test_translation_client_error_mapping() {
    let state = TranslateState::default();
    let app = Router::new()
        .route("/v2/translate", post(translate_handler))
        .route("/quota", post(quota_handler))
        .with_state(state.clone());
    let base = spawn_server(app).await;

    let client =
        TranslationClient::new(&translation_config(format!("{}/v2/translate", base), None))
            .expect("client");
    assert_eq!(
        client.translate("Vide", &locale("fr"), &locale("de")).await,
        Err(TranslationError::Empty)
    );
    let err = client
        .translate("Inconnu", &locale("fr"), &locale("de"))
        .await
        .expect_err("unsupported pair");
    assert!(matches!(err, TranslationError::Api(400, _)));
    assert!(!err.is_retryable());
    assert_eq!(state.auth.lock().expect("lock")[0], None);

    let quota = TranslationClient::new(&translation_config(format!("{}/quota", base), None))
        .expect("client");
    assert_eq!(
        quota.translate("Tomate", &locale("fr"), &locale("de")).await,
        Err(TranslationError::QuotaExceeded)
    );
}
