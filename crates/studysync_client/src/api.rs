//! The remote events API.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
use chrono::SecondsFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use studysync_protocol::{is_valid_study_name, wire, Page, PageRequest, StudyDescriptor};
use tracing::{debug, warn};

const BODY_EXCERPT: usize = 200;

/// Operations the sync engine needs from the remote service.
///
/// Implementations surface a classified [`ClientError`]; deciding whether a
/// failure ends a sync is left to the caller.
pub trait RemoteApi: Send + Sync {
    /// Fetches one page of events for a study.
    fn fetch_page(&self, study: &str, request: &PageRequest) -> ClientResult<Page>;

    /// Lists the studies visible to the credential.
    fn list_studies(&self) -> ClientResult<Vec<StudyDescriptor>>;

    /// Returns true if the credential can read the given study.
    fn test_connection(&self, study: &str) -> bool {
        self.fetch_page(study, &PageRequest::first(1)).is_ok()
    }

    /// Total number of events the remote holds for a study, if reported.
    fn remote_total(&self, study: &str) -> ClientResult<Option<u64>> {
        Ok(self.fetch_page(study, &PageRequest::first(1))?.total)
    }
}

/// Remote client with bearer authentication and retries.
pub struct ApiClient<C: HttpClient = ReqwestClient> {
    config: ClientConfig,
    http: C,
    retries: AtomicU64,
}

impl ApiClient<ReqwestClient> {
    /// Creates a client backed by `reqwest`.
    pub fn connect(config: ClientConfig) -> ClientResult<Self> {
        Self::new(config, ReqwestClient::new()?)
    }
}

impl<C: HttpClient> ApiClient<C> {
    /// Creates a client over any [`HttpClient`].
    pub fn new(config: ClientConfig, http: C) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http,
            retries: AtomicU64::new(0),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of retries performed since creation.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    fn events_path(study: &str) -> ClientResult<String> {
        if !is_valid_study_name(study) {
            return Err(ClientError::InvalidConfig(format!("invalid study name: {study:?}")));
        }
        Ok(format!("/v1/studies/{study}/events"))
    }

    /// Sends a GET with the retry policy applied and returns the body.
    fn get_with_retry(&self, path: &str, query: Vec<(String, String)>) -> ClientResult<Vec<u8>> {
        let request = HttpRequest {
            url: format!("{}{}", self.config.base_url, path),
            query,
            bearer: self.config.api_key.expose().to_string(),
            timeout: self.config.timeout,
        };
        let retry = &self.config.retry;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.http.get(&request).and_then(|response| classify(path, response));

            match result {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < retry.max_attempts() => {
                    let delay = match &err {
                        ClientError::RateLimited {
                            retry_after: Some(after),
                        } => retry.cap(*after),
                        _ => retry.delay_for_retry(attempt),
                    };
                    warn!(
                        path,
                        attempt,
                        max_attempts = retry.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed, retrying"
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) => {
                    debug!(path, attempt, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }
}

/// Maps an HTTP response onto the error taxonomy.
fn classify(path: &str, response: HttpResponse) -> ClientResult<Vec<u8>> {
    if response.is_success() {
        return Ok(response.body);
    }

    let message = excerpt(&response.body);
    Err(match response.status {
        401 | 403 => ClientError::Unauthorized(message),
        404 => ClientError::NotFound(path.to_string()),
        408 => ClientError::timeout(format!("server reported request timeout: {message}")),
        429 => ClientError::RateLimited {
            retry_after: response.retry_after,
        },
        status @ 400..=499 => ClientError::Rejected { status, message },
        status => ClientError::ServerError { status, message },
    })
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out: String = text.chars().take(BODY_EXCERPT).collect();
    if text.chars().count() > BODY_EXCERPT {
        out.push_str("...");
    }
    out
}

impl<C: HttpClient> RemoteApi for ApiClient<C> {
    fn fetch_page(&self, study: &str, request: &PageRequest) -> ClientResult<Page> {
        let path = Self::events_path(study)?;
        let mut query = vec![
            ("offset".to_string(), request.offset.to_string()),
            ("limit".to_string(), request.limit.to_string()),
        ];
        if let Some(since) = request.since {
            query.push((
                "since".to_string(),
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }

        let body = self.get_with_retry(&path, query)?;
        let page = wire::decode_page(&body, request)?;
        debug!(
            study,
            offset = request.offset,
            events = page.len(),
            more = !page.is_last(),
            "fetched page"
        );
        Ok(page)
    }

    fn list_studies(&self) -> ClientResult<Vec<StudyDescriptor>> {
        match self.get_with_retry("/v1/studies", Vec::new()) {
            Ok(body) => Ok(wire::decode_studies(&body)?),
            Err(ClientError::NotFound(_)) => {
                debug!("remote has no study listing, using configured studies");
                Ok(self
                    .config
                    .known_studies
                    .iter()
                    .map(StudyDescriptor::named)
                    .collect())
            }
            Err(err) => Err(err),
        }
    }

    fn test_connection(&self, study: &str) -> bool {
        match self.fetch_page(study, &PageRequest::first(1)) {
            Ok(_) => true,
            Err(err) => {
                warn!(study, error = %err, "connection test failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, RetryConfig};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed list of responses and records requests.
    struct ScriptedHttp {
        responses: Mutex<VecDeque<ClientResult<HttpResponse>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<ClientResult<HttpResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for ScriptedHttp {
        fn get(&self, request: &HttpRequest) -> ClientResult<HttpResponse> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::transport("no scripted response")))
        }
    }

    fn client(responses: Vec<ClientResult<HttpResponse>>, retries: u32) -> ApiClient<ScriptedHttp> {
        let config = ClientConfig::new("https://api.example.com", ApiKey::new("token-1"))
            .with_retry(RetryConfig::immediate(retries));
        ApiClient::new(config, ScriptedHttp::new(responses)).unwrap()
    }

    fn page_body(ids: &[&str], total: u64) -> HttpResponse {
        let events: Vec<_> = ids
            .iter()
            .map(|id| serde_json::json!({"id": id, "stored": "2024-01-01T00:00:00Z"}))
            .collect();
        HttpResponse::new(200, serde_json::json!({"events": events, "total": total}).to_string())
    }

    #[test]
    fn fetch_page_sends_credential_and_query() {
        let api = client(vec![Ok(page_body(&["a", "b"], 2))], 0);
        let since = chrono::DateTime::parse_from_rfc3339("2024-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        let page = api
            .fetch_page("demo", &PageRequest::first(2).since(Some(since)))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.is_last());

        let requests = api.http.requests.lock();
        assert_eq!(requests[0].url, "https://api.example.com/v1/studies/demo/events");
        assert_eq!(requests[0].bearer, "token-1");
        assert!(requests[0]
            .query
            .contains(&("since".to_string(), "2024-02-01T10:00:00.000Z".to_string())));
        assert!(requests[0].query.contains(&("limit".to_string(), "2".to_string())));
    }

    #[test]
    fn transient_failures_are_retried() {
        let api = client(
            vec![
                Err(ClientError::timeout("slow")),
                Ok(HttpResponse::new(503, "unavailable")),
                Ok(page_body(&["a"], 1)),
            ],
            3,
        );

        let page = api.fetch_page("demo", &PageRequest::first(10)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(api.retries(), 2);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let api = client(
            vec![
                Ok(HttpResponse::new(500, "boom")),
                Ok(HttpResponse::new(500, "boom")),
                Ok(HttpResponse::new(500, "boom")),
                Ok(page_body(&["a"], 1)),
            ],
            2,
        );

        let err = api.fetch_page("demo", &PageRequest::first(10)).unwrap_err();
        assert!(matches!(err, ClientError::ServerError { status: 500, .. }));
        assert_eq!(api.http.requests.lock().len(), 3);
    }

    #[test]
    fn auth_failures_are_not_retried() {
        let api = client(
            vec![Ok(HttpResponse::new(401, "bad token")), Ok(page_body(&["a"], 1))],
            5,
        );

        let err = api.fetch_page("demo", &PageRequest::first(10)).unwrap_err();
        assert!(err.is_auth());
        assert_eq!(api.http.requests.lock().len(), 1);
        assert_eq!(api.retries(), 0);
    }

    #[test]
    fn not_found_is_not_retried() {
        let api = client(vec![Ok(HttpResponse::new(404, ""))], 5);
        let err = api.fetch_page("missing", &PageRequest::first(10)).unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[test]
    fn rate_limit_uses_retry_after() {
        let mut limited = HttpResponse::new(429, "slow down");
        limited.retry_after = Some(std::time::Duration::from_secs(120));
        // max_delay is zero for immediate retries, so the sleep is capped away
        let api = client(vec![Ok(limited), Ok(page_body(&["a"], 1))], 1);

        assert!(api.fetch_page("demo", &PageRequest::first(10)).is_ok());
        assert_eq!(api.retries(), 1);
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let api = client(vec![Ok(HttpResponse::new(200, "<html>"))], 3);
        let err = api.fetch_page("demo", &PageRequest::first(10)).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert_eq!(api.retries(), 0);
    }

    #[test]
    fn invalid_study_name_is_rejected_locally() {
        let api = client(vec![], 0);
        let err = api.fetch_page("../admin", &PageRequest::first(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
        assert!(api.http.requests.lock().is_empty());
    }

    #[test]
    fn list_studies_falls_back_on_404() {
        let config = ClientConfig::new("https://api.example.com", ApiKey::new("k"))
            .with_retry(RetryConfig::no_retry())
            .with_known_studies(vec!["demo-study".into()]);
        let api = ApiClient::new(config, ScriptedHttp::new(vec![Ok(HttpResponse::new(404, ""))]))
            .unwrap();

        let studies = api.list_studies().unwrap();
        assert_eq!(studies, vec![StudyDescriptor::named("demo-study")]);
    }

    #[test]
    fn connection_test_and_remote_total() {
        let api = client(
            vec![
                Ok(page_body(&["a"], 250)),
                Ok(HttpResponse::new(403, "")),
                Ok(page_body(&["a"], 250)),
            ],
            0,
        );
        assert!(api.test_connection("demo"));
        assert!(!api.test_connection("demo"));
        assert_eq!(api.remote_total("demo").unwrap(), Some(250));
    }

    #[test]
    fn missing_credential_fails_construction() {
        let config = ClientConfig::new("https://api.example.com", ApiKey::new(""));
        let result = ApiClient::new(config, ScriptedHttp::new(vec![]));
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }
}
