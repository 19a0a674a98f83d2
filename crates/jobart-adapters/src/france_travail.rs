//! Structured search API of France Travail, paged by result range.

use std::fmt;

use async_trait::async_trait;
use jobart_core::{RawListing, Source};
use jobart_storage::{FetchError, HttpClientConfig, HttpFetcher, RetryPolicy};
use reqwest::header::CONTENT_RANGE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{AdapterError, SearchQuery, SourceAdapter};

pub const DEFAULT_TOKEN_URL: &str =
    "https://entreprise.francetravail.fr/connexion/oauth2/access_token?realm=%2Fpartenaire";
pub const DEFAULT_SEARCH_URL: &str =
    "https://api.francetravail.io/partenaire/offresdemploi/v2/offres/search";
pub const CLIENT_ID_VAR: &str = "FRANCE_TRAVAIL_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "FRANCE_TRAVAIL_CLIENT_SECRET";
const SCOPE: &str = "api_offresdemploiv2 o2dsoffre";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const PAGE_SIZE: usize = 150;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(AdapterError::MissingCredential(name))
        };
        Ok(Self {
            client_id: read(CLIENT_ID_VAR)?,
            client_secret: read(CLIENT_SECRET_VAR)?,
        })
    }

    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FranceTravailEndpoints {
    pub token_url: String,
    pub search_url: String,
}

impl Default for FranceTravailEndpoints {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
        }
    }
}

impl FranceTravailEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_url: std::env::var("FRANCE_TRAVAIL_TOKEN_URL").unwrap_or(defaults.token_url),
            search_url: std::env::var("FRANCE_TRAVAIL_SEARCH_URL").unwrap_or(defaults.search_url),
        }
    }
}

/// Inclusive result range, rendered as `start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn starting_at(start: usize) -> Self {
        Self {
            start,
            end: start + PAGE_SIZE - 1,
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub total: usize,
    pub results: Vec<JsonValue>,
}

impl SearchPage {
    pub fn empty() -> Self {
        Self {
            total: 0,
            results: Vec::new(),
        }
    }
}

pub fn search_params(query: &SearchQuery, range: PageRange) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("motsCles", query.keywords.clone()),
        ("range", range.to_string()),
    ];
    if let Some(window) = query.creation_window {
        params.push(("minCreationDate", window.min.format(DATE_FORMAT).to_string()));
        params.push(("maxCreationDate", window.max.format(DATE_FORMAT).to_string()));
    }
    params
}

/// Total from a header such as `offres 0-149/320`.
pub fn parse_content_range_total(header: &str) -> Option<usize> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

/// One page request against the search endpoint.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search_page(&self, query: &SearchQuery, range: PageRange) -> Result<SearchPage, AdapterError>;
}

/// Request pages in increasing range order until `start >= total`. A failed
/// page stops the walk and hands back what was already collected.
pub async fn paginate<A>(api: &A, query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError>
where
    A: SearchApi + ?Sized,
{
    let mut collected = Vec::new();
    let mut start = 0usize;
    loop {
        let range = PageRange::starting_at(start);
        let page = match api.search_page(query, range).await {
            Ok(page) => page,
            Err(err) => {
                warn!(range = %range, collected = collected.len(), error = %err, "pagination aborted");
                return Err(AdapterError::PaginationAborted {
                    partial: collected,
                    source: Box::new(err),
                });
            }
        };
        debug!(range = %range, total = page.total, returned = page.results.len(), "search page");
        collected.extend(page.results.into_iter().map(RawListing::FranceTravail));

        start += PAGE_SIZE;
        if start >= page.total {
            break;
        }
    }
    Ok(collected)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    resultats: Vec<JsonValue>,
}

/// Authenticated session, alive for a single adapter invocation.
pub struct FranceTravailClient {
    fetcher: HttpFetcher,
    search_url: String,
    access_token: String,
    retry: RetryPolicy,
}

impl FranceTravailClient {
    pub async fn authenticate(
        fetcher: HttpFetcher,
        endpoints: &FranceTravailEndpoints,
        credentials: &Credentials,
        retry: RetryPolicy,
    ) -> Result<Self, AdapterError> {
        let url = endpoints.token_url.as_str();
        let resp = fetcher
            .client()
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", SCOPE),
            ])
            .send()
            .await
            .map_err(|source| request_error(url, source))?;

        if !resp.status().is_success() {
            return Err(AdapterError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        let token: TokenResponse = resp.json().await.map_err(|e| AdapterError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            fetcher,
            search_url: endpoints.search_url.clone(),
            access_token: token.access_token,
            retry,
        })
    }

    async fn send_page(&self, query: &SearchQuery, range: PageRange) -> Result<reqwest::Response, AdapterError> {
        let url = self.search_url.as_str();
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            let resp = self
                .fetcher
                .client()
                .get(url)
                .bearer_auth(&self.access_token)
                .query(&search_params(query, range))
                .send()
                .await
                .map_err(|source| request_error(url, source))?;

            let status = resp.status();
            if status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(resp);
            }
            if !self.retry.allows_retry_after(attempts) {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last: Box::new(FetchError::RateLimited { url: url.to_string() }),
                }
                .into());
            }
            warn!(url, range = %range, attempts, "API limit reached; backing off");
            tokio::time::sleep(self.retry.backoff).await;
        }
    }
}

fn request_error(url: &str, source: reqwest::Error) -> AdapterError {
    FetchError::Request {
        url: url.to_string(),
        source,
    }
    .into()
}

#[async_trait]
impl SearchApi for FranceTravailClient {
    async fn search_page(&self, query: &SearchQuery, range: PageRange) -> Result<SearchPage, AdapterError> {
        let url = self.search_url.as_str();
        let resp = self.send_page(query, range).await?;
        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(SearchPage::empty());
        }
        if !status.is_success() {
            return Err(AdapterError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let header_total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);
        let body: SearchBody = resp.json().await.map_err(|e| AdapterError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        // Without a total, stop after this page.
        let total = header_total.unwrap_or(range.start + body.resultats.len());
        Ok(SearchPage {
            total,
            results: body.resultats,
        })
    }
}

pub struct FranceTravailAdapter {
    endpoints: FranceTravailEndpoints,
    http: HttpClientConfig,
    retry: RetryPolicy,
    credentials: Option<Credentials>,
}

impl FranceTravailAdapter {
    pub fn new(endpoints: FranceTravailEndpoints, http: HttpClientConfig, retry: RetryPolicy) -> Self {
        Self {
            endpoints,
            http,
            retry,
            credentials: None,
        }
    }

    /// Use fixed credentials instead of reading the environment per run.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl SourceAdapter for FranceTravailAdapter {
    fn source(&self) -> Source {
        Source::FranceTravail
    }

    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
        let credentials = match &self.credentials {
            Some(c) => c.clone(),
            None => Credentials::from_env()?,
        };

        info!(source = %self.source(), query = %query.keywords, "fetch start");
        let fetcher = HttpFetcher::new(self.http.clone())?;
        let client =
            FranceTravailClient::authenticate(fetcher, &self.endpoints, &credentials, self.retry).await?;
        let listings = paginate(&client, query).await?;
        info!(source = %self.source(), count = listings.len(), "fetch done");
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct FakeApi {
        total: usize,
        fail_at: Option<usize>,
        ranges: Mutex<Vec<PageRange>>,
    }

    impl FakeApi {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at: None,
                ranges: Mutex::new(Vec::new()),
            }
        }

        fn ranges(&self) -> Vec<PageRange> {
            self.ranges.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchApi for FakeApi {
        async fn search_page(&self, _query: &SearchQuery, range: PageRange) -> Result<SearchPage, AdapterError> {
            self.ranges.lock().unwrap().push(range);
            if self.fail_at == Some(range.start) {
                return Err(AdapterError::Status {
                    status: 500,
                    url: "fake".into(),
                });
            }
            if self.total == 0 {
                return Ok(SearchPage::empty());
            }
            let end = range.end.min(self.total - 1);
            let results = (range.start..=end).map(|i| json!({"id": i.to_string()})).collect();
            Ok(SearchPage {
                total: self.total,
                results,
            })
        }
    }

    #[tokio::test]
    async fn pages_walk_ranges_until_total() {
        let api = FakeApi::new(320);
        let listings = paginate(&api, &SearchQuery::keywords("data analyst")).await.unwrap();

        assert_eq!(
            api.ranges(),
            vec![
                PageRange { start: 0, end: 149 },
                PageRange { start: 150, end: 299 },
                PageRange { start: 300, end: 449 },
            ]
        );
        assert_eq!(listings.len(), 320);
        assert_eq!(listings[0].payload()["id"], "0");
        assert_eq!(listings[319].payload()["id"], "319");
    }

    #[tokio::test]
    async fn zero_results_stop_after_first_request() {
        let api = FakeApi::new(0);
        let listings = paginate(&api, &SearchQuery::keywords("x")).await.unwrap();
        assert!(listings.is_empty());
        assert_eq!(api.ranges().len(), 1);
    }

    #[tokio::test]
    async fn failed_page_keeps_earlier_results() {
        let api = FakeApi {
            fail_at: Some(150),
            ..FakeApi::new(320)
        };
        let err = paginate(&api, &SearchQuery::keywords("x")).await.unwrap_err();
        assert_eq!(api.ranges().len(), 2);
        match err {
            AdapterError::PaginationAborted { partial, source } => {
                assert_eq!(partial.len(), 150);
                assert!(matches!(*source, AdapterError::Status { status: 500, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn content_range_total_is_parsed() {
        assert_eq!(parse_content_range_total("offres 0-149/320"), Some(320));
        assert_eq!(parse_content_range_total("offres 0-149"), None);
    }

    #[test]
    fn creation_window_adds_both_bounds() {
        let range = PageRange::starting_at(150);
        let plain = search_params(&SearchQuery::keywords("data engineer"), range);
        assert_eq!(
            plain,
            vec![("motsCles", "data engineer".to_string()), ("range", "150-299".to_string())]
        );

        let query = SearchQuery::keywords("data engineer").with_creation_window(Some(crate::CreationWindow {
            min: "2024-01-01T00:00:00Z".parse().unwrap(),
            max: "2024-01-31T23:59:59Z".parse().unwrap(),
        }));
        let params = search_params(&query, range);
        assert_eq!(params[2], ("minCreationDate", "2024-01-01T00:00:00Z".to_string()));
        assert_eq!(params[3], ("maxCreationDate", "2024-01-31T23:59:59Z".to_string()));
    }

    #[test]
    fn missing_credentials_are_reported_by_name() {
        let err = Credentials::from_lookup(|name| (name == CLIENT_ID_VAR).then(|| "id".to_string()))
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingCredential(CLIENT_SECRET_VAR)));

        let creds = Credentials::from_lookup(|name| Some(format!("{name}-value"))).unwrap();
        assert!(!format!("{creds:?}").contains("SECRET-value"));
    }

    #[tokio::test]
    async fn adapter_fails_before_network_without_credentials() {
        let adapter = FranceTravailAdapter::new(
            FranceTravailEndpoints {
                token_url: "http://127.0.0.1:9/token".into(),
                search_url: "http://127.0.0.1:9/search".into(),
            },
            HttpClientConfig::default(),
            RetryPolicy::default(),
        );
        if std::env::var(CLIENT_ID_VAR).is_ok() && std::env::var(CLIENT_SECRET_VAR).is_ok() {
            return;
        }
        let err = adapter.fetch(&SearchQuery::keywords("x")).await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingCredential(_)));
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
        if !status.starts_with("204") {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn token_ok() -> String {
        http_response(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"access_token":"tok-123"}"#,
        )
    }

    fn offers(ids: &[&str]) -> String {
        json!({"resultats": ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>()}).to_string()
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Local HTTP server answering each connection with the next canned
    /// response, in order. Raw requests are recorded.
    async fn serve(responses: Vec<String>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                seen.lock().unwrap().push(request);
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });
        (addr, requests)
    }

    fn adapter_for(addr: SocketAddr, retry: RetryPolicy) -> FranceTravailAdapter {
        FranceTravailAdapter::new(
            FranceTravailEndpoints {
                token_url: format!("http://{addr}/token"),
                search_url: format!("http://{addr}/search"),
            },
            HttpClientConfig::default(),
            retry,
        )
        .with_credentials(Credentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        })
    }

    fn ids(listings: &[RawListing]) -> Vec<String> {
        listings
            .iter()
            .map(|l| l.payload()["id"].as_str().unwrap().to_string())
            .collect()
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::forever(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn client_authenticates_then_follows_content_range_total() {
        let (addr, requests) = serve(vec![
            token_ok(),
            http_response("206 Partial Content", &[("Content-Range", "offres 0-149/200")], &offers(&["a", "b"])),
            http_response("200 OK", &[("Content-Range", "offres 150-299/200")], &offers(&["c"])),
        ])
        .await;

        let listings = adapter_for(addr, quick_retry())
            .fetch(&SearchQuery::keywords("data analyst"))
            .await
            .unwrap();
        assert_eq!(ids(&listings), vec!["a", "b", "c"]);

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("POST /token"));
        assert!(requests[0].contains("grant_type=client_credentials"));
        assert!(requests[0].contains("client_secret=secret"));
        assert!(requests[0].contains("scope=api_offresdemploiv2+o2dsoffre"));

        let first_page = requests[1].to_lowercase();
        assert!(first_page.starts_with("get /search?"));
        assert!(first_page.contains("motscles=data+analyst"));
        assert!(first_page.contains("range=0-149"));
        assert!(first_page.contains("authorization: bearer tok-123"));
        assert!(requests[2].contains("range=150-299"));
    }

    #[tokio::test]
    async fn rate_limited_page_is_retried_and_no_content_is_empty() {
        let (addr, requests) = serve(vec![
            token_ok(),
            http_response("429 Too Many Requests", &[], ""),
            http_response("204 No Content", &[], ""),
        ])
        .await;

        let listings = adapter_for(addr, quick_retry())
            .fetch(&SearchQuery::keywords("data analyst"))
            .await
            .unwrap();
        assert!(listings.is_empty());

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("range=0-149"));
        assert!(requests[2].contains("range=0-149"));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_aborts_pagination() {
        let (addr, _requests) = serve(vec![
            token_ok(),
            http_response("429 Too Many Requests", &[], ""),
            http_response("429 Too Many Requests", &[], ""),
        ])
        .await;

        let err = adapter_for(addr, RetryPolicy::bounded(2, Duration::from_millis(10)))
            .fetch(&SearchQuery::keywords("data analyst"))
            .await
            .unwrap_err();
        match err {
            AdapterError::PaginationAborted { partial, source } => {
                assert!(partial.is_empty());
                assert!(matches!(
                    *source,
                    AdapterError::Http(FetchError::Exhausted { attempts: 2, .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_content_range_stops_after_first_page() {
        let (addr, requests) = serve(vec![
            token_ok(),
            http_response("200 OK", &[("Content-Type", "application/json")], &offers(&["a", "b"])),
        ])
        .await;

        let listings = adapter_for(addr, quick_retry())
            .fetch(&SearchQuery::keywords("data analyst"))
            .await
            .unwrap();
        assert_eq!(ids(&listings), vec!["a", "b"]);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejected_token_request_is_a_status_error() {
        let (addr, _requests) = serve(vec![http_response("401 Unauthorized", &[], "")]).await;

        let err = adapter_for(addr, quick_retry())
            .fetch(&SearchQuery::keywords("data analyst"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Status { status: 401, .. }));
    }
}
