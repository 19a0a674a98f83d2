//! Welcome To The Jungle: harvested job pages fetched concurrently from the
//! public API.

use async_trait::async_trait;
use futures::future::join_all;
use jobart_core::{RawListing, Source};
use jobart_storage::{fetch_json_with_retry, HttpClientConfig, HttpFetcher, JsonSource, RetryPolicy};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::links::LinkHarvester;
use crate::{AdapterError, SearchQuery, SourceAdapter};

pub const API_BASE: &str = "https://api.welcometothejungle.com/api/v1/organizations";
const COMPANIES_SEGMENT: &str = "/companies";

pub const SITE_HOST: &str = "welcometothejungle.com";

/// Job-page URLs of the site are rewritten onto the API; API URLs pass
/// through. Anything on another host is rejected.
pub fn api_link_from_page_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.starts_with(API_BASE) {
        return Some(url.to_string());
    }
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != SITE_HOST && !host.ends_with(&format!(".{SITE_HOST}")) {
        return None;
    }
    let (_, rest) = parsed.path().split_once(COMPANIES_SEGMENT)?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("{API_BASE}{rest}"))
}

/// The `job` object with `link` promoted from `job.links[0].href`. `None`
/// when the envelope has no `job`.
pub fn flatten_job_payload(payload: JsonValue) -> Option<JsonValue> {
    let JsonValue::Object(mut envelope) = payload else {
        return None;
    };
    let JsonValue::Object(mut job) = envelope.remove("job")? else {
        return None;
    };
    let link = job
        .get("links")
        .and_then(|links| links.get(0))
        .and_then(|first| first.get("href"))
        .cloned();
    if let Some(link) = link {
        job.insert("link".to_string(), link);
    }
    Some(JsonValue::Object(job))
}

/// Fetch every URL concurrently. Failed requests and envelopes without a job
/// are left out; order of the result is not meaningful.
pub async fn fetch_all<S>(source: &S, urls: &[String], policy: &RetryPolicy) -> Vec<RawListing>
where
    S: JsonSource + ?Sized,
{
    let responses = join_all(urls.iter().map(|url| async move {
        (url, fetch_json_with_retry(source, url, policy).await)
    }))
    .await;

    let mut listings = Vec::with_capacity(responses.len());
    for (url, response) in responses {
        match response {
            Ok(payload) => match flatten_job_payload(payload) {
                Some(job) => listings.push(RawListing::WelcomeToTheJungle(job)),
                None => debug!(url = %url, "response without job payload; skipped"),
            },
            Err(err) => warn!(url = %url, error = %err, "job fetch failed; excluded"),
        }
    }
    listings
}

pub struct WttjAdapter {
    harvester: Box<dyn LinkHarvester>,
    http: HttpClientConfig,
    retry: RetryPolicy,
}

impl WttjAdapter {
    pub fn new(harvester: Box<dyn LinkHarvester>, http: HttpClientConfig, retry: RetryPolicy) -> Self {
        Self {
            harvester,
            http,
            retry,
        }
    }

    async fn api_links(&self, job_title: &str) -> Result<Vec<String>, AdapterError> {
        let harvested = self.harvester.harvest(job_title).await?;
        let mut links = Vec::with_capacity(harvested.len());
        for url in harvested {
            match api_link_from_page_url(&url) {
                Some(link) => links.push(link),
                None => warn!(url = %url, "unrecognized job link; dropped"),
            }
        }
        Ok(links)
    }
}

#[async_trait]
impl SourceAdapter for WttjAdapter {
    fn source(&self) -> Source {
        Source::WelcomeToTheJungle
    }

    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
        let links = self.api_links(&query.keywords).await?;
        info!(source = %self.source(), query = %query.keywords, links = links.len(), "fetch start");
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let fetcher = HttpFetcher::new(self.http.clone())?;
        let listings = fetch_all(&fetcher, &links, &self.retry).await;
        info!(source = %self.source(), count = listings.len(), "fetch done");
        Ok(listings)
    }
}
