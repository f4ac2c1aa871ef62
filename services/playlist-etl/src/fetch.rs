//!
//! src/fetch.rs  Andrew Belles  Sept 10th, 2025
//!
//! Defines methods for hitting the spotify playlist endpoints and
//! returning unparsed data, handling retries, tokens, paging etc.
//!

use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{Client, header, redirect, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{HttpConfig, RetryConfig, SpotifyConfig};
use crate::errors::EtlError;

/// Guards against a `next` chain that never terminates
const MAX_PAGES: usize = 1000;

/// Anything that can hand back the raw playlist-tracks listing
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Value, EtlError>;
}

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, EtlError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| EtlError::Http(format!("build client: {e}")))
}

/// Simple function to generate random wait for http_with_retry
fn generate_backoff(base: Duration, attempt: u8, rng: &mut SmallRng) -> Duration {
    let exp = base * (1_u32 << attempt.min(6));
    let jitter = Duration::from_millis(rng.gen_range(50..=200));
    exp + jitter
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers.get(header::RETRY_AFTER)?
        .to_str().ok()?
        .trim()
        .parse::<u64>().ok()
        .map(Duration::from_secs)
}

/// Sends the request, retrying 429/5xx and transport errors, and decodes json
async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<Value, EtlError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_u8;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| EtlError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp.json::<Value>().await?);
                }
                let wait = retry_after(resp.headers());
                let body = resp.text().await.unwrap_or_default();
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt >= retry.max_attempts {
                    return Err(upstream_status(status, &body));
                }
                let backoff = wait.unwrap_or_else(||
                    generate_backoff(retry.base_backoff, attempt, &mut rng));
                warn!(status = %status, backoff_ms = backoff.as_millis() as u64, "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt >= retry.max_attempts {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

fn upstream_status(status: StatusCode, body: &str) -> EtlError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN =>
            EtlError::Upstream(format!("spotify rejected credentials ({status}): {snippet}")),
        _ => EtlError::Upstream(format!("spotify returned {status}: {snippet}"))
    }
}

///
/// Appends the items of `page` onto `first`, keeping the first page's envelope
///
pub fn merge_page(first: &mut Value, page: &mut Value) -> Result<(), EtlError> {
    let incoming = page.get_mut("items")
        .and_then(Value::as_array_mut)
        .map(std::mem::take)
        .ok_or_else(|| EtlError::Parse("page has no items array".to_string()))?;
    let items = first.get_mut("items")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| EtlError::Parse("first page has no items array".to_string()))?;
    items.extend(incoming);
    Ok(())
}

fn next_link(page: &Value) -> Option<String> {
    page.get("next")?.as_str().map(str::to_string)
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig,
    pub retry: RetryConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) -> Result<Self, EtlError> {
        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone()
        })
    }

    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/playlists/{id}/tracks?limit=&offset=
    pub fn playlist_page(&self, playlist_id: &str, offset: u32, bearer: &str) ->
        Result<RequestBuilder, EtlError> {
        let url = self.cfg.api_base.join(&format!("playlists/{playlist_id}/tracks"))
            .map_err(|e| EtlError::Config(format!("playlist url: {e}")))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("limit", self.cfg.page_limit.to_string()),
            ("offset", offset.to_string())
        ]))
    }

    /// Follows a `next` link, which must stay on the configured api host
    pub fn next_page(&self, next: &str, bearer: &str) -> Result<RequestBuilder, EtlError> {
        let url = Url::parse(next)
            .map_err(|e| EtlError::Parse(format!("next link {next:?}: {e}")))?;
        if url.host_str() != self.cfg.api_base.host_str() {
            return Err(EtlError::Parse(format!("next link leaves api host: {url}")));
        }
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// Client-credentials exchange
    pub async fn access_token(&self) -> Result<String, EtlError> {
        let token = http_with_retry(self.token_request(), &self.retry).await?;
        token.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EtlError::Upstream("token response had no access_token".to_string()))
    }
}

#[async_trait]
impl PlaylistSource for SpotifyClient {
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Value, EtlError> {
        let bearer = self.access_token().await?;
        debug!(playlist_id, "spotify.token");

        let mut listing = http_with_retry(
            self.playlist_page(playlist_id, 0, &bearer)?, &self.retry
        ).await?;
        let mut next = next_link(&listing);
        let mut pages = 1_usize;

        while self.cfg.follow_pages {
            let Some(link) = next.take() else { break };
            if pages >= MAX_PAGES {
                warn!(playlist_id, pages, "spotify.page_cap");
                break;
            }
            let mut page = http_with_retry(self.next_page(&link, &bearer)?, &self.retry).await?;
            next = next_link(&page);
            merge_page(&mut listing, &mut page)?;
            pages += 1;
        }

        if let Some(object) = listing.as_object_mut() {
            if self.cfg.follow_pages {
                object.insert("next".to_string(), Value::Null);
            }
        }

        let items = listing.get("items").and_then(Value::as_array).map_or(0, Vec::len);
        info!(playlist_id, pages, items, "spotify.playlist_tracks");
        Ok(listing)
    }
}
