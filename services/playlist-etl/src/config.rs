use std::{path::PathBuf, time};
use url::Url;
use crate::errors::EtlError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 3;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Spotify caps playlist-track pages at 100 items
pub const SPOTIFY_MAX_PAGE: u32 = 100;

/// Fixed storage layout shared by both handlers
pub const RAW_DATA_PATH: &str       = "raw_data/to_processed/";
pub const PROCESSED_DATA_PATH: &str = "raw_data/processed_data/";
pub const SONGS_PATH: &str          = "transformed_data/songs_data/";
pub const ALBUMS_PATH: &str         = "transformed_data/album_data/";
pub const ARTISTS_PATH: &str        = "transformed_data/artist_data/";

/// Source of configuration values, normally the process environment
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Env for std::collections::HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Returns a config error when the variable is unset or blank
fn env_check(env: &impl Env, s: &str) -> Result<String, EtlError> {
    match env.var(s) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EtlError::Config(format!("{s} was not set"))),
    }
}

fn env_or<T: std::str::FromStr>(env: &impl Env, s: &str, default: T) -> T {
    env.var(s)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Derives the bare playlist id from a share link, a spotify: uri or an id
pub fn playlist_id(link: &str) -> Result<String, EtlError> {
    let without_query = link.trim().split('?').next().unwrap_or_default();
    let id = without_query.rsplit(['/', ':']).next().unwrap_or_default().trim();

    if id.is_empty() {
        return Err(EtlError::Config(format!("no playlist id in {link:?}")));
    }
    Ok(id.to_string())
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub playlist_id: String,
    pub page_limit: u32,
    pub follow_pages: bool,
    pub max_retries: u8
}

fn build_spotify(env: &impl Env, playlist: Option<String>) ->
    Result<SpotifyConfig, EtlError> {
    let client_id     = env_check(env, "SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check(env, "SPOTIFY_CLIENT_SECRET")?;

    let playlist = match playlist {
        Some(p) => p,
        None => env_check(env, "SPOTIFY_PLAYLIST")?
    };
    let playlist_id = playlist_id(&playlist)?;

    // form urls
    let token_url = env.var("SPOTIFY_TOKEN_URL")
        .unwrap_or_else(|| "https://accounts.spotify.com/api/token".to_string());
    let api_base = env.var("SPOTIFY_API_BASE")
        .unwrap_or_else(|| "https://api.spotify.com/v1/".to_string());

    let token_url = Url::parse(&token_url)
        .map_err(|e| EtlError::Config(format!("SPOTIFY_TOKEN_URL invalid {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| EtlError::Config(format!("SPOTIFY_API_BASE invalid {e}")))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(EtlError::Config)?;
    ensure_https(&api_base).map_err(EtlError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(EtlError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(EtlError::Config)?;
    ensure_trailing_slash(&mut api_base);

    let page_limit   = env_or(env, "SPOTIFY_PAGE_LIMIT", SPOTIFY_MAX_PAGE)
        .clamp(1, SPOTIFY_MAX_PAGE);
    let follow_pages = env_or(env, "SPOTIFY_FOLLOW_PAGES", true);
    let max_retries  = env_or(env, "SPOTIFY_MAX_RETRIES", RETRY_MAX_ATTEMPTS);

    Ok( SpotifyConfig {
        client_id, client_secret, token_url, api_base,
        playlist_id, page_limit, follow_pages, max_retries
    })
}

///
/// Configuration for the object store both handlers share
///
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub root: PathBuf
}

fn build_storage(env: &impl Env) -> Result<StorageConfig, EtlError> {
    let bucket = env_check(env, "BUCKET_NAME")
        .map_err(|_| EtlError::Config(
            "Bucket name not configured in environment variables".to_string()
        ))?;

    if bucket.contains(['/', '\\']) || bucket.trim() == ".." {
        return Err(EtlError::Config(format!("BUCKET_NAME invalid: {bucket}")));
    }

    let root = env.var("STORAGE_ROOT")
        .filter(|r| !r.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"));

    Ok( StorageConfig { bucket: bucket.trim().to_string(), root } )
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,playlist_etl=debug,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: false,
            include_file_line: true,
            include_target: true
        }
    }
}

pub fn build_logging(env: &impl Env) -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if let Some(format) = env.var("LOG_FORMAT") {
        if format.trim().eq_ignore_ascii_case("pretty") {
            logging.format = LogFormat::Pretty;
            logging.with_ansi = true;
        }
    }
    logging
}

///
/// Config handed to the extractor
///
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub spotify: SpotifyConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig
}

///
/// Config handed to the transformer, which never talks to spotify
///
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub storage: StorageConfig
}

///
/// Reads `.env` into the process environment, then hands back the
/// environment every builder below reads from
///
pub fn load_env() -> ProcessEnv {
    dotenvy::dotenv().ok();
    ProcessEnv
}

///
/// Validates everything the extractor needs before any request goes out
///
pub fn extract_config_from(env: &impl Env, playlist: Option<String>) ->
    Result<ExtractConfig, EtlError> {
    let storage = build_storage(env)?;
    let spotify = build_spotify(env, playlist)?;

    let mut http = HttpConfig::default();
    http.retry.max_attempts = spotify.max_retries;

    Ok( ExtractConfig { spotify, storage, http } )
}

pub fn transform_config_from(env: &impl Env) -> Result<TransformConfig, EtlError> {
    let storage = build_storage(env)?;
    Ok( TransformConfig { storage } )
}
