use std::cell::OnceCell;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

pub mod api;
pub mod credentials;
mod error;

pub use credentials::{resolve_credentials, CredentialSource, Credentials};
pub use error::{PvForecastError, Result};

const PRODUCTION_BASE_URL: &str = "https://api0.solar.sheffield.ac.uk/pvforecast/api/v4/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

const INVALID_KEY_MARKER: &str = "Your api key is not valid";
const NO_ACCESS_MARKER: &str = "Your account does not give access";

pub trait ApiClient {
    /// GET `path` (relative to the API root) and return the response body.
    fn http_get(&self, path: &str, query_string: &[(String, String)]) -> Result<String>;
}

/// Proxy addresses for plain and TLS traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxies {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl Proxies {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

#[derive(Debug)]
pub struct PvForecastApi {
    credentials: Credentials,
    base_url: String,
    proxies: Proxies,
    timeout: Duration,
    retries: u32,
    system_proxies: bool,
    /// Built on first request, reset by the `with_*` methods.
    http_client: OnceCell<reqwest::blocking::Client>,
}

impl PvForecastApi {
    pub fn new(credentials: Credentials) -> Self {
        PvForecastApi {
            credentials,
            base_url: PRODUCTION_BASE_URL.to_string(),
            proxies: Proxies::default(),
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            system_proxies: true,
            http_client: OnceCell::new(),
        }
    }

    /// Resolves credentials from arguments, environment and credentials files.
    pub fn from_default_sources(user_id: Option<String>, api_key: Option<String>) -> Result<Self> {
        let sources = credentials::default_sources(user_id, api_key);
        Ok(PvForecastApi::new(resolve_credentials(&sources)?))
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };
        self
    }

    pub fn with_proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = proxies;
        self.http_client = OnceCell::new();
        self
    }

    /// Whether `HTTP_PROXY`-style environment variables are honoured. On by default.
    pub fn with_system_proxies(mut self, enabled: bool) -> Self {
        self.system_proxies = enabled;
        self.http_client = OnceCell::new();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.http_client = OnceCell::new();
        self
    }

    /// Number of extra attempts after a non-2xx response, with exponential
    /// back-off starting at 500ms. Connection failures are never retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http_client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.http_client.get() {
            return Ok(client);
        }
        let client = self.build_http_client()?;
        Ok(self.http_client.get_or_init(|| client))
    }

    fn build_http_client(&self) -> Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::Client::builder().timeout(self.timeout);
        if !self.system_proxies {
            builder = builder.no_proxy();
        }
        if !self.proxies.is_empty() {
            debug!("using proxies {:?}", self.proxies);
        }
        if let Some(http) = &self.proxies.http {
            let proxy = reqwest::Proxy::http(http).map_err(|e| {
                PvForecastError::InvalidInput(format!("bad HTTP proxy '{}': {}", http, e))
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(https) = &self.proxies.https {
            let proxy = reqwest::Proxy::https(https).map_err(|e| {
                PvForecastError::InvalidInput(format!("bad HTTPS proxy '{}': {}", https, e))
            })?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| {
            PvForecastError::InvalidInput(format!("failed to build HTTP client: {}", e))
        })
    }

    fn full_query(&self, query_string: &[(String, String)]) -> Vec<(String, String)> {
        let mut qs = query_string.to_vec();
        qs.push(("user_id".to_string(), self.credentials.user_id.clone()));
        qs.push(("key".to_string(), self.credentials.api_key.clone()));
        qs.push(("data_format".to_string(), "json".to_string()));
        qs
    }
}

impl ApiClient for PvForecastApi {
    fn http_get(&self, path: &str, query_string: &[(String, String)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        let query = self.full_query(query_string);
        let http_client = self.http_client()?;

        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("GET {} {:?} (attempt {})", url, query_string, attempt);

            let response = http_client
                .get(&url)
                .query(&query)
                .send()
                .map_err(|source| PvForecastError::Network {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            let body = response.text().map_err(|source| PvForecastError::Network {
                url: url.clone(),
                source,
            })?;

            if status.is_success() {
                check_body(&body)?;
                return Ok(body);
            }

            if attempt > self.retries {
                return Err(PvForecastError::HttpStatus {
                    url,
                    status: status.as_u16(),
                    body,
                });
            }
            warn!(
                "HTTP {} from {}, retrying in {}ms",
                status.as_u16(),
                url,
                delay.as_millis()
            );
            sleep(delay);
            delay *= 2;
        }
    }
}

/// The API signals credential problems inside 200 responses.
fn check_body(body: &str) -> Result<()> {
    if body.contains(INVALID_KEY_MARKER) {
        return Err(PvForecastError::InvalidCredentials);
    }
    if body.contains(NO_ACCESS_MARKER) {
        return Err(PvForecastError::AccessDenied);
    }
    Ok(())
}
