use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, LINK, LOCATION, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info};

use crate::config::ClientSettings;
use crate::error::PeelError;

/// A fully read HTTP reply, reduced to what the UniProt contract needs.
#[derive(Debug, Clone, Default)]
pub struct HttpReply {
    pub status: u16,
    pub location: Option<String>,
    pub link: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_redirect(&self) -> bool {
        self.status == 303
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, PeelError> {
        serde_json::from_slice(&self.body).map_err(|err| PeelError::UniprotPayload(err.to_string()))
    }
}

/// Pass 2xx and 303 replies through; anything else becomes a status error
/// carrying the server's error body.
pub fn ensure_success(reply: HttpReply) -> Result<HttpReply, PeelError> {
    if (200..300).contains(&reply.status) || reply.is_redirect() {
        return Ok(reply);
    }
    let message = reply.text();
    info!(status = reply.status, body = %message, "uniprot rejected request");
    Err(PeelError::UniprotStatus {
        status: reply.status,
        message,
    })
}

pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpReply, PeelError>> + Send;

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> impl Future<Output = Result<HttpReply, PeelError>> + Send;
}

/// Hands out one transport per resolution or annotation phase. The
/// transport, and its connection pool, is dropped when the phase ends.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(&self) -> Result<Self::Transport, PeelError>;
}

#[derive(Debug, Clone)]
pub struct UniprotConnector {
    settings: ClientSettings,
}

impl UniprotConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Connector for UniprotConnector {
    type Transport = UniprotHttpClient;

    fn connect(&self) -> Result<UniprotHttpClient, PeelError> {
        UniprotHttpClient::new(&self.settings)
    }
}

pub struct UniprotHttpClient {
    client: Client,
    connect_retries: usize,
}

impl UniprotHttpClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, PeelError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("peeling/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PeelError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout())
            .pool_max_idle_per_host(settings.max_idle_connections)
            .redirect(Policy::none())
            .build()
            .map_err(|err| PeelError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            connect_retries: settings.connect_retries,
        })
    }

    async fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, PeelError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send().await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if attempt < self.connect_retries && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(attempt, delay_ms = delay, error = %err, "retrying connection");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(PeelError::UniprotHttp(err.to_string()));
                }
            }
        }
    }

    async fn read_reply(response: Response) -> Result<HttpReply, PeelError> {
        let status = response.status().as_u16();
        let location = header_string(response.headers(), LOCATION);
        let link = header_string(response.headers(), LINK);
        let body = response
            .bytes()
            .await
            .map_err(|err| PeelError::UniprotHttp(err.to_string()))?;
        Ok(HttpReply {
            status,
            location,
            link,
            body: body.to_vec(),
        })
    }
}

impl Transport for UniprotHttpClient {
    async fn get(&self, url: &str) -> Result<HttpReply, PeelError> {
        let response = self.send_with_retries(|| self.client.get(url)).await?;
        Self::read_reply(response).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<HttpReply, PeelError> {
        let response = self
            .send_with_retries(|| self.client.post(url).form(form))
            .await?;
        Self::read_reply(response).await
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

// Connection-level failures only; a reply with any status is never retried.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
