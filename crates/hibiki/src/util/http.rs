use std::{ops::Deref, sync::Arc};

use bytes::Bytes;
use reqwest::{header::RANGE, Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::{util::range::ByteRange, HibikiError, HibikiResult};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap();

        Self {
            client,
            cookies_store,
        }
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) {
        let url = url.into_url().unwrap();
        let mut lock = self.cookies_store.lock().unwrap();
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
    }

    /// Fetch a (possibly ranged) byte blob, trying each URI in order until one
    /// succeeds. Index and init segment fetches go through here; manifest
    /// fetching does not.
    pub async fn fetch_bytes(
        &self,
        uris: &[Url],
        range: Option<&ByteRange>,
    ) -> HibikiResult<Bytes> {
        let mut last_error = None;

        for url in uris {
            let mut request = self.client.get(url.clone());
            if let Some(range) = range {
                request = request.header(RANGE, range.to_http_range());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if let Ok(body) = response.text().await {
                            tracing::warn!(%url, %status, "Error body: {body}");
                        }
                        last_error = Some(HibikiError::HttpError(status));
                        continue;
                    }
                    return Ok(response.bytes().await?);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Byte fetch failed");
                    last_error = Some(HibikiError::RequestError(e));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| HibikiError::MalformedManifest("No URIs to fetch".to_string())))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Client::builder())
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
