//! Blocking HTTP transport for the action API.
//!
//! # Design
//! [`Connection`] holds the session's host, port, and API key; the
//! [`Transport`] trait is the I/O seam between the action client and the
//! network, so tests can substitute a scripted transport without opening
//! sockets. Every call builds a fresh blocking HTTP client that is dropped
//! on all exit paths — long row-by-row datastore batches must not
//! accumulate pooled connections.
//!
//! The body text is returned for *all* HTTP statuses; interpreting the
//! envelope (or an HTML fault page) belongs to the decode layer. No retry
//! happens here — retry is a policy of the datastore operations only.

use std::path::Path;

use log::debug;

use crate::error::CkanError;
use crate::types::Resource;

/// Header carrying the API key on every request.
///
/// The service historically read `X-CKAN-API-Key` on JSON calls and
/// `Authorization` on uploads; it accepts `Authorization` on both, so this
/// client sends only that. TODO: confirm against a live legacy deployment
/// before relying on this with older installs.
const API_KEY_HEADER: &str = "Authorization";

/// Issues blocking POST requests and returns the raw response body.
pub trait Transport {
    /// POST a JSON body to `path` (resolved against the configured
    /// host/port) and return the response text.
    fn post(&self, path: &str, body: &str) -> Result<String, CkanError>;

    /// POST a resource as a multipart form with the file at `file_path` as
    /// the upload part.
    fn post_multipart(
        &self,
        path: &str,
        resource: &Resource,
        file_path: &Path,
    ) -> Result<String, CkanError>;
}

/// Connection details for one session with the catalogue service.
///
/// Immutable after construction except the API key, which the client sets
/// once when it takes ownership. One connection belongs to exactly one
/// client; it is not meant to be shared across credential sessions.
#[derive(Debug, Clone)]
pub struct Connection {
    host: String,
    port: u16,
    api_key: String,
}

impl Connection {
    /// `host` carries the scheme, e.g. `"https://demo.ckan.org"`.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            port,
            api_key: String::new(),
        }
    }

    pub(crate) fn set_api_key(&mut self, key: &str) {
        self.api_key = key.to_string();
    }

    fn url(&self, path: &str) -> String {
        format!("{}:{}{}", self.host, self.port, path)
    }

    // Fresh client per call; sockets are released when it drops.
    fn http_client(&self) -> Result<reqwest::blocking::Client, CkanError> {
        Ok(reqwest::blocking::Client::builder().build()?)
    }
}

impl Transport for Connection {
    fn post(&self, path: &str, body: &str) -> Result<String, CkanError> {
        let url = self.url(path);
        debug!("POST {url} ({} bytes)", body.len());
        let client = self.http_client()?;
        let response = client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()?;
        Ok(response.text()?)
    }

    fn post_multipart(
        &self,
        path: &str,
        resource: &Resource,
        file_path: &Path,
    ) -> Result<String, CkanError> {
        let url = self.url(path);
        debug!("POST {url} (multipart, file {})", file_path.display());
        let mut form = reqwest::blocking::multipart::Form::new();
        for (name, value) in multipart_parts(resource) {
            form = form.text(name, value);
        }
        let form = form.file("upload", file_path)?;
        let client = self.http_client()?;
        let response = client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()?;
        Ok(response.text()?)
    }
}

/// Text fields of an upload form, in order. The `url` field is always sent
/// blank — the content arrives as the file part, not a link — and `id` is
/// included only when the resource targets an existing one (its absence
/// tells the server to create).
pub(crate) fn multipart_parts(resource: &Resource) -> Vec<(&'static str, String)> {
    let mut parts = vec![
        ("package_id", resource.package_id.clone()),
        ("name", resource.name.clone()),
        ("description", resource.description.clone()),
        ("format", resource.format.clone()),
        ("mimetype", resource.mimetype.clone()),
        ("url", String::new()),
    ];
    if let Some(id) = resource.wire_id() {
        parts.push(("id", id.to_string()));
    }
    parts
}
