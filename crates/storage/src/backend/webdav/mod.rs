//! WebDAV storage backend.
//!
//! Speaks the small subset of RFC 4918 the gateway needs: `PROPFIND` for
//! metadata and listings, `MKCOL` for directories, and plain `PUT`/`GET`/
//! `DELETE` plus `MOVE` for everything else. Fingerprints of uploaded files
//! are computed locally; for discovered files the server's entity tag stands
//! in for one.

mod multistatus;

use crate::error::{ErrorKind, Result};
use crate::fingerprint::Fingerprinter;
use crate::{ResourceMeta, StorageBackend, path};
use async_trait::async_trait;
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LOCATION};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode, Url, redirect};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Characters escaped within a single path segment of a request URL.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const PROPFIND_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<d:propfind xmlns:d="DAV:"><d:prop>"#,
    r#"<d:resourcetype/><d:getcontentlength/><d:getlastmodified/><d:getetag/>"#,
    r#"</d:prop></d:propfind>"#,
);

/// Connection settings for a [`WebDavBackend`].
#[derive(Debug, Clone)]
pub struct WebDavOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout, covering connect and the whole body.
    pub timeout: Duration,
    /// Set to `false` to accept self-signed certificates.
    pub verify_tls: bool,
}
impl Default for WebDavOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            verify_tls: true,
        }
    }
}

/// Storage backend talking to a remote WebDAV service.
///
/// Every backend path is resolved against `base_url`, whose path component
/// (if any) becomes the root of the namespace.
pub struct WebDavBackend {
    name: String,
    client: Client,
    base_url: Url,
    /// Decoded path component of `base_url`, without surrounding slashes.
    base_path: String,
    username: Option<String>,
    password: Option<String>,
}

impl WebDavBackend {
    pub fn new(name: impl Into<String>, base_url: &str, options: WebDavOptions) -> Result<Self> {
        let mut url = Url::parse(base_url).or_raise(|| ErrorKind::InvalidPath(base_url.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::InvalidPath(base_url.to_string()));
        }
        if !url.path().ends_with('/') {
            let with_slash = format!("{}/", url.path());
            url.set_path(&with_slash);
        }
        let base_path = percent_decode_str(url.path())
            .decode_utf8()
            .or_raise(|| ErrorKind::InvalidPath(base_url.to_string()))?
            .trim_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            // Followed redirects turn PROPFIND, DELETE and MOVE into GET.
            .redirect(redirect::Policy::none())
            .user_agent(concat!("davcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Transport("failed to build HTTP client".to_string()))?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: url,
            base_path,
            username: options.username,
            password: options.password,
        })
    }

    /// Base URL every request is resolved against (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL of a normalized path. Collections get a trailing slash.
    fn url(&self, path: &str, collection: bool) -> Result<Url> {
        let mut relative = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        if collection && !relative.is_empty() {
            relative.push('/');
        }
        self.base_url.join(&relative).or_raise(|| ErrorKind::InvalidPath(path.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(username) => builder.basic_auth(username, self.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, method: &str, path: &str) -> Result<Response> {
        let response = builder.send().await.or_raise(|| ErrorKind::Transport(format!("{method} /{path} failed")))?;
        tracing::debug!(method, path, status = response.status().as_u16(), "WebDAV response");
        Ok(response)
    }

    /// Sends `method` to `path`; when the server redirects to the collection
    /// form of the URL, resends once with the trailing slash. `decorate` is
    /// told which form the request targets.
    async fn send_resolving_collection(
        &self,
        method: Method,
        path: &str,
        decorate: impl Fn(RequestBuilder, bool) -> RequestBuilder,
    ) -> Result<Response> {
        let label = method.to_string();
        let first = decorate(self.request(method.clone(), self.url(path, false)?), false);
        let response = self.send(first, &label, path).await?;
        let redirected = matches!(
            response.status(),
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        );
        if !redirected || path.is_empty() {
            return Ok(response);
        }
        tracing::debug!(
            method = %label,
            path,
            location = ?response.headers().get(LOCATION),
            "redirected, retrying as collection"
        );
        self.send(decorate(self.request(method, self.url(path, true)?), true), &label, path).await
    }

    fn custom_method(name: &'static str) -> Result<Method> {
        Method::from_bytes(name.as_bytes()).or_raise(|| ErrorKind::Protocol(format!("invalid method {name}")))
    }

    fn unexpected(method: &str, path: &str, status: StatusCode) -> ErrorKind {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::PermissionDenied(path.to_string()),
            status => ErrorKind::Transport(format!("{method} /{path}: unexpected status {status}")),
        }
    }

    /// Issues a `PROPFIND`, `None` when the server reports the path missing.
    async fn propfind(&self, path: &str, depth: &'static str) -> Result<Option<Vec<ResourceMeta>>> {
        let response = self
            .send_resolving_collection(Self::custom_method("PROPFIND")?, path, |request, _| {
                request
                    .header("Depth", depth)
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"))
                    .body(PROPFIND_BODY)
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .or_raise(|| ErrorKind::Transport(format!("PROPFIND /{path}: failed to read body")))?;
                Ok(Some(multistatus::parse(&body, &self.base_path)?))
            },
            status => exn::bail!(Self::unexpected("PROPFIND", path, status)),
        }
    }
}

#[async_trait]
impl StorageBackend for WebDavBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        let mkcol = Self::custom_method("MKCOL")?;
        for ancestor in path::ancestors(&path) {
            let request = self.request(mkcol.clone(), self.url(ancestor, true)?);
            let status = self.send(request, "MKCOL", ancestor).await?.status();
            match status {
                status if status.is_success() => tracing::debug!(path = ancestor, "created collection"),
                // Collection already exists.
                StatusCode::METHOD_NOT_ALLOWED => {},
                // Intermediate collection missing; the next level will tell.
                StatusCode::CONFLICT => tracing::warn!(path = ancestor, "MKCOL conflict, continuing"),
                status => exn::bail!(Self::unexpected("MKCOL", ancestor, status)),
            }
        }
        Ok(())
    }

    #[instrument(skip(self, source), fields(backend = %self.name))]
    async fn upload(&self, path: &str, source: &Path) -> Result<ResourceMeta> {
        let path = path::normalize(path)?;
        if path.is_empty() {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        if let Some(parent) = path::parent(&path) {
            self.ensure_directory(parent).await?;
        }
        let file = tokio::fs::File::open(source).await.map_err(ErrorKind::Io)?;
        let length = file.metadata().await.map_err(ErrorKind::Io)?.len();
        // Hashed as the body streams out, so the file is read once.
        let hashed = Arc::new(Mutex::new(Fingerprinter::default()));
        let stream = ReaderStream::new(file).inspect_ok({
            let hashed = Arc::clone(&hashed);
            move |chunk| hashed.lock().unwrap_or_else(PoisonError::into_inner).update(chunk)
        });
        let request = self
            .request(Method::PUT, self.url(&path, false)?)
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(stream));
        let status = self.send(request, "PUT", &path).await?.status();
        if !status.is_success() {
            exn::bail!(Self::unexpected("PUT", &path, status));
        }
        let (digest, size) = {
            let fingerprinter = hashed.lock().unwrap_or_else(PoisonError::into_inner);
            (fingerprinter.finish(), fingerprinter.bytes())
        };
        Ok(ResourceMeta::file(path, size, OffsetDateTime::now_utc()).with_fingerprint(digest))
    }

    #[instrument(skip(self, destination), fields(backend = %self.name))]
    async fn download(&self, path: &str, destination: &Path) -> Result<()> {
        let path = path::normalize(path)?;
        if path.is_empty() {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        let response = self.send(self.request(Method::GET, self.url(&path, false)?), "GET", &path).await?;
        match response.status() {
            StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(path)),
            status if status.is_success() => {},
            status => exn::bail!(Self::unexpected("GET", &path, status)),
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        let mut file = tokio::fs::File::create(destination).await.map_err(ErrorKind::Io)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.or_raise(|| ErrorKind::Transport(format!("GET /{path}: failed to read body")))?;
            file.write_all(&chunk).await.map_err(ErrorKind::Io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(ErrorKind::Io)?;
        tracing::debug!(path = %path, bytes = written, "downloaded");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        match self.send_resolving_collection(Method::DELETE, &path, |request, _| request).await?.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => exn::bail!(Self::unexpected("DELETE", &path, status)),
        }
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        if let Some(parent) = path::parent(&to) {
            self.ensure_directory(parent).await?;
        }
        let destinations = [self.url(&to, false)?, self.url(&to, true)?];
        let response = self
            .send_resolving_collection(Self::custom_method("MOVE")?, &from, |request, collection| {
                request
                    .header("Destination", destinations[usize::from(collection)].as_str())
                    .header("Overwrite", "T")
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(from)),
            status if status.is_success() => Ok(()),
            status => exn::bail!(Self::unexpected("MOVE", &from, status)),
        }
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn stat(&self, path: &str) -> Result<Option<ResourceMeta>> {
        let path = path::normalize(path)?;
        let Some(entries) = self.propfind(&path, "0").await? else {
            return Ok(None);
        };
        // Servers may answer with a canonicalized href; the requested path wins.
        let index = entries.iter().position(|entry| entry.path == path).unwrap_or(0);
        Ok(entries.into_iter().nth(index).map(|entry| ResourceMeta { path, ..entry }))
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn list_directory(&self, path: &str) -> Result<Vec<ResourceMeta>> {
        let path = path::normalize(path)?;
        let Some(entries) = self.propfind(&path, "1").await? else {
            return Ok(Vec::new());
        };
        Ok(entries
            .into_iter()
            .filter(|entry| path::strip_ancestor(&path, &entry.path).is_some_and(|rest| !rest.contains('/')))
            .collect())
    }
}
