//!
//! Snapshot sources
//!
//! [`HttpJsonSource`] polls a remote administration endpoint and [`JsonFileSource`] re-reads a
//! file on disk. Both expect the same document: a JSON array with one object per entity, or
//! `null` when no data is available.
//!
use crate::catalog::Family;
use crate::snapshot::{snapshot_from_json, FetchError, Snapshot, SnapshotSource};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::*;

///
/// Basic authentication credentials for the statistics endpoint
///
pub struct Credentials {
    pub user: String,
    pub password: Option<SecretString>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

///
/// Connection to the statistics endpoint shared by every [`HttpJsonSource`]
///
#[derive(Debug)]
pub struct HttpConnection {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl HttpConnection {
    pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Arc<Self>> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| anyhow!("invalid URL '{}': {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("URL '{}' cannot be used as a base", base_url));
        }
        // Without a trailing slash, joining would replace the last path segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Arc::new(Self {
            client: Client::new(),
            base_url,
            credentials,
        }))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    ///
    /// Source for the snapshots of `family`
    ///
    pub fn source(self: &Arc<Self>, family: &Family) -> Result<HttpJsonSource> {
        let url = self.base_url.join(family.resource)?;
        Ok(HttpJsonSource {
            connection: Arc::clone(self),
            url,
        })
    }
}

#[derive(Debug)]
pub struct HttpJsonSource {
    connection: Arc<HttpConnection>,
    url: Url,
}

#[async_trait]
impl SnapshotSource for HttpJsonSource {
    async fn fetch(&self) -> Result<Option<Snapshot>, FetchError> {
        let mut request = self.connection.client.get(self.url.clone());
        if let Some(credentials) = &self.connection.credentials {
            request = request.basic_auth(
                &credentials.user,
                credentials.password.as_ref().map(|p| p.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!(
                "{} responded {}",
                self.url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        trace!("Fetched {} bytes from {}", body.len(), self.url);
        let document = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Malformed(format!("{}: {}", self.url, e)))?;
        snapshot_from_json(document)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

///
/// Reads a snapshot document from a file on every fetch
///
#[derive(Debug)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    ///
    /// Source reading `<dir>/<family resource>.json`
    ///
    pub fn in_dir(dir: &Path, family: &Family) -> Self {
        Self::new(dir.join(format!("{}.json", family.resource)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSource {
    async fn fetch(&self) -> Result<Option<Snapshot>, FetchError> {
        let contents = tokio::fs::read(&self.path).await?;
        let document = serde_json::from_slice(&contents)
            .map_err(|e| FetchError::Malformed(format!("{}: {}", self.path.display(), e)))?;
        snapshot_from_json(document)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
