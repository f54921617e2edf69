use statbridge_metrics::sources::{Credentials, HttpConnection, JsonFileSource};
use statbridge_metrics::{Family, SnapshotSource};

use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, io};
use tracing::*;

#[derive(Debug, clap::Args)]
pub struct SourceArgGroup {
    /// Base URL of the statistics endpoint. Each statistic family is fetched from a resource below
    /// it
    #[arg(long, env = "STATBRIDGE_URL", default_value = "http://localhost:7222")]
    url: String,

    /// User to authenticate as
    #[arg(long, env = "STATBRIDGE_USER", default_value = "admin")]
    user: String,

    /// File containing the password for --user. Pass "-" to read the password from stdin
    #[arg(long, conflicts_with = "password")]
    password_file: Option<PathBuf>,

    /// Password for --user. Prefer --password-file or the environment to keep it out of process
    /// listings
    #[arg(long, env = "STATBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Read each family's snapshot from <DIR>/<resource>.json instead of the statistics endpoint
    #[arg(long, conflicts_with_all = &["password_file", "password"])]
    source_file_dir: Option<PathBuf>,
}

///
/// Where every family's snapshots come from
///
#[derive(Debug)]
pub enum Sources {
    Http(Arc<HttpConnection>),
    Files(PathBuf),
}

impl Sources {
    pub fn for_family(&self, family: &Family) -> Result<Arc<dyn SnapshotSource>> {
        Ok(match self {
            Sources::Http(connection) => Arc::new(connection.source(family)?),
            Sources::Files(dir) => Arc::new(JsonFileSource::in_dir(dir, family)),
        })
    }
}

impl SourceArgGroup {
    fn read_password(&self) -> Result<Option<SecretString>> {
        let Some(path) = &self.password_file else {
            return Ok(self
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| SecretString::from(p.to_owned())));
        };

        let password = if path == &PathBuf::from("-") {
            io::read_to_string(io::stdin())
                .map_err(|e| anyhow!("Failed reading password from stdin: {e}"))?
        } else {
            fs::read_to_string(path)
                .map_err(|e| anyhow!("Failed reading '{}': {}", path.display(), e))?
        };
        let password = password.trim();
        Ok((!password.is_empty()).then(|| SecretString::from(password.to_owned())))
    }

    pub fn into_sources(self) -> Result<Sources> {
        if let Some(dir) = self.source_file_dir {
            info!("Reading snapshots from {}", dir.display());
            return Ok(Sources::Files(dir));
        }

        let password = self.read_password()?;
        info!(
            url = %self.url,
            user = %self.user,
            password = if password.is_some() { "<supplied>" } else { "<none>" },
            "Polling statistics endpoint"
        );
        let connection = HttpConnection::new(
            &self.url,
            Some(Credentials {
                user: self.user,
                password,
            }),
        )?;
        Ok(Sources::Http(connection))
    }
}
