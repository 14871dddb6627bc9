use std::sync::Arc;

use anyhow::Context;
use octocrab::models::AppId;
use octocrab::Octocrab;
use secrecy::{ExposeSecret, SecretVec};

use client::GithubInstallationClient;

use crate::bot::{ClientFactory, GithubClient};
use crate::github::InstallationId;

pub mod cache;
pub mod client;

pub use cache::{ResponseCache, DEFAULT_CACHE_CAPACITY};

/// Authenticates as the GitHub App and hands out clients for its installations.
pub struct GithubAppClient {
    client: Octocrab,
    cache: Arc<ResponseCache>,
}

impl GithubAppClient {
    /// Creates a client of the GitHub App with the given ID.
    pub async fn load(
        app_id: AppId,
        private_key: SecretVec<u8>,
        cache: Arc<ResponseCache>,
    ) -> anyhow::Result<GithubAppClient> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key.expose_secret().as_ref())
            .context("Could not encode private key")?;

        let client = Octocrab::builder()
            .app(app_id, key)
            .build()
            .context("Could not create octocrab builder")?;

        let app = client
            .current()
            .app()
            .await
            .context("Could not load Github App")?;
        tracing::info!("Loaded GitHub App {}", app.html_url);

        Ok(GithubAppClient { client, cache })
    }
}

impl ClientFactory for GithubAppClient {
    fn installation_client(
        &self,
        installation: InstallationId,
    ) -> anyhow::Result<Box<dyn GithubClient>> {
        let client = self
            .client
            .installation(octocrab::models::InstallationId(installation.0));
        Ok(Box::new(GithubInstallationClient::new(
            client,
            Arc::clone(&self.cache),
        )))
    }
}
