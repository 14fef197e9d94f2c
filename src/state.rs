//! Application context shared by every handler.

use crate::{
    config::{AppConfig, StorageBackend},
    services::{
        converter_service::{DocumentConverter, PandocConverter},
        document_service::DocumentService,
        identity_service::{IdentityProvider, SupabaseAuth},
        session_service::{CookieSigner, SessionManager},
        storage_service::{LocalObjectStorage, ObjectStorage, url_with_segments},
        supabase_storage::SupabaseStorage,
        view_service::Views,
    },
};
use anyhow::{Context, Result};
use reqwest::Url;
use std::{sync::Arc, time::Duration};

/// Built once at startup and read-only afterwards; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionManager,
    pub documents: DocumentService,
    pub views: Arc<Views>,
    /// Set when buckets live on local disk and `/public` serves them.
    pub local_storage: Option<Arc<LocalObjectStorage>>,
}

impl AppState {
    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building HTTP client")?;

        let identity: Arc<dyn IdentityProvider> = Arc::new(
            SupabaseAuth::new(client.clone(), &config.supabase_url, config.supabase_key.clone())
                .context("configuring Supabase Auth")?,
        );

        let mut local_storage = None;
        let storage: Arc<dyn ObjectStorage> = match config.storage_backend {
            StorageBackend::Supabase => Arc::new(
                SupabaseStorage::new(client, &config.supabase_url, config.supabase_key.clone())
                    .context("configuring Supabase Storage")?,
            ),
            StorageBackend::Local => {
                let local = Arc::new(LocalObjectStorage::new(
                    config.storage_dir.clone(),
                    local_public_base(&config.public_base_url)?,
                ));
                local_storage = Some(local.clone());
                local
            }
        };

        let converter: Arc<dyn DocumentConverter> =
            Arc::new(PandocConverter::new(config.pandoc.clone()));

        Self::new(config, identity, storage, converter, local_storage)
    }

    /// Assemble the state from already-built collaborators.
    pub fn new(
        config: AppConfig,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn ObjectStorage>,
        converter: Arc<dyn DocumentConverter>,
        local_storage: Option<Arc<LocalObjectStorage>>,
    ) -> Result<Self> {
        let signer = CookieSigner::new(&config.secret_token)
            .map_err(|err| anyhow::anyhow!("invalid SECRET_TOKEN: {}", err))?;
        let documents = DocumentService::new(
            storage,
            converter,
            config.save_dir.clone(),
            config.temp_dir.clone(),
            config.sample_file.clone(),
            config.max_upload_attempts,
        );
        let views = Views::new().context("loading templates")?;

        Ok(Self {
            config: Arc::new(config),
            sessions: SessionManager::new(signer, identity),
            documents,
            views: Arc::new(views),
            local_storage,
        })
    }
}

/// `<public_base_url>/public`, where the local backend's files are served.
pub fn local_public_base(public_base_url: &str) -> Result<Url> {
    let base = Url::parse(public_base_url)
        .with_context(|| format!("parsing public base URL `{}`", public_base_url))?;
    Ok(url_with_segments(&base, &["public"]))
}
