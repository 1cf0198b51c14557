use crate::config::ServerConfig;
use crate::ingest::IngestService;
use crate::persistence::PersistenceScheduler;
use crate::subnet::TrustedSubnets;
use anyhow::Context;
use std::sync::Arc;
use telemon_common::crypto::PayloadDecryptor;
use telemon_common::sign::Signer;
use telemon_storage::StorageEngine;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    /// Verifies request bodies and signs responses when a key is configured.
    pub signer: Option<Signer>,
    /// Decrypts request bodies when a private key is configured.
    pub decryptor: Option<Arc<PayloadDecryptor>>,
}

impl AppState {
    pub fn new(
        ingest: Arc<IngestService>,
        signer: Option<Signer>,
        decryptor: Option<Arc<PayloadDecryptor>>,
    ) -> Self {
        Self {
            ingest,
            signer,
            decryptor,
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        storage: Arc<dyn StorageEngine>,
        persistence: Option<Arc<PersistenceScheduler>>,
    ) -> anyhow::Result<Self> {
        let trusted = TrustedSubnets::parse(&config.trusted_subnets)?;
        let decryptor = config
            .private_key_path
            .as_deref()
            .map(PayloadDecryptor::load)
            .transpose()
            .context("failed to load private key")?
            .map(Arc::new);
        let signer = Signer::from_config(config.signing_key.as_deref());

        tracing::info!(
            signing = signer.is_some(),
            encryption = decryptor.is_some(),
            trusted_subnets = config.trusted_subnets.len(),
            "Ingestion configured"
        );
        Ok(Self::new(
            Arc::new(IngestService::new(storage, persistence, trusted)),
            signer,
            decryptor,
        ))
    }
}
