//! Epoch stamps of the upstream datasets

use crate::error::BackendError;
use crate::fingerprint::EpochStamps;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read once per request; the snapshot is threaded through key derivation
#[async_trait]
pub trait EpochSource: Send + Sync {
    async fn current(&self) -> Result<EpochStamps, BackendError>;
}

/// Process-local epochs, bumped by the ingestion side
#[derive(Clone)]
pub struct StaticEpochs {
    stamps: Arc<RwLock<EpochStamps>>,
    available: Arc<AtomicBool>,
}

impl StaticEpochs {
    pub fn new(stamps: EpochStamps) -> Self {
        Self {
            stamps: Arc::new(RwLock::new(stamps)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn bump_kb(&self) -> EpochStamps {
        let mut stamps = self.stamps.write().await;
        stamps.kb_epoch += 1;
        info!("KB epoch bumped to {}", stamps.kb_epoch);
        stamps.clone()
    }

    pub async fn bump_golden(&self) -> EpochStamps {
        let mut stamps = self.stamps.write().await;
        stamps.golden_epoch += 1;
        info!("Golden epoch bumped to {}", stamps.golden_epoch);
        stamps.clone()
    }

    pub async fn bump_dataset(&self) -> EpochStamps {
        let mut stamps = self.stamps.write().await;
        stamps.domain_dataset_epoch += 1;
        info!("Domain dataset epoch bumped to {}", stamps.domain_dataset_epoch);
        stamps.clone()
    }

    pub async fn set_parser_version(&self, parser_version: impl Into<String>) -> EpochStamps {
        let mut stamps = self.stamps.write().await;
        stamps.parser_version = parser_version.into();
        info!("Parser version set to {}", stamps.parser_version);
        stamps.clone()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}

impl Default for StaticEpochs {
    fn default() -> Self {
        Self::new(EpochStamps::default())
    }
}

#[async_trait]
impl EpochSource for StaticEpochs {
    async fn current(&self) -> Result<EpochStamps, BackendError> {
        if !self.available.load(Ordering::Acquire) {
            return Err(BackendError::Unavailable("epoch source offline".to_string()));
        }
        Ok(self.stamps.read().await.clone())
    }
}
