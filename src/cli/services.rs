use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::JobScheduler;

use crate::core::capture::driver::default_factory;
use crate::core::capture::{CaptureManager, CaptureSettings};
use crate::core::config::AppConfig;
use crate::core::renewal::SessionRenewer;
use crate::core::replay::ReplayEngine;
use crate::core::scheduler::TaskScheduler;
use crate::core::signer::RequestSigner;
use crate::core::store::Store;
use crate::core::transport::ReqwestTransport;

/// Everything the API and the one-shot runner share, wired from config.
pub(crate) struct Services {
    pub store: Arc<Store>,
    pub scheduler: Arc<TaskScheduler>,
    pub captures: Arc<CaptureManager>,
}

impl Services {
    pub async fn build(config: &AppConfig, data_dir: &Path, cron: JobScheduler) -> Result<Self> {
        let store = Arc::new(Store::open(data_dir).await?);
        let transport = Arc::new(ReqwestTransport::new(config.replay.request_timeout())?);

        let engine = Arc::new(ReplayEngine::new(
            transport.clone(),
            RequestSigner::new(config.target.template.clone(), config.target.secret.clone()),
            SessionRenewer::new(transport, config.target.renewal_url()),
            config.target.read_url(),
            config.replay.pacing(),
        ));
        let scheduler = TaskScheduler::new(
            cron,
            store.clone(),
            store.clone(),
            engine,
            Duration::from_secs(config.scheduler.grace_secs),
        );
        let captures = Arc::new(CaptureManager::new(
            default_factory(config.capture.headless),
            store.clone(),
            CaptureSettings::from_config(config),
        ));

        Ok(Self {
            store,
            scheduler,
            captures,
        })
    }
}
