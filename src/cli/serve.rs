use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::Job;
use tracing::{debug, info};

use super::services::Services;
use crate::core::capture::CaptureManager;
use crate::core::config::AppConfig;
use crate::core::lifecycle::{LifecycleManager, ScheduleLoader};
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

/// Terminal capture sessions are swept once a minute.
const PRUNE_SCHEDULE: &str = "0 * * * * *";

pub(crate) async fn run_serve(api_host: Option<String>, api_port: Option<u16>) -> Result<()> {
    let data_dir = NativePlatform::data_dir();
    let config = AppConfig::load(&data_dir).await?;
    let log_tx = logging::init(&data_dir, &config.log_level);
    info!("Starting wxread (data dir {:?})", data_dir);

    let api_host = api_host.unwrap_or_else(|| config.server.host.clone());
    let api_port = api_port.unwrap_or(config.server.port);

    let mut lifecycle = LifecycleManager::new().await?;
    let services = Services::build(&config, &data_dir, lifecycle.scheduler.clone()).await?;
    lifecycle
        .scheduler
        .add(prune_job(services.captures.clone())?)
        .await?;

    let state = AppState {
        config: Arc::new(config),
        store: services.store.clone(),
        scheduler: services.scheduler.clone(),
        captures: services.captures.clone(),
        log_tx,
    };
    lifecycle.attach(Arc::new(Mutex::new(ScheduleLoader::new(
        services.scheduler.clone(),
    ))));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
        state,
        api_host.clone(),
        api_port,
    ))));
    lifecycle.start().await?;

    terminal::print_banner();
    GuideSection::new("Service")
        .entry(&format!("http://{}:{}/api", api_host, api_port), "JSON API")
        .entry(&format!("http://{}:{}/api/logs", api_host, api_port), "Live log stream")
        .entry("Ctrl+C", "Stop the service")
        .print();
    for job in services.scheduler.jobs().await {
        let next = services
            .scheduler
            .next_run(&job.tenant_id)
            .await
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        terminal::print_schedule(&job.tenant_id, &job.cron, &next);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down wxread...");
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}

fn prune_job(captures: Arc<CaptureManager>) -> Result<Job> {
    let job = Job::new_async(PRUNE_SCHEDULE, move |_uuid, _l| {
        let captures = captures.clone();
        Box::pin(async move {
            let pruned = captures.prune_expired().await;
            if pruned > 0 {
                debug!("Pruned {} expired capture sessions", pruned);
            }
        })
    })?;
    Ok(job)
}
