pub mod cron;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::replay::ReplayEngine;
use crate::core::store::types::{ExecutionStatus, TenantConfig};
use crate::core::store::{ExecutionLog, TenantStore};
use cron::{CronError, CronSpec};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    Cron(#[from] CronError),
    #[error("cron runtime error: {0}")]
    Runtime(#[from] JobSchedulerError),
}

/// The single live job definition for a tenant.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub tenant_id: String,
    pub cron: String,
    pub attempt_count: u32,
    #[serde(skip)]
    job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// A firing for the same tenant was still running.
    Skipped,
    /// Tenant missing, inactive or without usable credentials; nothing recorded.
    Misconfigured(String),
    /// The execution log could not be written.
    Aborted(String),
    Succeeded { record_id: i64, detail: String },
    Failed { record_id: i64, detail: String },
}

/// Marks a tenant as running until dropped.
struct RunningGuard {
    running: Arc<std::sync::Mutex<HashSet<String>>>,
    tenant_id: String,
}

impl RunningGuard {
    fn acquire(running: &Arc<std::sync::Mutex<HashSet<String>>>, tenant_id: &str) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(tenant_id.to_string()) {
            return None;
        }
        Some(Self {
            running: running.clone(),
            tenant_id: tenant_id.to_string(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.tenant_id);
    }
}

pub struct TaskScheduler {
    cron: JobScheduler,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    running: Arc<std::sync::Mutex<HashSet<String>>>,
    tenants: Arc<dyn TenantStore>,
    log: Arc<dyn ExecutionLog>,
    engine: Arc<ReplayEngine>,
    grace: chrono::Duration,
}

impl TaskScheduler {
    pub fn new(
        cron: JobScheduler,
        tenants: Arc<dyn TenantStore>,
        log: Arc<dyn ExecutionLog>,
        engine: Arc<ReplayEngine>,
        grace: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            cron,
            jobs: Mutex::new(HashMap::new()),
            running: Arc::new(std::sync::Mutex::new(HashSet::new())),
            tenants,
            log,
            engine,
            grace: chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::hours(1)),
        })
    }

    pub fn engine(&self) -> Arc<ReplayEngine> {
        self.engine.clone()
    }

    /// Install (or replace) the tenant's job. The old definition is removed
    /// before the new one is added, under the job-table lock. If the old one
    /// cannot be removed it stays in place and nothing new is added.
    pub async fn schedule(
        self: &Arc<Self>,
        tenant_id: &str,
        cron: &str,
        attempt_count: u32,
    ) -> Result<(), SchedulerError> {
        let spec: CronSpec = cron.parse()?;

        let weak = Arc::downgrade(self);
        let tenant = tenant_id.to_string();
        let job = Job::new_async_tz(spec.to_scheduler_expr().as_str(), Local, move |_uuid, _l| {
            let weak = weak.clone();
            let tenant = tenant.clone();
            Box::pin(async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.fire(&tenant).await;
                }
            })
        })?;

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(tenant_id) {
            if let Err(e) = self.cron.remove(&previous.job_id).await {
                warn!(tenant = %tenant_id, "Failed to remove previous job {}: {}", previous.job_id, e);
                jobs.insert(tenant_id.to_string(), previous);
                return Err(SchedulerError::Runtime(e));
            }
        }
        let job_id = self.cron.add(job).await?;

        jobs.insert(
            tenant_id.to_string(),
            ScheduledJob {
                tenant_id: tenant_id.to_string(),
                cron: spec.to_string(),
                attempt_count,
                job_id,
            },
        );
        info!(tenant = %tenant_id, cron = %spec, attempts = attempt_count, "Scheduled reading task");
        Ok(())
    }

    /// Returns false when the tenant had no job.
    pub async fn unschedule(&self, tenant_id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.jobs.lock().await;
        let Some(previous) = jobs.remove(tenant_id) else {
            return Ok(false);
        };
        if let Err(e) = self.cron.remove(&previous.job_id).await {
            jobs.insert(tenant_id.to_string(), previous);
            return Err(SchedulerError::Runtime(e));
        }
        info!(tenant = %tenant_id, "Unscheduled reading task");
        Ok(true)
    }

    /// Rebuild jobs for every active tenant and dispatch catch-up runs for
    /// firings missed within the grace period.
    pub async fn load_all(self: &Arc<Self>) -> anyhow::Result<usize> {
        let tenants = self.tenants.list_active().await?;
        let mut loaded = 0;
        for tenant in tenants {
            if let Err(e) = self
                .schedule(&tenant.auth_code, &tenant.cron, tenant.attempt_count())
                .await
            {
                warn!(tenant = %tenant.auth_code, "Skipping tenant with bad schedule: {}", e);
                continue;
            }
            loaded += 1;

            match self.missed_firing(&tenant, Local::now()).await {
                Ok(Some(missed)) => {
                    info!(tenant = %tenant.auth_code, "Catching up firing missed at {}", missed);
                    self.run_now(&tenant.auth_code);
                }
                Ok(None) => {}
                Err(e) => warn!(tenant = %tenant.auth_code, "Catch-up check failed: {:#}", e),
            }
        }
        info!("Loaded {} scheduled reading tasks", loaded);
        Ok(loaded)
    }

    /// The latest scheduled instant within the grace window that has no
    /// execution record at or after it.
    pub(crate) async fn missed_firing(
        &self,
        tenant: &TenantConfig,
        now: DateTime<Local>,
    ) -> anyhow::Result<Option<DateTime<Local>>> {
        let spec: CronSpec = tenant.cron.parse()?;
        let Some(missed) = spec.last_fire_within(&now, self.grace) else {
            return Ok(None);
        };
        let missed_utc = missed.with_timezone(&Utc);
        if missed_utc < tenant.created_at {
            return Ok(None);
        }
        let ran = self
            .log
            .latest(&tenant.auth_code)
            .await?
            .is_some_and(|record| record.start_time >= missed_utc);
        Ok((!ran).then_some(missed))
    }

    /// Fire outside the schedule; the returned handle resolves with the outcome.
    pub fn run_now(self: &Arc<Self>, tenant_id: &str) -> JoinHandle<FireOutcome> {
        let this = self.clone();
        let tenant = tenant_id.to_string();
        tokio::spawn(async move { this.fire(&tenant).await })
    }

    pub async fn fire(&self, tenant_id: &str) -> FireOutcome {
        let Some(_guard) = RunningGuard::acquire(&self.running, tenant_id) else {
            info!(tenant = %tenant_id, "Previous run still in progress, skipping");
            return FireOutcome::Skipped;
        };

        let tenant = match self.tenants.get(tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return misconfigured(tenant_id, "tenant not found"),
            Err(e) => {
                error!(tenant = %tenant_id, "Failed to load tenant: {:#}", e);
                return FireOutcome::Aborted(format!("failed to load tenant: {:#}", e));
            }
        };
        if !tenant.active {
            return misconfigured(tenant_id, "tenant is inactive");
        }
        if !tenant.credentials.is_complete() {
            return misconfigured(tenant_id, "stored credentials are incomplete");
        }
        let attempts = tenant.attempt_count();
        if attempts == 0 {
            return misconfigured(tenant_id, "reading time is shorter than one read");
        }

        let record_id = match self.log.append(tenant_id, Utc::now()).await {
            Ok(id) => id,
            Err(e) => {
                error!(tenant = %tenant_id, "Failed to open execution record: {:#}", e);
                return FireOutcome::Aborted(format!("failed to open execution record: {:#}", e));
            }
        };
        info!(tenant = %tenant_id, attempts, "Starting reading session");

        let (status, detail) = match self.engine.run(&tenant.credentials, attempts).await {
            Ok(report) => {
                if report.credentials != tenant.credentials {
                    if let Err(e) = self
                        .tenants
                        .update_credentials(tenant_id, &report.credentials)
                        .await
                    {
                        warn!(tenant = %tenant_id, "Failed to store renewed credentials: {:#}", e);
                    }
                }
                (ExecutionStatus::Success, report.summary())
            }
            Err(e) => (ExecutionStatus::Failure, e.to_string()),
        };

        if let Err(e) = self.log.finalize(record_id, status, &detail).await {
            error!(tenant = %tenant_id, "Failed to finalize execution {}: {:#}", record_id, e);
        }

        match status {
            ExecutionStatus::Success => {
                info!(tenant = %tenant_id, "Reading session succeeded: {}", detail);
                FireOutcome::Succeeded { record_id, detail }
            }
            _ => {
                warn!(tenant = %tenant_id, "Reading session failed: {}", detail);
                FireOutcome::Failed { record_id, detail }
            }
        }
    }

    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        jobs
    }

    pub async fn job(&self, tenant_id: &str) -> Option<ScheduledJob> {
        self.jobs.lock().await.get(tenant_id).cloned()
    }

    pub async fn next_run(&self, tenant_id: &str) -> Option<DateTime<Local>> {
        let job = self.job(tenant_id).await?;
        let spec: CronSpec = job.cron.parse().ok()?;
        spec.next_after(&Local::now())
    }
}

fn misconfigured(tenant_id: &str, reason: &str) -> FireOutcome {
    warn!(tenant = %tenant_id, "Skipping firing: {}", reason);
    FireOutcome::Misconfigured(reason.to_string())
}
