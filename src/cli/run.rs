use anyhow::{Result, bail};
use tokio_cron_scheduler::JobScheduler;

use super::services::Services;
use crate::core::config::AppConfig;
use crate::core::scheduler::FireOutcome;
use crate::core::terminal;
use crate::logging;
use crate::platform::{NativePlatform, Platform};

/// Fire one tenant's reading session now, outside its schedule.
pub(crate) async fn run_once(auth_code: &str) -> Result<()> {
    let data_dir = NativePlatform::data_dir();
    let config = AppConfig::load(&data_dir).await?;
    logging::init(&data_dir, &config.log_level);

    let services = Services::build(&config, &data_dir, JobScheduler::new().await?).await?;
    terminal::print_info(&format!("Running reading session for {}", auth_code));

    match services.scheduler.fire(auth_code).await {
        FireOutcome::Succeeded { record_id, detail } => {
            terminal::print_success(&format!("Execution #{}: {}", record_id, detail));
            Ok(())
        }
        FireOutcome::Failed { record_id, detail } => {
            bail!("execution #{} failed: {}", record_id, detail)
        }
        FireOutcome::Misconfigured(reason) => bail!("{} cannot run: {}", auth_code, reason),
        FireOutcome::Aborted(reason) => bail!("run aborted: {}", reason),
        FireOutcome::Skipped => {
            terminal::print_warn("A session for this code is already running");
            Ok(())
        }
    }
}
