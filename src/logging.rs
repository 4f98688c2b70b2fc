use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "wxread.log";
const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Tees each formatted line to stdout, the log file and the SSE channel.
#[derive(Clone)]
pub(crate) struct LogMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub file: Option<Arc<Mutex<File>>>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for LogMakeWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            sender: self.sender.clone(),
            file: self.file.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct LogWriter {
    sender: broadcast::Sender<String>,
    file: Option<Arc<Mutex<File>>>,
    suppress_stdout: bool,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // no subscribers is fine
        if let Some(file) = &self.file {
            file.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf)?;
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

pub(crate) fn open_log_file(data_dir: &Path) -> Result<File> {
    let dir = data_dir.join(LOG_DIR);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    Ok(file)
}

/// Install the global subscriber. Returns the sender backing `/api/logs`.
pub(crate) fn init(data_dir: &Path, level: &str) -> broadcast::Sender<String> {
    let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    let file = match open_log_file(data_dir) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(e) => {
            eprintln!("Log file unavailable, logging to stdout only: {}", e);
            None
        }
    };
    let writer = LogMakeWriter {
        sender: sender.clone(),
        file,
        suppress_stdout: false,
    };

    let level = level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    sender
}
