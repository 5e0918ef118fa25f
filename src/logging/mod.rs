use std::{
    io::{self, Write},
    path::Path,
};

use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{
    config,
    core::error::{EngineResult, ErrorContext},
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log sink appending every formatted line to `log.path`.
///
/// [`Logger::init_env_logger`] installs the global logger writing into the
/// sink; [`Logger::run`] does the file I/O until shutdown.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    pub fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    pub fn init_env_logger(&self) -> EngineResult<()> {
        let writer = self.create_async_writer();
        Builder::from_env(env_logger::Env::default())
            .filter(None, LevelFilter::Info)
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init()
            .with_context("Failed to install logger")
    }

    /// Write queued lines to the log file until `shutdown` turns true.
    /// Lines still queued at shutdown are written before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        let log_file_path = &self.config.path;

        if let Some(parent) = Path::new(log_file_path).parent() {
            if metadata(parent).await.is_err() {
                create_dir_all(parent)
                    .await
                    .with_context("Failed to create log path")?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_file_path)
                .await?,
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                log::error!("Failed to write to log file: {}", e);
                            }
                        }
                        None => {
                            log::info!("Log channel closed, stopping write log");
                            break;
                        }
                    }
                }
            }
        }

        while let Ok(data) = self.receiver.try_recv() {
            if let Err(e) = file.write_all(&data).await {
                log::error!("Failed to write to log file: {}", e);
            }
        }

        if let Err(e) = file.flush().await {
            log::error!("Failed to flush log file: {}", e);
        }
        Ok(())
    }
}

/// Install the global logger for `config`.
///
/// Without a `log.path` this is plain `env_logger` on stderr and `None` is
/// returned. Otherwise the returned [`Logger`] must be driven with
/// [`Logger::run`] for lines to reach the file.
pub fn init(config: &config::Config) -> EngineResult<Option<Logger>> {
    match &config.log {
        Some(log) => {
            let logger = Logger::new(log.clone());
            logger.init_env_logger()?;
            Ok(Some(logger))
        }
        None => {
            Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .try_init()
                .with_context("Failed to install logger")?;
            Ok(None)
        }
    }
}
