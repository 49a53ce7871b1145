// SPDX-License-Identifier: AGPL-3.0-or-later
// Adapted from the teacher's `cfg::logger::init_logger`
// (examples/Masorubka1-iscsi-client-rs/src/cfg/logger.rs): same
// tracing-subscriber/tracing-appender wiring and output/rotation choices,
// without the fastrace span-collection layer this crate has no use for.

//! Structured logging setup: an `EnvFilter` layer plus a JSON or plain `fmt`
//! layer writing to stdout, stderr, or a rotating file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::{
    EnvFilter,
    fmt::writer::BoxMakeWriter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_output")]
    pub output: LogOutput,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_rotation")]
    pub rotation: RotationFreq,
}

fn default_level() -> String {
    "info".to_string()
}
fn default_output() -> LogOutput {
    LogOutput::Stdout
}
fn default_rotation() -> RotationFreq {
    RotationFreq::Never
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            output: default_output(),
            json: false,
            file_path: None,
            rotation: default_rotation(),
        }
    }
}

/// Installs the global subscriber. The returned guard must be kept alive for
/// the lifetime of the process (a non-blocking writer flushes on drop).
pub fn init_logger(cfg: &LogConfig) -> Result<WorkerGuard> {
    let (writer, guard) = make_writer(cfg)?;

    let env_filter = EnvFilter::try_new(&cfg.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);

    if cfg.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
            .context("failed to install JSON logging subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("failed to install plain logging subscriber")?;
    }

    Ok(guard)
}

fn make_writer(cfg: &LogConfig) -> Result<(BoxMakeWriter, WorkerGuard)> {
    Ok(match cfg.output {
        LogOutput::Stdout => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::Stderr => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::File => {
            let path = cfg.file_path.clone().context("log.file_path is required for output=file")?;
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let rotation = match cfg.rotation {
                RotationFreq::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
                RotationFreq::Hourly => tracing_appender::rolling::Rotation::HOURLY,
                RotationFreq::Daily => tracing_appender::rolling::Rotation::DAILY,
                RotationFreq::Never => tracing_appender::rolling::Rotation::NEVER,
            };
            let appender = tracing_appender::rolling::RollingFileAppender::new(
                rotation,
                dir,
                path.file_name().unwrap_or_default(),
            );
            let (w, g) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(w), g)
        },
    })
}
