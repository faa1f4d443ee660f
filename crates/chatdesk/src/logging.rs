//! Tracing setup: console output plus an optional daily-rotated JSON file.

use std::path::PathBuf;

use chatdesk_config::LoggingSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const VERBOSE_FILTER: &str =
    "chatdesk=debug,chatdesk_server=debug,chatdesk_store=debug,chatdesk_config=debug,info";
const DEFAULT_FILTER: &str = "chatdesk=info,chatdesk_server=info,chatdesk_store=info,warn";
const FILE_FILTER: &str =
    "chatdesk=trace,chatdesk_server=trace,chatdesk_store=trace,chatdesk_config=trace,info";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(section: &LoggingSection, verbose: bool) -> Option<WorkerGuard> {
    let console_filter = console_filter(section, verbose);

    let (file_layer, guard) = if section.json_file {
        let file_appender = tracing_appender::rolling::daily(log_dir(section), "chatdesk.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(FILE_FILTER));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}

fn console_filter(section: &LoggingSection, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(section.level.as_deref().unwrap_or(DEFAULT_FILTER))
}

fn log_dir(section: &LoggingSection) -> PathBuf {
    section.directory.clone().unwrap_or_else(|| {
        chatdesk_config::xdg_config_dir()
            .map(|d| d.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    })
}
