use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;

use crate::app::{LogFormat, SluiceConfig};

pub fn init_tracing(log_level: LevelFilter) -> Result<(), SetGlobalDefaultError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true);

    let subscriber = tracing_subscriber::Registry::default()
        .with(log_level)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
}

pub fn init_json_tracing(log_level: LevelFilter) -> Result<(), SetGlobalDefaultError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_list(false);

    let subscriber = tracing_subscriber::Registry::default()
        .with(log_level)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
}

pub fn init_from_config(config: &SluiceConfig) -> Result<(), SetGlobalDefaultError> {
    match config.log_format() {
        LogFormat::Text => init_tracing(config.log_level()),
        LogFormat::Json => init_json_tracing(config.log_level()),
    }
}
