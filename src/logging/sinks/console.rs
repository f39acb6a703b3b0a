use std::io::{self, Stdout};

use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой по конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    formatter::build_layer(
        &config.console,
        config.console_format(),
        writer,
        config.console.with_ansi,
    )
}
