use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{LoggingConfig, Rotation},
    formatter,
};

/// Файловый слой с неблокирующей записью.
///
/// `WorkerGuard` нужно держать, пока нужен вывод: при его уничтожении
/// буфер сбрасывается на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file = &config.file;
    let appender = match file.rotation {
        Rotation::Never => rolling::never(&file.dir, &file.filename),
        Rotation::Hourly => rolling::hourly(&file.dir, &file.filename),
        Rotation::Daily => rolling::daily(&file.dir, &file.filename),
    };
    let (writer, guard) = non_blocking(appender);
    let layer = formatter::build_layer(&config.console, config.file_format(), writer, false);
    (layer, guard)
}
