//! Структурированное логирование шины на `tracing`.
//!
//! Сама шина только пишет события (`tracing::warn!` и т.п.); подписчика
//! устанавливает приложение, вызвав [`init_logging`] один раз при старте.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig, Rotation};
pub use handle::LoggingHandle;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ошибки настройки логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid logging config: {0}")]
    InvalidConfig(String),

    #[error("log directory: {0}")]
    Io(#[from] std::io::Error),

    /// Глобальный подписчик уже установлен.
    #[error("global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Устанавливает глобального подписчика по конфигурации.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        console = config.console.enabled,
        file = config.file.enabled,
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    /// Тест проверяет, что повторная установка глобального подписчика
    /// возвращает ошибку, а не панику.
    #[test]
    #[serial]
    fn test_init_logging_twice() {
        let tmp = tempdir().unwrap();
        let cfg = LoggingConfig {
            console: ConsoleConfig {
                enabled: false,
                ..Default::default()
            },
            file: FileConfig {
                enabled: true,
                dir: tmp.path().join("logs"),
                ..Default::default()
            },
            ..Default::default()
        };

        let first = init_logging(cfg.clone());
        let second = init_logging(cfg);
        // Глобальный подписчик мог установить другой тест этого процесса,
        // поэтому первая попытка не обязана пройти; вторая точно нет.
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized(_))));
        if let Ok(handle) = first {
            assert!(handle.has_file_sink());
            handle.shutdown();
        }
    }

    #[test]
    #[serial]
    fn test_invalid_config_rejected_before_init() {
        let cfg = LoggingConfig {
            level: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            init_logging(cfg),
            Err(LoggingError::InvalidConfig(_))
        ));
    }
}
