use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::LoggingError;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Однострочный вывод с минимумом полей.
    #[default]
    Compact,
    /// Многострочный вывод для разработки.
    Pretty,
    /// Структурированный JSON.
    Json,
}

/// Период ротации файла логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Never,
    Hourly,
    #[default]
    Daily,
}

/// Настройки вывода в консоль.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Формат консоли; если не задан, берётся общий `format`.
    pub format: Option<LogFormat>,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_names: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub filename: String,
    pub format: Option<LogFormat>,
    pub rotation: Rotation,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень для событий шины: `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    pub format: LogFormat,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl LoggingConfig {
    /// Переменные окружения `TASKBUS_LOG_LEVEL` и `TASKBUS_LOG_FORMAT`
    /// перекрывают значения из конфигурации.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("TASKBUS_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Ok(format) = env::var("TASKBUS_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "compact" => self.format = LogFormat::Compact,
                "pretty" => self.format = LogFormat::Pretty,
                "json" => self.format = LogFormat::Json,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(LoggingError::InvalidConfig(format!(
                "unknown log level '{}'",
                self.level
            )));
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(LoggingError::InvalidConfig("empty log file name".into()));
        }
        Ok(())
    }

    /// Создаёт каталог для файла логов, если файловый вывод включён.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.file.dir)?;
        }
        Ok(())
    }

    /// Директива `EnvFilter` по умолчанию.
    pub fn build_filter_directive(&self) -> String {
        format!("taskbus={}", self.level)
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format.unwrap_or(self.format)
    }

    pub fn file_format(&self) -> LogFormat {
        self.file.format.unwrap_or(self.format)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: None,
            with_ansi: true,
            with_target: true,
            with_thread_names: true,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
            filename: "taskbus.log".to_string(),
            format: Some(LogFormat::Json),
            rotation: Rotation::Daily,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}
