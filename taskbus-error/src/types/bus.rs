use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки операций шины сообщений.
///
/// Повторная подписка того же обработчика на тот же вид сообщения ошибкой
/// не считается: она логируется предупреждением и возвращает `Ok`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Шина используется до `start()`.
    #[error("message bus is not initialized")]
    NotInitialized,

    /// Неверный аргумент (пустой список видов, нулевой период и т.п.).
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Не удалось создать копию полезной нагрузки или узел ожидания.
    #[error("out of memory while creating {what}")]
    OutOfMemory { what: String },

    /// Повторная инициализация или занятый ресурс.
    #[error("resource is busy: {reason}")]
    Busy { reason: String },

    /// Ожидание истекло без подходящего сообщения.
    #[error("wait timed out")]
    Timeout,

    /// Подписчик с таким идентификатором не существует.
    #[error("unknown subscriber id {id}")]
    UnknownSubscriber { id: u32 },

    /// Периодический цикл с таким идентификатором не существует.
    #[error("unknown loop id {id}")]
    UnknownLoop { id: u32 },

    /// Почтовый ящик планировщика переполнен.
    #[error("schedule mailbox is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Не удалось запустить рабочий поток шины.
    #[error("failed to spawn thread '{thread}': {reason}")]
    ThreadSpawn { thread: String, reason: String },

    /// Шина остановлена.
    #[error("message bus is shut down")]
    ShutDown,
}

impl BusError {
    /// Сокращение для [`BusError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Сокращение для [`BusError::OutOfMemory`].
    pub fn oom(what: impl Into<String>) -> Self {
        Self::OutOfMemory { what: what.into() }
    }

    /// Истёкшее ожидание: штатный исход, а не сбой.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotInitialized => StatusCode::NotInitialized,
            Self::InvalidArgument { .. } => StatusCode::InvalidArgs,
            Self::OutOfMemory { .. } => StatusCode::OutOfMemory,
            Self::Busy { .. } => StatusCode::Busy,
            Self::Timeout => StatusCode::Timeout,
            Self::UnknownSubscriber { .. } | Self::UnknownLoop { .. } => StatusCode::NotFound,
            Self::QueueFull { .. } => StatusCode::QueueFull,
            Self::ThreadSpawn { .. } => StatusCode::ThreadSpawnFailed,
            Self::ShutDown => StatusCode::ShutDown,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::UnknownSubscriber { id } | Self::UnknownLoop { id } => {
                tags.push(("id", id.to_string()));
            }
            Self::QueueFull { capacity } => {
                tags.push(("capacity", capacity.to_string()));
            }
            Self::ThreadSpawn { thread, .. } => {
                tags.push(("thread", thread.clone()));
            }
            _ => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        assert_eq!(
            BusError::NotInitialized.to_string(),
            "message bus is not initialized"
        );
        assert_eq!(
            BusError::UnknownSubscriber { id: 7 }.to_string(),
            "unknown subscriber id 7"
        );
        assert!(BusError::oom("wait node").to_string().contains("wait node"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(BusError::Timeout.status_code(), StatusCode::Timeout);
        assert_eq!(
            BusError::Busy {
                reason: "x".into()
            }
            .status_code(),
            StatusCode::Busy
        );
        assert_eq!(
            BusError::UnknownLoop { id: 1 }.status_code(),
            StatusCode::NotFound
        );
        assert!(BusError::Timeout.is_timeout());
        assert!(!BusError::ShutDown.is_timeout());
    }

    /// Тест проверяет, что теги метрик содержат идентификатор объекта.
    #[test]
    fn test_metrics_tags() {
        let tags = BusError::QueueFull { capacity: 32 }.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "capacity" && v == "32"));
        assert!(tags.iter().any(|(k, v)| *k == "error_type" && v == "bus"));
    }
}
