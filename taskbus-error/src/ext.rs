use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок шины (object-safe).
///
/// Предоставляет вспомогательные методы для работы с ошибками:
/// - извлечение статус-кода,
/// - безопасное сообщение для вызывающей стороны,
/// - детализированное сообщение для логов,
/// - формирование тегов для систем наблюдаемости.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`](std::any::Any),
    /// чтобы можно было выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Безопасное сообщение для вызывающей стороны.
    ///
    /// Для внутренних ошибок возвращает строку `"Internal error"`.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Набор тегов для метрик.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Имя типа ошибки (для метрик или логирования).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}
