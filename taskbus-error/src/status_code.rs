use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки и жизненный цикл шины
/// - 2xxx: Ошибки адресации (подписчики, циклы, расписания)
/// - 4xxx: Перегрузка / ограничения
/// - 5xxx: Ресурсы (память, потоки)
/// - 6xxx: Ожидание и синхронизация
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Internal = 1003,
    InvalidArgs = 1004,
    NotInitialized = 1006,

    // === 2xxx: Адресация ===
    NotFound = 2000,
    AlreadyExists = 2001,

    // === 4xxx: Перегрузка ===
    Busy = 4000,
    QueueFull = 4001,

    // === 5xxx: Ресурсы ===
    OutOfMemory = 5000,
    ThreadSpawnFailed = 5001,

    // === 6xxx: Ожидание ===
    Timeout = 6002,
    ShutDown = 6003,
}

/// Рекомендуемый уровень логирования для кода статуса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию имеет смысл повторить.
    ///
    /// Таймаут ожидания, переполненный почтовый ящик планировщика и неудачный
    /// старт потоков (шина остаётся неинициализированной) допускают повтор.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::QueueFull | Self::Busy | Self::ThreadSpawnFailed
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающей стороны: неверные аргументы или обращение к
    /// несуществующему объекту.
    pub fn is_client_error(&self) -> bool {
        matches!(self.code(), 2000..=2999) || matches!(self, Self::InvalidArgs)
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::OutOfMemory | Self::ThreadSpawnFailed
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    ///
    /// Таймаут ожидания: штатный исход, поэтому он не поднимается выше
    /// `Trace`.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success | Self::Timeout => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists => LogLevel::Debug,
            Self::InvalidArgs | Self::NotInitialized | Self::ShutDown => LogLevel::Info,
            Self::Busy | Self::QueueFull => LogLevel::Warn,
            Self::Internal | Self::OutOfMemory | Self::ThreadSpawnFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
