//! Внутрипроцессная шина сообщений publish/subscribe.
//!
//! Производители публикуют сообщения по виду (`Kind`), потребители получают
//! их либо обработчиками в потоке диспетчера, либо блокирующим ожиданием
//! одного или нескольких видов. Поверх того же пути публикации работают
//! отложенные, периодические и ограниченные по числу повторов расписания.

/// Шина: жизненный цикл и публичные операции.
pub mod bus;
/// Настройки шины (`config` + переменные `TASKBUS_*`).
pub mod config;
mod dispatch;
/// Логирование на `tracing`: консоль, файл, JSON.
pub mod logging;
/// Сообщения, нагрузки и их учёт.
pub mod message;
/// Таблицы обработчиков и ожидающих.
pub mod registry;
/// Расписания, отложенные публикации и циклы.
pub mod schedule;
mod sync;
/// Блокирующие ожидания и постоянные подписчики.
pub mod wait;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use bus::{Bus, BusStats};
pub use config::BusConfig;
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
pub use message::{Kind, Message, Payload, PayloadHook, TypedHook};
pub use registry::Callback;
pub use schedule::LoopId;
pub use taskbus_error::{BusError, BusResult, ErrorExt, StatusCode};
pub use wait::{Subscriber, SubscriberId, WaitTimeout};
