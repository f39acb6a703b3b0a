use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use taskbus_error::{BusError, BusResult};

/// Настройки шины сообщений.
///
/// Загружаются через [`BusConfig::load`]: значения по умолчанию, поверх
/// них переменные окружения `TASKBUS_*` (например,
/// `TASKBUS_SCHEDULE_MAILBOX_CAPACITY=64`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Имя потока диспетчера.
    pub dispatch_thread_name: String,
    /// Размер стека потока диспетчера; `None` оставляет размер платформы.
    pub dispatch_stack_size: Option<usize>,
    pub timer_thread_name: String,
    /// Имя рабочего потока расписаний.
    pub schedule_thread_name: String,
    pub schedule_stack_size: Option<usize>,
    /// Ёмкость почтового ящика между таймерами и рабочим потоком.
    pub schedule_mailbox_capacity: usize,
    /// Сколько недоставленных сообщений может накопить один ожидающий.
    pub waiter_pending_limit: usize,
}

impl BusConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let cfg = Config::builder()
            // Значения по умолчанию
            .set_default("dispatch_thread_name", defaults.dispatch_thread_name)?
            .set_default("timer_thread_name", defaults.timer_thread_name)?
            .set_default("schedule_thread_name", defaults.schedule_thread_name)?
            .set_default(
                "schedule_mailbox_capacity",
                defaults.schedule_mailbox_capacity as u64,
            )?
            .set_default("waiter_pending_limit", defaults.waiter_pending_limit as u64)?
            // Переменные окружения с префиксом TASKBUS_
            .add_source(Environment::with_prefix("TASKBUS").try_parsing(true))
            .build()?;

        cfg.try_deserialize()
    }

    /// Проверяет значения, при которых шина не сможет работать.
    pub fn validate(&self) -> BusResult<()> {
        if self.schedule_mailbox_capacity == 0 {
            return Err(BusError::invalid("schedule_mailbox_capacity must be positive"));
        }
        if self.waiter_pending_limit == 0 {
            return Err(BusError::invalid("waiter_pending_limit must be positive"));
        }
        for name in [
            &self.dispatch_thread_name,
            &self.timer_thread_name,
            &self.schedule_thread_name,
        ] {
            if name.is_empty() || name.contains('\0') {
                return Err(BusError::invalid(format!("bad thread name {name:?}")));
            }
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatch_thread_name: "msg_bus".to_string(),
            dispatch_stack_size: None,
            timer_thread_name: "msg_timer".to_string(),
            schedule_thread_name: "msg_mb".to_string(),
            schedule_stack_size: None,
            schedule_mailbox_capacity: 32,
            waiter_pending_limit: 64,
        }
    }
}
