//! Повторная публикация по таймерам.
//!
//! - `timer`: служба таймеров со своим потоком.
//! - `mailbox`: ящик событий «таймер сработал»; ограничен только для
//!   запросов вызывающих.
//! - `engine`: таблицы расписаний, отложенных сообщений и циклов и
//!   решение о перевзводе после каждой публикации.
//!
//! Поток таймеров никогда не публикует сам: он только кладёт событие в
//! ящик, а публикует рабочий поток расписаний через обычный путь
//! `publish`.

use std::{
    fmt,
    sync::{Arc, Weak},
};

pub(crate) mod engine;
pub(crate) mod mailbox;
pub(crate) mod timer;

pub(crate) use engine::{Republish, ScheduleEngine};
pub(crate) use mailbox::{Mailbox, ScheduleEvent};
pub(crate) use timer::TimerService;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{bus::Core, message::Kind};

/// Идентификатор периодического цикла.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub(crate) u32);

impl LoopId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

/// Службы, которые живут только между `start` и `shutdown`.
pub(crate) struct ScheduleHandles<K: Kind> {
    pub(crate) timers: Arc<TimerService>,
    pub(crate) mailbox: Arc<Mailbox<K>>,
}

impl<K: Kind> Clone for ScheduleHandles<K> {
    fn clone(&self) -> Self {
        Self {
            timers: self.timers.clone(),
            mailbox: self.mailbox.clone(),
        }
    }
}

/// Тело рабочего потока расписаний.
///
/// Завершается по событию `Shutdown`, закрытию ящика или уходу шины.
pub(crate) fn run_worker<K: Kind>(
    core: Weak<Core<K>>,
    handles: ScheduleHandles<K>,
    mut events: mpsc::UnboundedReceiver<ScheduleEvent<K>>,
) {
    debug!("schedule worker started");
    while let Some(event) = events.blocking_recv() {
        handles.mailbox.received();
        if handles.mailbox.is_closed() || event == ScheduleEvent::Shutdown {
            break;
        }
        let Some(core) = core.upgrade() else {
            break;
        };
        core.schedule().handle(&handles, event, core.as_ref());
    }
    debug!("schedule worker stopped");
}
