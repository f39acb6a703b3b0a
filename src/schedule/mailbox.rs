use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use taskbus_error::{BusError, BusResult};
use tokio::sync::mpsc;

use super::LoopId;
use crate::message::Kind;

/// Событие для рабочего потока расписаний.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScheduleEvent<K: Kind> {
    /// Сработал таймер расписания `kind`, взведённый с поколением
    /// `generation`.
    Timer { kind: K, generation: u64 },
    /// Немедленная публикация расписания `kind` вне очереди таймера.
    Restart(K),
    /// Пора опубликовать отложенное сообщение.
    Delayed(u64),
    /// Очередной такт периодического цикла.
    LoopTick { id: LoopId, generation: u64 },
    Shutdown,
}

/// Почтовый ящик между службой таймеров и рабочим потоком расписаний.
///
/// Ёмкость ограничивает только запросы вызывающих ([`post`](Self::post)):
/// при `capacity` необработанных событиях они получают `QueueFull`, а не
/// ожидание. События таймеров ([`post_timer`](Self::post_timer))
/// принимаются всегда, иначе потерянное срабатывание оставило бы
/// отложенное сообщение неопубликованным.
pub(crate) struct Mailbox<K: Kind> {
    tx: mpsc::UnboundedSender<ScheduleEvent<K>>,
    capacity: usize,
    queued: AtomicUsize,
    closed: AtomicBool,
}

impl<K: Kind> Mailbox<K> {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::UnboundedReceiver<ScheduleEvent<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Self {
            tx,
            capacity: capacity.max(1),
            queued: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        (mailbox, rx)
    }

    /// Запрос вызывающего. Никогда не блокируется.
    pub(crate) fn post(
        &self,
        event: ScheduleEvent<K>,
    ) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::ShutDown);
        }
        if self.queued.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(BusError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.send(event)
    }

    /// Событие службы таймеров: принимается независимо от заполнения.
    pub(crate) fn post_timer(
        &self,
        event: ScheduleEvent<K>,
    ) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::ShutDown);
        }
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.send(event)
    }

    /// Рабочий поток забрал событие из ящика.
    pub(crate) fn received(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Закрывает ящик и будит рабочий поток.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.tx.send(ScheduleEvent::Shutdown);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Число событий, ещё не забранных рабочим потоком.
    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn send(
        &self,
        event: ScheduleEvent<K>,
    ) -> BusResult<()> {
        self.tx.send(event).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            BusError::ShutDown
        })
    }
}
