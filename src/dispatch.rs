use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use taskbus_error::{BusError, BusResult};
use tracing::{debug, error, trace};

use crate::{
    bus::Core,
    message::{Kind, Message},
    registry::SubscriptionRegistry,
    sync::Semaphore,
};

/// Счётчики диспетчера.
#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    pub(crate) dispatched: AtomicU64,
    pub(crate) callbacks: AtomicU64,
    pub(crate) callback_panics: AtomicU64,
    pub(crate) waiter_deliveries: AtomicU64,
    pub(crate) skipped_deliveries: AtomicU64,
}

/// Очередь опубликованных сообщений и их раздача.
///
/// Очередь разбирает единственный поток, строго в порядке поступления,
/// поэтому сообщения одного вида приходят всем потребителям в порядке
/// публикации.
pub(crate) struct DispatchEngine<K: Kind> {
    queue: Mutex<VecDeque<Message<K>>>,
    signal: Arc<Semaphore>,
    stats: DispatchStats,
}

impl<K: Kind> DispatchEngine<K> {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            signal: Arc::new(Semaphore::new()),
            stats: DispatchStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub(crate) fn signal(&self) -> Arc<Semaphore> {
        self.signal.clone()
    }

    /// Ставит сообщение в очередь и будит диспетчер. Очередь забирает
    /// начальную ссылку сообщения.
    pub(crate) fn enqueue(
        &self,
        msg: Message<K>,
    ) -> BusResult<()> {
        {
            // Проверка под блокировкой очереди: `close` закрывает сигнал
            // до того, как забирает очередь под той же блокировкой.
            let mut queue = self.queue.lock();
            if self.signal.is_closed() {
                return Err(BusError::ShutDown);
            }
            trace!(message_id = msg.id(), kind = ?msg.kind(), "message queued");
            queue.push_back(msg);
        }
        self.signal.release();
        Ok(())
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Разбирает очередь до конца.
    ///
    /// Для каждого сообщения: ссылка диспетчера, раздача ожидающим (каждому
    /// своя ссылка), вызов обработчиков по порядку подписки, удаление из
    /// очереди, освобождение ссылки диспетчера.
    pub(crate) fn drain(
        &self,
        registry: &SubscriptionRegistry<K>,
    ) -> usize {
        let mut handled = 0;
        loop {
            let Some(msg) = self.queue.lock().front().cloned() else {
                break;
            };
            self.fan_out(registry, &msg);
            self.queue.lock().pop_front();
            drop(msg);
            handled += 1;
        }
        handled
    }

    /// Закрывает очередь и освобождает всё, что не успели раздать.
    pub(crate) fn close(&self) -> usize {
        self.signal.close();
        let dropped: Vec<_> = self.queue.lock().drain(..).collect();
        dropped.len()
    }

    fn fan_out(
        &self,
        registry: &SubscriptionRegistry<K>,
        msg: &Message<K>,
    ) {
        let kind = msg.kind();
        let delivery = registry.deliver(msg);
        self.stats
            .waiter_deliveries
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.stats
            .skipped_deliveries
            .fetch_add(delivery.skipped as u64, Ordering::Relaxed);

        for callback in registry.callbacks_for(kind) {
            self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(msg)));
            if let Err(panic) = result {
                self.stats.callback_panics.fetch_add(1, Ordering::Relaxed);
                error!(
                    kind = ?kind,
                    message_id = msg.id(),
                    panic = panic_message(panic.as_ref()),
                    "callback panicked"
                );
            }
        }

        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        trace!(
            message_id = msg.id(),
            kind = ?kind,
            waiters = delivery.delivered,
            "message dispatched"
        );
    }
}

/// Тело потока диспетчера.
///
/// Поток держит только слабую ссылку на шину, чтобы не продлевать ей жизнь.
pub(crate) fn run<K: Kind>(
    core: Weak<Core<K>>,
    signal: Arc<Semaphore>,
) {
    debug!("dispatch thread started");
    while signal.acquire() {
        let Some(core) = core.upgrade() else {
            break;
        };
        core.dispatch().drain(core.registry());
    }
    debug!("dispatch thread stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
