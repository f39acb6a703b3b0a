//! Блокирующие ожидания сообщений.
//!
//! Каждый ожидающий представлен [`WaiterSlot`] со своей очередью доставленных
//! сообщений и своя условная переменная. Диспетчер кладёт в слот ссылку
//! на сообщение и будит его; ожидающий забирает ссылку и становится её
//! владельцем.

use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use taskbus_error::{BusError, BusResult};
use tracing::trace;

use crate::{
    message::{Kind, Message},
    Bus,
};

/// Идентификатор подписчика (постоянного или одноразового).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u32);

/// Сколько ждать сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Только проверить уже доставленное.
    NoWait,
    /// Ждать не дольше указанного времени.
    For(Duration),
    /// Ждать без ограничения.
    Forever,
}

/// Виды сообщений, на которые реагирует ожидающий.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaiterKinds<K: Kind> {
    Single(K),
    /// Список без повторов: вид, указанный дважды, совпадает один раз.
    Multi(Vec<K>),
}

/// Узел ожидания, зарегистрированный в реестре подписок.
pub(crate) struct WaiterSlot<K: Kind> {
    id: SubscriberId,
    kinds: WaiterKinds<K>,
    state: Mutex<SlotState<K>>,
    ready: Condvar,
    limit: usize,
}

struct SlotState<K: Kind> {
    queue: VecDeque<Message<K>>,
    closed: Option<BusError>,
}

/// Постоянный подписчик, удаляемый при `Drop`.
///
/// Пока подписчик жив, сообщения его видов копятся в нём даже между
/// вызовами [`wait`](Subscriber::wait).
pub struct Subscriber<K: Kind> {
    bus: Bus<K>,
    id: SubscriberId,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriberId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl WaitTimeout {
    /// Таймаут в миллисекундах. `0` означает не ждать, отрицательное
    /// значение означает ждать бесконечно.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Self::NoWait,
            ms if ms < 0 => Self::Forever,
            ms => Self::For(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    /// Срок ожидания; `None` значит ждать бесконечно. Срок, который не
    /// помещается в `Instant`, тоже считается бесконечным.
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::NoWait => Some(Instant::now()),
            Self::For(d) => Instant::now().checked_add(d),
            Self::Forever => None,
        }
    }
}

impl<K: Kind> WaiterKinds<K> {
    /// Список видов без повторов, порядок первых вхождений сохраняется.
    pub fn multi(kinds: &[K]) -> BusResult<Self> {
        if kinds.is_empty() {
            return Err(BusError::invalid("empty kind list"));
        }
        let mut unique: Vec<K> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        Ok(Self::Multi(unique))
    }

    pub fn matches(
        &self,
        kind: K,
    ) -> bool {
        match self {
            Self::Single(k) => *k == kind,
            Self::Multi(list) => list.contains(&kind),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

impl<K: Kind> WaiterSlot<K> {
    pub(crate) fn new(
        id: SubscriberId,
        kinds: WaiterKinds<K>,
        limit: usize,
    ) -> Self {
        Self {
            id,
            kinds,
            state: Mutex::new(SlotState {
                queue: VecDeque::new(),
                closed: None,
            }),
            ready: Condvar::new(),
            limit,
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn kinds(&self) -> &WaiterKinds<K> {
        &self.kinds
    }

    /// Прикрепляет ссылку на сообщение и будит ожидающего.
    ///
    /// Возвращает `false`, если слот закрыт или переполнен; ссылка тогда
    /// сразу освобождается.
    pub(crate) fn attach(
        &self,
        msg: Message<K>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed.is_some() || state.queue.len() >= self.limit {
            return false;
        }
        state.queue.push_back(msg);
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Забирает следующее доставленное сообщение, ожидая до `timeout`.
    pub(crate) fn take(
        &self,
        timeout: WaitTimeout,
    ) -> BusResult<Message<K>> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        loop {
            if let Some(msg) = state.queue.pop_front() {
                return Ok(msg);
            }
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            match deadline {
                None => self.ready.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        trace!(subscriber_id = self.id.0, "wait timed out");
                        return Err(BusError::Timeout);
                    }
                    // Результат не важен: следующий виток проверит очередь
                    // и срок.
                    let _ = self.ready.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Освобождает все доставленные, но не забранные сообщения.
    pub(crate) fn drain(&self) -> usize {
        let pending: Vec<_> = self.state.lock().queue.drain(..).collect();
        pending.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Закрывает слот: текущие и будущие ожидания вернут `reason`.
    pub(crate) fn close(
        &self,
        reason: BusError,
    ) {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = Some(reason);
            state.queue.drain(..).collect()
        };
        self.ready.notify_all();
        drop(pending);
    }
}

impl<K: Kind> Subscriber<K> {
    pub(crate) fn new(
        bus: Bus<K>,
        id: SubscriberId,
    ) -> Self {
        Self { bus, id }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Ждёт следующее сообщение этого подписчика.
    pub fn wait(
        &self,
        timeout: impl Into<WaitTimeout>,
    ) -> BusResult<Message<K>> {
        self.bus.wait_until(self.id, timeout)
    }

    /// Забирает уже доставленное сообщение, не блокируясь.
    pub fn try_recv(&self) -> BusResult<Message<K>> {
        self.bus.wait_until(self.id, WaitTimeout::NoWait)
    }

    /// Явно удалить подписчика. Аналогично `drop(self)`.
    pub fn delete(self) {}
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl From<Duration> for WaitTimeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::NoWait
        } else {
            Self::For(d)
        }
    }
}

impl From<Option<Duration>> for WaitTimeout {
    /// `None` означает ждать бесконечно.
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Self::Forever, Self::from)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

impl<K: Kind> Drop for Subscriber<K> {
    fn drop(&mut self) {
        // После shutdown подписчика уже нет в реестре.
        let _ = self.bus.subscriber_delete(self.id);
    }
}

impl<K: Kind> fmt::Debug for Subscriber<K> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
