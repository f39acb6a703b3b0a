use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use taskbus_error::{BusError, BusResult};
use tracing::{debug, warn};

use crate::{
    message::{Kind, Message},
    wait::{SubscriberId, WaiterKinds, WaiterSlot},
};

/// Обработчик сообщений, вызываемый в потоке диспетчера.
///
/// Идентичность обработчика задаёт адрес его `Arc`, и повторная подписка того же
/// `Arc` на тот же вид ничего не меняет.
pub type Callback<K> = Arc<dyn Fn(&Message<K>) + Send + Sync>;

/// Итог раздачи одного сообщения ожидающим.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) delivered: usize,
    pub(crate) skipped: usize,
}

/// Реестр подписок: обработчики по видам и блокирующие ожидающие.
///
/// Обработчики и ожидающие хранятся независимо, каждый набор под своей
/// блокировкой.
pub(crate) struct SubscriptionRegistry<K: Kind> {
    callbacks: DashMap<K, Vec<Callback<K>>>,
    waiters: Mutex<Vec<Arc<WaiterSlot<K>>>>,
    next_waiter: AtomicU32,
    pending_limit: usize,
}

impl<K: Kind> SubscriptionRegistry<K> {
    pub(crate) fn new(pending_limit: usize) -> Self {
        Self {
            callbacks: DashMap::new(),
            waiters: Mutex::new(Vec::new()),
            next_waiter: AtomicU32::new(1),
            pending_limit,
        }
    }

    /// Добавляет обработчик в конец списка вида `kind`.
    ///
    /// Возвращает `false`, если этот обработчик уже подписан.
    pub(crate) fn subscribe(
        &self,
        kind: K,
        callback: Callback<K>,
    ) -> bool {
        let mut entry = self.callbacks.entry(kind).or_default();
        if entry.iter().any(|cb| same_callback(cb, &callback)) {
            warn!(kind = ?kind, "callback already subscribed");
            return false;
        }
        entry.push(callback);
        debug!(kind = ?kind, total = entry.len(), "callback subscribed");
        true
    }

    /// Убирает обработчик; `false`, если его не было.
    pub(crate) fn unsubscribe(
        &self,
        kind: K,
        callback: &Callback<K>,
    ) -> bool {
        let removed = match self.callbacks.get_mut(&kind) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|cb| !same_callback(cb, callback));
                before != list.len()
            }
            None => false,
        };
        self.callbacks.remove_if(&kind, |_, list| list.is_empty());
        if removed {
            debug!(kind = ?kind, "callback unsubscribed");
        }
        removed
    }

    /// Снимок обработчиков вида `kind` в порядке подписки.
    ///
    /// Вызывать обработчики нужно уже после того, как снимок сделан: так
    /// они могут сами подписываться и отписываться.
    pub(crate) fn callbacks_for(
        &self,
        kind: K,
    ) -> Vec<Callback<K>> {
        self.callbacks
            .get(&kind)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.iter().map(|list| list.len()).sum()
    }

    pub(crate) fn clear_callbacks(&self) {
        self.callbacks.clear();
    }

    pub(crate) fn register_waiter_single(
        &self,
        kind: K,
    ) -> Arc<WaiterSlot<K>> {
        self.register(WaiterKinds::Single(kind))
    }

    pub(crate) fn register_waiter_multi(
        &self,
        kinds: &[K],
    ) -> BusResult<Arc<WaiterSlot<K>>> {
        Ok(self.register(WaiterKinds::multi(kinds)?))
    }

    /// Снимает ожидающего с регистрации. Недоставленные ему сообщения
    /// остаются в слоте до `drain`.
    pub(crate) fn unregister_waiter(
        &self,
        id: SubscriberId,
    ) -> Option<Arc<WaiterSlot<K>>> {
        let mut waiters = self.waiters.lock();
        let pos = waiters.iter().position(|w| w.id() == id)?;
        Some(waiters.remove(pos))
    }

    /// Завершает одноразовое ожидание: снимает слот с регистрации и
    /// освобождает доставки, успевшие прийти после того, как ожидающий
    /// перестал ждать. Возвращает их число.
    pub(crate) fn retire_waiter(
        &self,
        slot: &WaiterSlot<K>,
    ) -> usize {
        self.unregister_waiter(slot.id());
        slot.drain()
    }

    pub(crate) fn find_waiter(
        &self,
        id: SubscriberId,
    ) -> Option<Arc<WaiterSlot<K>>> {
        self.waiters.lock().iter().find(|w| w.id() == id).cloned()
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Раздаёт сообщение всем подходящим ожидающим: сначала
    /// однотиповым, затем многотиповым, внутри каждой группы: в порядке
    /// регистрации. Каждая доставка держит свою ссылку на сообщение.
    pub(crate) fn deliver(
        &self,
        msg: &Message<K>,
    ) -> Delivery {
        let kind = msg.kind();
        let waiters = self.waiters.lock();
        let single = waiters.iter().filter(|w| w.kinds().is_single());
        let multi = waiters.iter().filter(|w| !w.kinds().is_single());

        let mut report = Delivery::default();
        for waiter in single.chain(multi) {
            if !waiter.kinds().matches(kind) {
                continue;
            }
            if waiter.attach(msg.clone()) {
                report.delivered += 1;
            } else {
                warn!(
                    subscriber_id = waiter.id().as_u32(),
                    kind = ?kind,
                    message_id = msg.id(),
                    limit = self.pending_limit,
                    "waiter cannot take more messages, delivery skipped"
                );
                report.skipped += 1;
            }
        }
        report
    }

    /// Снимает всех ожидающих и будит их с ошибкой `reason`.
    pub(crate) fn close_waiters(
        &self,
        reason: BusError,
    ) -> usize {
        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        for waiter in &waiters {
            waiter.close(reason.clone());
        }
        waiters.len()
    }

    fn register(
        &self,
        kinds: WaiterKinds<K>,
    ) -> Arc<WaiterSlot<K>> {
        let id = SubscriberId(self.next_waiter.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(WaiterSlot::new(id, kinds, self.pending_limit));
        self.waiters.lock().push(slot.clone());
        debug!(subscriber_id = id.as_u32(), kinds = ?slot.kinds(), "waiter registered");
        slot
    }
}

fn same_callback<K: Kind>(
    a: &Callback<K>,
    b: &Callback<K>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<K: Kind> fmt::Debug for SubscriptionRegistry<K> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("callbacks", &self.callback_count())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{message::MessageStore, wait::WaitTimeout};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Msg {
        A,
        B,
        C,
    }

    fn counter_cb(counter: &Arc<AtomicUsize>) -> Callback<Msg> {
        let counter = counter.clone();
        Arc::new(move |_msg: &Message<Msg>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Тест проверяет, что повторная подписка того же обработчика не
    /// создаёт второй записи.
    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let registry = SubscriptionRegistry::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = counter_cb(&hits);
        assert!(registry.subscribe(Msg::A, cb.clone()));
        assert!(!registry.subscribe(Msg::A, cb.clone()));
        assert!(registry.subscribe(Msg::B, cb.clone()));
        assert_eq!(registry.callbacks_for(Msg::A).len(), 1);
        assert_eq!(registry.callback_count(), 2);
    }

    /// Тест проверяет, что разные `Arc` с одинаковым кодом считаются
    /// разными обработчиками, а отписка убирает только указанный.
    #[test]
    fn test_unsubscribe_by_identity() {
        let registry = SubscriptionRegistry::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let first = counter_cb(&hits);
        let second = counter_cb(&hits);
        registry.subscribe(Msg::A, first.clone());
        registry.subscribe(Msg::A, second.clone());

        assert!(registry.unsubscribe(Msg::A, &first));
        assert!(!registry.unsubscribe(Msg::A, &first));
        let left = registry.callbacks_for(Msg::A);
        assert_eq!(left.len(), 1);
        assert!(same_callback(&left[0], &second));

        assert!(registry.unsubscribe(Msg::A, &second));
        assert_eq!(registry.callback_count(), 0);
    }

    /// Тест проверяет порядок раздачи: однотиповые ожидающие раньше
    /// многотиповых, каждый получает ровно одну ссылку.
    #[test]
    fn test_deliver_single_before_multi() {
        let store = MessageStore::new();
        let registry = SubscriptionRegistry::new(8);
        let multi = registry.register_waiter_multi(&[Msg::A, Msg::A, Msg::B]).unwrap();
        let single = registry.register_waiter_single(Msg::A);
        let other = registry.register_waiter_single(Msg::C);

        let msg = store.allocate(Msg::A, None);
        let report = registry.deliver(&msg);
        assert_eq!(report, Delivery { delivered: 2, skipped: 0 });
        assert_eq!(msg.ref_count(), 3);
        assert_eq!(multi.pending(), 1);
        assert_eq!(single.pending(), 1);
        assert_eq!(other.pending(), 0);
    }

    #[test]
    fn test_deliver_skips_full_waiter() {
        let store = MessageStore::new();
        let registry = SubscriptionRegistry::new(1);
        let waiter = registry.register_waiter_single(Msg::A);
        registry.deliver(&store.allocate(Msg::A, None));
        let report = registry.deliver(&store.allocate(Msg::A, None));
        assert_eq!(report.skipped, 1);
        assert_eq!(waiter.pending(), 1);
        assert_eq!(store.live_messages(), 1);
    }

    /// Тест проверяет, что снятый с регистрации ожидающий больше не
    /// получает сообщений.
    #[test]
    fn test_unregister_waiter() {
        let store = MessageStore::new();
        let registry = SubscriptionRegistry::new(8);
        let waiter = registry.register_waiter_single(Msg::B);
        assert!(registry.find_waiter(waiter.id()).is_some());
        assert!(registry.unregister_waiter(waiter.id()).is_some());
        assert!(registry.unregister_waiter(waiter.id()).is_none());
        registry.deliver(&store.allocate(Msg::B, None));
        assert_eq!(waiter.pending(), 0);
        assert_eq!(registry.waiter_count(), 0);
    }

    /// Тест проверяет гонку таймаута: сообщение, доставленное после
    /// истечения срока, но до снятия с регистрации, не возвращается и не
    /// остаётся живым.
    #[test]
    fn test_retire_releases_delivery_after_timeout() {
        let store = MessageStore::new();
        let registry = SubscriptionRegistry::new(8);
        let waiter = registry.register_waiter_single(Msg::A);

        assert_eq!(
            waiter.take(WaitTimeout::NoWait).unwrap_err(),
            BusError::Timeout
        );
        let report = registry.deliver(&store.allocate(Msg::A, None));
        assert_eq!(report.delivered, 1);
        assert_eq!(store.live_messages(), 1);

        assert_eq!(registry.retire_waiter(&waiter), 1);
        assert_eq!(store.live_messages(), 0);
        assert_eq!(registry.waiter_count(), 0);

        registry.deliver(&store.allocate(Msg::A, None));
        assert_eq!(waiter.pending(), 0);
        assert_eq!(store.live_messages(), 0);
    }

    #[test]
    fn test_close_waiters() {
        let registry = SubscriptionRegistry::<Msg>::new(8);
        let waiter = registry.register_waiter_single(Msg::A);
        assert_eq!(registry.close_waiters(BusError::ShutDown), 1);
        assert_eq!(
            waiter.take(WaitTimeout::NoWait).unwrap_err(),
            BusError::ShutDown
        );
    }
}
