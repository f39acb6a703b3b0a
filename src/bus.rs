use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use taskbus_error::{BusError, BusResult};
use tracing::{debug, error, info};

use crate::{
    config::BusConfig,
    dispatch::{self, DispatchEngine},
    message::{Kind, Message, MessageStore, OwnedPayload, PayloadHook},
    registry::{Callback, SubscriptionRegistry},
    schedule::{
        self, LoopId, Mailbox, Republish, ScheduleEngine, ScheduleHandles, TimerService,
    },
    wait::{SubscriberId, Subscriber, WaitTimeout},
};

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

/// Шина сообщений.
///
/// Дешёвый `Clone`-дескриптор общего состояния: клоны можно раздавать
/// потокам и захватывать в обработчиках (например, чтобы публиковать из
/// обработчика). Несколько независимых шин в одном процессе допустимы.
///
/// Обработчик, захвативший `Bus`, держит шину живой, пока не вызван
/// [`shutdown`](Bus::shutdown): он снимает все подписки.
pub struct Bus<K: Kind> {
    core: Arc<Core<K>>,
}

/// Общее состояние шины.
pub(crate) struct Core<K: Kind> {
    config: BusConfig,
    state: AtomicU8,
    store: MessageStore<K>,
    registry: SubscriptionRegistry<K>,
    dispatch: DispatchEngine<K>,
    schedule: ScheduleEngine<K>,
    runtime: Mutex<Option<Runtime<K>>>,
}

/// Потоки и службы, живущие между `start` и `shutdown`.
struct Runtime<K: Kind> {
    handles: ScheduleHandles<K>,
    threads: Vec<JoinHandle<()>>,
}

/// Снимок счётчиков шины.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Сообщения, на которые ещё есть ссылки.
    pub live_messages: usize,
    pub allocated: u64,
    pub freed: u64,
    /// Сообщения в очереди диспетчера.
    pub pending: usize,
    pub dispatched: u64,
    pub callbacks_invoked: u64,
    pub callback_panics: u64,
    pub waiter_deliveries: u64,
    pub skipped_deliveries: u64,
    pub subscriptions: usize,
    pub waiters: usize,
    pub scheduled: usize,
    pub delayed: usize,
    pub loops: usize,
    /// События, которые ждут рабочий поток расписаний.
    pub schedule_queue: usize,
    pub scheduled_fired: u64,
    pub stale_timer_events: u64,
    pub failed_republish: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Жизненный цикл
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Bus<K> {
    /// Создаёт шину без потоков. Все операции, кроме регистрации хуков и
    /// статистики, до [`start`](Self::start) возвращают `NotInitialized`.
    pub fn new(config: BusConfig) -> Self {
        let registry = SubscriptionRegistry::new(config.waiter_pending_limit);
        Self {
            core: Arc::new(Core {
                config,
                state: AtomicU8::new(IDLE),
                store: MessageStore::new(),
                registry,
                dispatch: DispatchEngine::new(),
                schedule: ScheduleEngine::new(),
                runtime: Mutex::new(None),
            }),
        }
    }

    /// `new` + `start`.
    pub fn init(config: BusConfig) -> BusResult<Self> {
        let bus = Self::new(config);
        bus.start()?;
        Ok(bus)
    }

    /// Запускает поток диспетчера, службу таймеров и рабочий поток
    /// расписаний.
    ///
    /// Повторный запуск возвращает `Busy`. Если поток не удалось создать, шина
    /// остаётся неинициализированной и `start` можно повторить.
    pub fn start(&self) -> BusResult<()> {
        self.core.config.validate()?;
        match self
            .core
            .state
            .compare_exchange(IDLE, STARTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(STOPPED) => return Err(BusError::ShutDown),
            Err(_) => {
                return Err(BusError::Busy {
                    reason: "message bus already started".into(),
                })
            }
        }

        match self.spawn_runtime() {
            Ok(runtime) => {
                let mailbox_capacity = runtime.handles.mailbox.capacity();
                *self.core.runtime.lock() = Some(runtime);
                if self
                    .core
                    .state
                    .compare_exchange(STARTING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // shutdown пришёл во время запуска
                    self.stop_runtime();
                    return Err(BusError::ShutDown);
                }
                info!(
                    dispatch_thread = %self.core.config.dispatch_thread_name,
                    mailbox_capacity,
                    "message bus started"
                );
                Ok(())
            }
            Err(err) => {
                let _ = self.core.state.compare_exchange(
                    STARTING,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                error!(error = %err, "message bus failed to start");
                Err(err)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.state.load(Ordering::Acquire) == RUNNING
    }

    /// Останавливает и дожидается рабочих потоков, освобождает
    /// недоставленные сообщения и кэш расписаний, будит ожидающих с
    /// ошибкой `ShutDown` и снимает все подписки.
    ///
    /// Повторный вызов ничего не делает. Вызов из обработчика допустим:
    /// текущий поток не ожидается.
    pub fn shutdown(&self) {
        if self.core.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }

        self.stop_runtime();
        let dropped = self.core.dispatch.close();
        let woken = self.core.registry.close_waiters(BusError::ShutDown);
        self.core.registry.clear_callbacks();
        self.core.schedule.clear();
        info!(
            dropped_messages = dropped,
            woken_waiters = woken,
            live_messages = self.core.store.live_messages(),
            "message bus shut down"
        );
    }

    /// Закрывает службы и дожидается рабочих потоков, кроме текущего.
    fn stop_runtime(&self) {
        let runtime = self.core.runtime.lock().take();
        self.core.dispatch.signal().close();
        let Some(runtime) = runtime else {
            return;
        };
        runtime.handles.mailbox.close();
        runtime.handles.timers.close();
        let current = thread::current().id();
        let timer_thread = runtime.handles.timers.take_thread();
        for handle in runtime.threads.into_iter().chain(timer_thread) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("bus worker thread panicked");
            }
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }

    fn spawn_runtime(&self) -> BusResult<Runtime<K>> {
        let cfg = &self.core.config;

        let timers = TimerService::spawn(&cfg.timer_thread_name)
            .map_err(|e| spawn_error(&cfg.timer_thread_name, e))?;
        let (mailbox, events) = Mailbox::channel(cfg.schedule_mailbox_capacity);
        let handles = ScheduleHandles {
            timers: Arc::new(timers),
            mailbox: Arc::new(mailbox),
        };

        let worker = {
            let core = Arc::downgrade(&self.core);
            let handles = handles.clone();
            spawn_thread(&cfg.schedule_thread_name, cfg.schedule_stack_size, move || {
                schedule::run_worker(core, handles, events)
            })
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                stop_timers(&handles.timers);
                return Err(err);
            }
        };

        let dispatcher = {
            let core = Arc::downgrade(&self.core);
            let signal = self.core.dispatch.signal();
            spawn_thread(&cfg.dispatch_thread_name, cfg.dispatch_stack_size, move || {
                dispatch::run(core, signal)
            })
        };
        match dispatcher {
            Ok(dispatcher) => Ok(Runtime {
                handles,
                threads: vec![dispatcher, worker],
            }),
            Err(err) => {
                handles.mailbox.close();
                let _ = worker.join();
                stop_timers(&handles.timers);
                Err(err)
            }
        }
    }

    fn ensure_running(&self) -> BusResult<()> {
        match self.core.state.load(Ordering::Acquire) {
            RUNNING => Ok(()),
            STOPPED => Err(BusError::ShutDown),
            _ => Err(BusError::NotInitialized),
        }
    }

    fn handles(&self) -> BusResult<ScheduleHandles<K>> {
        self.ensure_running()?;
        self.core
            .runtime
            .lock()
            .as_ref()
            .map(|rt| rt.handles.clone())
            .ok_or(BusError::ShutDown)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Публикация и подписки
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Bus<K> {
    /// Регистрирует хук дублирования/освобождения объектов вида `kind`.
    pub fn register_hook<H: PayloadHook>(
        &self,
        kind: K,
        hook: H,
    ) {
        self.core.store.register_hook(kind, Arc::new(hook));
        debug!(kind = ?kind, "payload hook registered");
    }

    /// Публикует сообщение с текстом или без нагрузки.
    ///
    /// Текст копируется; размер нагрузки равен длине текста в байтах.
    pub fn publish(
        &self,
        kind: K,
        text: Option<&str>,
    ) -> BusResult<()> {
        self.ensure_running()?;
        let payload = text.map(|t| self.core.store.bytes_payload(t.as_bytes()));
        self.core.publish_payload(kind, payload)
    }

    /// Публикует копию сырых байтов.
    pub fn publish_bytes(
        &self,
        kind: K,
        data: &[u8],
    ) -> BusResult<()> {
        self.ensure_running()?;
        let payload = self.core.store.bytes_payload(data);
        self.core.publish_payload(kind, Some(payload))
    }

    /// Публикует копию объекта: через хук вида, если он есть, иначе через
    /// `Clone`. Изменение `obj` после вызова на сообщение не влияет.
    pub fn publish_obj<T>(
        &self,
        kind: K,
        obj: &T,
    ) -> BusResult<()>
    where
        T: Any + Clone + Send + Sync,
    {
        self.ensure_running()?;
        let payload = self.core.store.object_payload(kind, obj)?;
        self.core.publish_payload(kind, Some(payload))
    }

    /// Подписывает обработчик. Повторная подписка того же `Arc` на тот же
    /// вид даёт предупреждение в логе, а не ошибку.
    pub fn subscribe(
        &self,
        kind: K,
        callback: Callback<K>,
    ) -> BusResult<()> {
        self.ensure_running()?;
        self.core.registry.subscribe(kind, callback);
        Ok(())
    }

    /// Подписывает замыкание и возвращает его `Arc` для последующей
    /// отписки.
    pub fn subscribe_fn<F>(
        &self,
        kind: K,
        f: F,
    ) -> BusResult<Callback<K>>
    where
        F: Fn(&Message<K>) + Send + Sync + 'static,
    {
        let callback: Callback<K> = Arc::new(f);
        self.subscribe(kind, callback.clone())?;
        Ok(callback)
    }

    pub fn unsubscribe(
        &self,
        kind: K,
        callback: &Callback<K>,
    ) -> BusResult<()> {
        self.ensure_running()?;
        self.core.registry.unsubscribe(kind, callback);
        Ok(())
    }

    /// Явно освобождает полученное сообщение. Аналогично `drop(msg)`.
    pub fn release(
        &self,
        msg: Message<K>,
    ) {
        drop(msg);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Ожидание
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Bus<K> {
    /// Создаёт постоянного подписчика на один вид.
    pub fn subscriber_create(
        &self,
        kind: K,
    ) -> BusResult<SubscriberId> {
        self.ensure_running()?;
        Ok(self.core.registry.register_waiter_single(kind).id())
    }

    /// Создаёт постоянного подписчика на несколько видов; повторы в списке
    /// не учитываются.
    pub fn subscriber_create_multi(
        &self,
        kinds: &[K],
    ) -> BusResult<SubscriberId> {
        self.ensure_running()?;
        Ok(self.core.registry.register_waiter_multi(kinds)?.id())
    }

    /// Удаляет подписчика и освобождает доставленные ему, но не забранные
    /// сообщения. Заблокированный в ожидании поток получает
    /// `UnknownSubscriber`.
    pub fn subscriber_delete(
        &self,
        id: SubscriberId,
    ) -> BusResult<()> {
        self.ensure_running()?;
        let slot = self
            .core
            .registry
            .unregister_waiter(id)
            .ok_or(BusError::UnknownSubscriber { id: id.as_u32() })?;
        let pending = slot.pending();
        slot.close(BusError::UnknownSubscriber { id: id.as_u32() });
        debug!(subscriber_id = id.as_u32(), released = pending, "subscriber deleted");
        Ok(())
    }

    /// Постоянный подписчик, удаляемый при `Drop`.
    pub fn subscriber(
        &self,
        kind: K,
    ) -> BusResult<Subscriber<K>> {
        let id = self.subscriber_create(kind)?;
        Ok(Subscriber::new(self.clone(), id))
    }

    pub fn subscriber_multi(
        &self,
        kinds: &[K],
    ) -> BusResult<Subscriber<K>> {
        let id = self.subscriber_create_multi(kinds)?;
        Ok(Subscriber::new(self.clone(), id))
    }

    /// Ждёт следующее сообщение постоянного подписчика.
    ///
    /// Вызывающий становится владельцем ссылки на сообщение.
    pub fn wait_until(
        &self,
        id: SubscriberId,
        timeout: impl Into<WaitTimeout>,
    ) -> BusResult<Message<K>> {
        self.ensure_running()?;
        let slot = self
            .core
            .registry
            .find_waiter(id)
            .ok_or(BusError::UnknownSubscriber { id: id.as_u32() })?;
        slot.take(timeout.into())
    }

    /// Одноразовое ожидание сообщения вида `kind`.
    ///
    /// Учитываются только сообщения, опубликованные после вызова. Не ждёт
    /// дольше `timeout`: сообщение, пришедшее сразу после таймаута,
    /// освобождается, а не возвращается.
    pub fn wait_kind(
        &self,
        kind: K,
        timeout: impl Into<WaitTimeout>,
    ) -> BusResult<Message<K>> {
        self.ensure_running()?;
        let slot = self.core.registry.register_waiter_single(kind);
        self.finish_wait(slot, timeout.into())
    }

    /// Одноразовое ожидание первого сообщения любого из `kinds`.
    pub fn wait_any(
        &self,
        kinds: &[K],
        timeout: impl Into<WaitTimeout>,
    ) -> BusResult<Message<K>> {
        self.ensure_running()?;
        let slot = self.core.registry.register_waiter_multi(kinds)?;
        self.finish_wait(slot, timeout.into())
    }

    fn finish_wait(
        &self,
        slot: Arc<crate::wait::WaiterSlot<K>>,
        timeout: WaitTimeout,
    ) -> BusResult<Message<K>> {
        let result = slot.take(timeout);
        let raced = self.core.registry.retire_waiter(&slot);
        if raced > 0 {
            debug!(subscriber_id = slot.id().as_u32(), raced, "late deliveries released");
        }
        result
    }
}

////////////////////////////////////////////////////////////////////////////////
// Расписания
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Bus<K> {
    /// Сохраняет (или заменяет) текст расписания `kind`, не взводя таймер.
    pub fn scheduled_append(
        &self,
        kind: K,
        text: Option<&str>,
    ) -> BusResult<()> {
        self.ensure_running()?;
        let payload = text.map(|t| self.core.store.bytes_payload(t.as_bytes()));
        self.core.schedule.append(kind, payload);
        Ok(())
    }

    /// То же для объекта; копия делается сразу.
    pub fn scheduled_append_obj<T>(
        &self,
        kind: K,
        obj: &T,
    ) -> BusResult<()>
    where
        T: Any + Clone + Send + Sync,
    {
        self.ensure_running()?;
        let payload = self.core.store.object_payload(kind, obj)?;
        self.core.schedule.append(kind, Some(payload));
        Ok(())
    }

    /// Первая публикация через `delay`, затем каждые `interval`; всего
    /// `repeat` публикаций (`0` без ограничения). Повторный вызов задаёт новый
    /// темп и обнуляет счётчик.
    pub fn scheduled_start(
        &self,
        kind: K,
        delay: Duration,
        repeat: u32,
        interval: Duration,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.start(&handles, kind, delay, repeat, interval)
    }

    /// Немедленная публикация расписания без ожидания таймера. Не
    /// блокируется; при переполненном ящике возвращает `QueueFull`.
    pub fn scheduled_restart(
        &self,
        kind: K,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.restart(&handles, kind)
    }

    pub fn scheduled_stop(
        &self,
        kind: K,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.stop(&handles, kind);
        Ok(())
    }

    pub fn scheduled_delete(
        &self,
        kind: K,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.delete(&handles, kind);
        Ok(())
    }

    /// Однократная публикация текста через `delay`.
    pub fn delay_publish(
        &self,
        delay: Duration,
        kind: K,
        text: Option<&str>,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        let payload = text.map(|t| self.core.store.bytes_payload(t.as_bytes()));
        self.core.schedule.delay(&handles, kind, delay, payload)
    }

    pub fn delay_publish_obj<T>(
        &self,
        delay: Duration,
        kind: K,
        obj: &T,
    ) -> BusResult<()>
    where
        T: Any + Clone + Send + Sync,
    {
        let handles = self.handles()?;
        let payload = self.core.store.object_payload(kind, obj)?;
        self.core.schedule.delay(&handles, kind, delay, Some(payload))
    }

    /// Создаёт остановленный цикл для вида `kind`.
    pub fn loop_create(
        &self,
        kind: K,
    ) -> BusResult<LoopId> {
        let handles = self.handles()?;
        Ok(self.core.schedule.loop_create(&handles, kind))
    }

    /// Запускает цикл: публикация текста каждые `period`.
    pub fn loop_start(
        &self,
        id: LoopId,
        period: Duration,
        text: Option<&str>,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        let store = &self.core.store;
        self.core.schedule.loop_start(&handles, id, period, |_| {
            Ok(text.map(|t| store.bytes_payload(t.as_bytes())))
        })
    }

    pub fn loop_start_obj<T>(
        &self,
        id: LoopId,
        period: Duration,
        obj: &T,
    ) -> BusResult<()>
    where
        T: Any + Clone + Send + Sync,
    {
        let handles = self.handles()?;
        let store = &self.core.store;
        self.core.schedule.loop_start(&handles, id, period, |kind| {
            store.object_payload(kind, obj).map(Some)
        })
    }

    pub fn loop_stop(
        &self,
        id: LoopId,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.loop_stop(&handles, id)
    }

    pub fn loop_delete(
        &self,
        id: LoopId,
    ) -> BusResult<()> {
        let handles = self.handles()?;
        self.core.schedule.loop_delete(&handles, id)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Статистика
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Bus<K> {
    pub fn stats(&self) -> BusStats {
        let store = self.core.store.stats();
        let dispatch = self.core.dispatch.stats();
        let schedule = self.core.schedule.stats();
        BusStats {
            live_messages: store.live(),
            allocated: store.allocated(),
            freed: store.freed(),
            pending: self.core.dispatch.pending(),
            dispatched: dispatch.dispatched.load(Ordering::Relaxed),
            callbacks_invoked: dispatch.callbacks.load(Ordering::Relaxed),
            callback_panics: dispatch.callback_panics.load(Ordering::Relaxed),
            waiter_deliveries: dispatch.waiter_deliveries.load(Ordering::Relaxed),
            skipped_deliveries: dispatch.skipped_deliveries.load(Ordering::Relaxed),
            subscriptions: self.core.registry.callback_count(),
            waiters: self.core.registry.waiter_count(),
            scheduled: self.core.schedule.scheduled_count(),
            delayed: self.core.schedule.delayed_count(),
            loops: self.core.schedule.loop_count(),
            schedule_queue: self
                .core
                .runtime
                .lock()
                .as_ref()
                .map_or(0, |rt| rt.handles.mailbox.queued()),
            scheduled_fired: schedule.fired.load(Ordering::Relaxed),
            stale_timer_events: schedule.stale.load(Ordering::Relaxed),
            failed_republish: schedule.failed.load(Ordering::Relaxed),
        }
    }

    /// Число сообщений, на которые ещё есть ссылки.
    pub fn live_messages(&self) -> usize {
        self.core.store.live_messages()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Core
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Core<K> {
    pub(crate) fn dispatch(&self) -> &DispatchEngine<K> {
        &self.dispatch
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry<K> {
        &self.registry
    }

    pub(crate) fn schedule(&self) -> &ScheduleEngine<K> {
        &self.schedule
    }

    /// Общий путь публикации: сообщение создаётся целиком и только потом
    /// попадает в очередь.
    fn publish_payload(
        &self,
        kind: K,
        payload: Option<OwnedPayload>,
    ) -> BusResult<()> {
        let msg = self.store.allocate(kind, payload);
        self.dispatch.enqueue(msg)
    }
}

impl<K: Kind> Republish<K> for Core<K> {
    fn duplicate(
        &self,
        kind: K,
        src: &OwnedPayload,
    ) -> BusResult<OwnedPayload> {
        self.store.duplicate(kind, src)
    }

    fn republish(
        &self,
        kind: K,
        payload: Option<OwnedPayload>,
    ) -> BusResult<()> {
        self.publish_payload(kind, payload)
    }
}

impl<K: Kind> Drop for Core<K> {
    fn drop(&mut self) {
        // Последний дескриптор ушёл без shutdown: потоки только получают
        // сигнал остановиться, ждать их здесь нельзя (drop может идти в
        // одном из них).
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.handles.mailbox.close();
            runtime.handles.timers.close();
        }
        self.dispatch.signal().close();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Clone for Bus<K> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K: Kind> Default for Bus<K> {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl<K: Kind> fmt::Debug for Bus<K> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Bus")
            .field("running", &self.is_running())
            .field("registry", &self.core.registry)
            .field("pending", &self.core.dispatch.pending())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние функции
////////////////////////////////////////////////////////////////////////////////

fn spawn_thread<F>(
    name: &str,
    stack_size: Option<usize>,
    f: F,
) -> BusResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new().name(name.to_string());
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }
    builder.spawn(f).map_err(|e| spawn_error(name, e))
}

fn spawn_error(
    thread: &str,
    err: std::io::Error,
) -> BusError {
    BusError::ThreadSpawn {
        thread: thread.to_string(),
        reason: err.to_string(),
    }
}

fn stop_timers(timers: &TimerService) {
    timers.close();
    if let Some(handle) = timers.take_thread() {
        let _ = handle.join();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Msg {
        Ping,
    }

    /// Тест проверяет, что до `start` операции возвращают `NotInitialized`.
    #[test]
    fn test_operations_before_start() {
        let bus: Bus<Msg> = Bus::new(BusConfig::default());
        assert!(!bus.is_running());
        assert_eq!(bus.publish(Msg::Ping, None), Err(BusError::NotInitialized));
        assert_eq!(
            bus.subscriber_create(Msg::Ping).unwrap_err(),
            BusError::NotInitialized
        );
        assert_eq!(
            bus.scheduled_start(Msg::Ping, Duration::ZERO, 1, Duration::ZERO),
            Err(BusError::NotInitialized)
        );
    }

    /// Тест проверяет, что повторный `start` возвращает `Busy`, а после `shutdown`
    /// шину нельзя запустить снова.
    #[test]
    fn test_double_start_and_restart_after_shutdown() {
        let bus: Bus<Msg> = Bus::init(BusConfig::default()).unwrap();
        assert!(matches!(bus.start(), Err(BusError::Busy { .. })));
        bus.shutdown();
        bus.shutdown();
        assert_eq!(bus.start(), Err(BusError::ShutDown));
        assert_eq!(bus.publish(Msg::Ping, None), Err(BusError::ShutDown));
    }

    /// Тест проверяет, что неверная конфигурация не переводит шину в
    /// запущенное состояние.
    #[test]
    fn test_invalid_config_keeps_bus_startable() {
        let bus: Bus<Msg> = Bus::new(BusConfig {
            waiter_pending_limit: 0,
            ..Default::default()
        });
        assert!(matches!(
            bus.start(),
            Err(BusError::InvalidArgument { .. })
        ));
        assert!(!bus.is_running());
        assert_eq!(bus.publish(Msg::Ping, None), Err(BusError::NotInitialized));
    }

    /// Тест проверяет, что `shutdown` из обработчика не зависает на
    /// ожидании собственного потока.
    #[test]
    fn test_shutdown_from_callback() {
        let bus: Bus<Msg> = Bus::init(BusConfig::default()).unwrap();
        let inner = bus.clone();
        bus.subscribe_fn(Msg::Ping, move |_msg| inner.shutdown())
            .unwrap();
        bus.publish(Msg::Ping, None).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while bus.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!bus.is_running());
        assert_eq!(bus.stats().subscriptions, 0);
    }
}
