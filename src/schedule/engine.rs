use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use taskbus_error::{BusError, BusResult};
use tracing::{debug, error, trace};

use super::{
    timer::{TimerCallback, TimerId},
    LoopId, Mailbox, ScheduleEvent, ScheduleHandles,
};
use crate::message::{Kind, OwnedPayload};

/// Обратный путь в шину: расписания публикуют так же, как внешний
/// производитель.
pub(crate) trait Republish<K: Kind> {
    /// Свежая копия кэшированной нагрузки через хук вида.
    fn duplicate(
        &self,
        kind: K,
        src: &OwnedPayload,
    ) -> BusResult<OwnedPayload>;

    /// Публикует готовую нагрузку.
    fn republish(
        &self,
        kind: K,
        payload: Option<OwnedPayload>,
    ) -> BusResult<()>;
}

/// Расписание одного вида сообщения.
#[derive(Debug, Default)]
struct ScheduleEntry {
    payload: Option<Arc<OwnedPayload>>,
    /// `0` без ограничения.
    repeat: u32,
    fired: u32,
    interval: Duration,
    stopped: bool,
    started: bool,
    timer: Option<TimerId>,
    /// Поколение таймера, события которого ещё принимаются.
    armed_gen: Option<u64>,
}

struct DelayedEntry<K: Kind> {
    kind: K,
    payload: Option<OwnedPayload>,
    timer: TimerId,
}

struct LoopEntry<K: Kind> {
    kind: K,
    payload: Option<Arc<OwnedPayload>>,
    period: Option<Duration>,
    timer: TimerId,
    armed_gen: Option<u64>,
}

/// Счётчики слоя расписаний.
#[derive(Debug, Default)]
pub(crate) struct ScheduleStats {
    pub(crate) fired: AtomicU64,
    pub(crate) stale: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// Таблицы расписаний, отложенных сообщений и циклов.
///
/// Каждая таблица под своей блокировкой. Пользовательский код под ними не
/// выполняется: кэшированная нагрузка лежит в `Arc`, под блокировкой
/// берётся только ссылка на неё, а хук копирования и публикация идут уже
/// без блокировки.
pub(crate) struct ScheduleEngine<K: Kind> {
    entries: Mutex<HashMap<K, ScheduleEntry>>,
    delayed: Mutex<HashMap<u64, DelayedEntry<K>>>,
    loops: Mutex<HashMap<LoopId, LoopEntry<K>>>,
    next_delayed: AtomicU64,
    next_loop: AtomicU32,
    stats: ScheduleStats,
}

impl<K: Kind> ScheduleEngine<K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            delayed: Mutex::new(HashMap::new()),
            loops: Mutex::new(HashMap::new()),
            next_delayed: AtomicU64::new(1),
            next_loop: AtomicU32::new(1),
            stats: ScheduleStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> &ScheduleStats {
        &self.stats
    }

    /// Создаёт расписание или заменяет его кэшированную нагрузку. Темп и
    /// таймер существующего расписания не меняются.
    pub(crate) fn append(
        &self,
        kind: K,
        payload: Option<OwnedPayload>,
    ) {
        let old = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(kind).or_default();
            std::mem::replace(&mut entry.payload, payload.map(Arc::new))
        };
        drop(old);
        debug!(kind = ?kind, "scheduled payload stored");
    }

    /// Взводит расписание: первая публикация через `delay`, затем каждые
    /// `interval`, всего `repeat` раз (`0` без ограничения).
    pub(crate) fn start(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
        delay: Duration,
        repeat: u32,
        interval: Duration,
    ) -> BusResult<()> {
        if interval.is_zero() && repeat != 1 {
            return Err(BusError::invalid("zero interval for a repeating schedule"));
        }

        let mut entries = self.entries.lock();
        let entry = entries.entry(kind).or_default();
        let timer = match entry.timer {
            Some(timer) => timer,
            None => {
                let timer = handles.timers.create(post_on_fire(&handles.mailbox, move |generation| {
                    ScheduleEvent::Timer { kind, generation }
                }));
                entry.timer = Some(timer);
                timer
            }
        };

        entry.repeat = repeat;
        entry.interval = interval;
        entry.fired = 0;
        entry.started = true;
        entry.stopped = false;
        entry.armed_gen = Some(handles.timers.arm(timer, delay, None).ok_or(BusError::ShutDown)?);
        debug!(kind = ?kind, ?delay, repeat, ?interval, "schedule started");
        Ok(())
    }

    /// Просит рабочий поток опубликовать расписание немедленно. Не
    /// блокируется и ничего не выделяет сверх события в ящике.
    pub(crate) fn restart(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
    ) -> BusResult<()> {
        handles.mailbox.post(ScheduleEvent::Restart(kind))
    }

    /// Останавливает таймер; нагрузка остаётся для будущего restart.
    pub(crate) fn stop(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
    ) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&kind) {
            entry.stopped = true;
            entry.armed_gen = None;
            if let Some(timer) = entry.timer {
                handles.timers.disarm(timer);
            }
            debug!(kind = ?kind, fired = entry.fired, "schedule stopped");
        }
    }

    pub(crate) fn delete(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
    ) -> bool {
        let removed = self.entries.lock().remove(&kind);
        match removed {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    handles.timers.remove(timer);
                }
                debug!(kind = ?kind, "schedule deleted");
                true
            }
            None => false,
        }
    }

    /// Однократная публикация через `delay`. Нагрузка уже скопирована
    /// вызывающим и публикуется как есть.
    pub(crate) fn delay(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
        delay: Duration,
        payload: Option<OwnedPayload>,
    ) -> BusResult<()> {
        let id = self.next_delayed.fetch_add(1, Ordering::Relaxed);
        let timer = handles
            .timers
            .create(post_on_fire(&handles.mailbox, move |_| ScheduleEvent::Delayed(id)));
        self.delayed.lock().insert(
            id,
            DelayedEntry {
                kind,
                payload,
                timer,
            },
        );

        if handles.timers.arm(timer, delay, None).is_none() {
            let entry = self.delayed.lock().remove(&id);
            drop(entry);
            handles.timers.remove(timer);
            return Err(BusError::ShutDown);
        }
        trace!(kind = ?kind, delayed_id = id, ?delay, "delayed publish armed");
        Ok(())
    }

    pub(crate) fn loop_create(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
    ) -> LoopId {
        let id = LoopId(self.next_loop.fetch_add(1, Ordering::Relaxed));
        let timer = handles.timers.create(post_on_fire(&handles.mailbox, move |generation| {
            ScheduleEvent::LoopTick { id, generation }
        }));
        self.loops.lock().insert(
            id,
            LoopEntry {
                kind,
                payload: None,
                period: None,
                timer,
                armed_gen: None,
            },
        );
        debug!(loop_id = id.0, kind = ?kind, "loop created");
        id
    }

    /// (Пере)запускает цикл с новой нагрузкой и периодом.
    ///
    /// Старая нагрузка освобождается до того, как `make` создаст новую для
    /// вида сообщения цикла.
    pub(crate) fn loop_start<F>(
        &self,
        handles: &ScheduleHandles<K>,
        id: LoopId,
        period: Duration,
        make: F,
    ) -> BusResult<()>
    where
        F: FnOnce(K) -> BusResult<Option<OwnedPayload>>,
    {
        if period.is_zero() {
            return Err(BusError::invalid("zero loop period"));
        }

        let (kind, old) = {
            let mut loops = self.loops.lock();
            let entry = loops.get_mut(&id).ok_or(BusError::UnknownLoop { id: id.0 })?;
            handles.timers.disarm(entry.timer);
            entry.armed_gen = None;
            (entry.kind, entry.payload.take())
        };
        drop(old);

        let payload = make(kind)?;

        let mut loops = self.loops.lock();
        let entry = loops.get_mut(&id).ok_or(BusError::UnknownLoop { id: id.0 })?;
        entry.payload = payload.map(Arc::new);
        entry.period = Some(period);
        entry.armed_gen = Some(
            handles
                .timers
                .arm(entry.timer, period, Some(period))
                .ok_or(BusError::ShutDown)?,
        );
        debug!(loop_id = id.0, kind = ?entry.kind, ?period, "loop started");
        Ok(())
    }

    pub(crate) fn loop_stop(
        &self,
        handles: &ScheduleHandles<K>,
        id: LoopId,
    ) -> BusResult<()> {
        let mut loops = self.loops.lock();
        let entry = loops.get_mut(&id).ok_or(BusError::UnknownLoop { id: id.0 })?;
        handles.timers.disarm(entry.timer);
        entry.armed_gen = None;
        debug!(loop_id = id.0, period = ?entry.period, "loop stopped");
        Ok(())
    }

    pub(crate) fn loop_delete(
        &self,
        handles: &ScheduleHandles<K>,
        id: LoopId,
    ) -> BusResult<()> {
        let entry = self
            .loops
            .lock()
            .remove(&id)
            .ok_or(BusError::UnknownLoop { id: id.0 })?;
        handles.timers.remove(entry.timer);
        drop(entry);
        debug!(loop_id = id.0, "loop deleted");
        Ok(())
    }

    /// Обрабатывает одно событие ящика в рабочем потоке расписаний.
    pub(crate) fn handle<P>(
        &self,
        handles: &ScheduleHandles<K>,
        event: ScheduleEvent<K>,
        publisher: &P,
    ) where
        P: Republish<K> + ?Sized,
    {
        match event {
            ScheduleEvent::Timer { kind, generation } => {
                self.on_schedule(handles, kind, Some(generation), publisher)
            }
            ScheduleEvent::Restart(kind) => self.on_schedule(handles, kind, None, publisher),
            ScheduleEvent::Delayed(id) => self.on_delayed(handles, id, publisher),
            ScheduleEvent::LoopTick { id, generation } => self.on_loop(id, generation, publisher),
            ScheduleEvent::Shutdown => {}
        }
    }

    /// Освобождает все кэшированные нагрузки.
    pub(crate) fn clear(&self) {
        let entries: Vec<_> = self.entries.lock().drain().collect();
        let delayed: Vec<_> = self.delayed.lock().drain().collect();
        let loops: Vec<_> = self.loops.lock().drain().collect();
        debug!(
            scheduled = entries.len(),
            delayed = delayed.len(),
            loops = loops.len(),
            "schedule tables cleared"
        );
    }

    pub(crate) fn scheduled_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn delayed_count(&self) -> usize {
        self.delayed.lock().len()
    }

    pub(crate) fn loop_count(&self) -> usize {
        self.loops.lock().len()
    }

    /// Срабатывание расписания: по таймеру (`generation` задано) или
    /// через restart.
    fn on_schedule<P>(
        &self,
        handles: &ScheduleHandles<K>,
        kind: K,
        generation: Option<u64>,
        publisher: &P,
    ) where
        P: Republish<K> + ?Sized,
    {
        let cached = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&kind) else {
                trace!(kind = ?kind, "event for unknown schedule ignored");
                return;
            };
            match generation {
                Some(gen) if entry.stopped || entry.armed_gen != Some(gen) => {
                    self.stats.stale.fetch_add(1, Ordering::Relaxed);
                    trace!(kind = ?kind, generation = gen, "stale timer event ignored");
                    return;
                }
                Some(_) => {}
                None => entry.stopped = false,
            }

            let cached = entry.payload.clone();
            entry.fired = entry.fired.saturating_add(1);
            let more = entry.started && (entry.repeat == 0 || entry.fired < entry.repeat);

            match entry.timer {
                Some(timer) if more => {
                    if !handles.timers.is_armed(timer) {
                        entry.armed_gen =
                            handles.timers.arm(timer, entry.interval, Some(entry.interval));
                    }
                }
                timer => {
                    if let Some(timer) = timer {
                        handles.timers.disarm(timer);
                    }
                    entry.armed_gen = None;
                    entry.stopped = true;
                    debug!(kind = ?kind, fired = entry.fired, "schedule finished");
                }
            }
            cached
        };

        let copy = cached
            .as_deref()
            .map(|p| publisher.duplicate(kind, p))
            .transpose();
        drop(cached);
        self.stats.fired.fetch_add(1, Ordering::Relaxed);
        self.publish(kind, copy, publisher);
    }

    fn on_delayed<P>(
        &self,
        handles: &ScheduleHandles<K>,
        id: u64,
        publisher: &P,
    ) where
        P: Republish<K> + ?Sized,
    {
        let Some(entry) = self.delayed.lock().remove(&id) else {
            trace!(delayed_id = id, "delayed entry already gone");
            return;
        };
        handles.timers.remove(entry.timer);
        self.stats.fired.fetch_add(1, Ordering::Relaxed);
        self.publish(entry.kind, Ok(entry.payload), publisher);
    }

    fn on_loop<P>(
        &self,
        id: LoopId,
        generation: u64,
        publisher: &P,
    ) where
        P: Republish<K> + ?Sized,
    {
        let (kind, cached) = {
            let loops = self.loops.lock();
            let Some(entry) = loops.get(&id) else {
                return;
            };
            if entry.armed_gen != Some(generation) {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                trace!(loop_id = id.0, generation, "stale loop tick ignored");
                return;
            }
            (entry.kind, entry.payload.clone())
        };
        let copy = cached
            .as_deref()
            .map(|p| publisher.duplicate(kind, p))
            .transpose();
        drop(cached);
        self.stats.fired.fetch_add(1, Ordering::Relaxed);
        self.publish(kind, copy, publisher);
    }

    fn publish<P>(
        &self,
        kind: K,
        payload: BusResult<Option<OwnedPayload>>,
        publisher: &P,
    ) where
        P: Republish<K> + ?Sized,
    {
        if let Err(err) = payload.and_then(|p| publisher.republish(kind, p)) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(kind = ?kind, error = %err, "scheduled publish failed");
        }
    }
}

impl<K: Kind> Default for ScheduleEngine<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Обработчик таймера, который только кладёт событие в ящик.
fn post_on_fire<K, F>(
    mailbox: &Arc<Mailbox<K>>,
    make: F,
) -> TimerCallback
where
    K: Kind,
    F: Fn(u64) -> ScheduleEvent<K> + Send + Sync + 'static,
{
    let mailbox = mailbox.clone();
    Arc::new(move |generation| {
        if let Err(err) = mailbox.post_timer(make(generation)) {
            trace!(error = %err, "timer event after mailbox close ignored");
        }
    })
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        message::{MessageStore, ObjectPayload, Payload, TypedHook},
        schedule::TimerService,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Msg {
        Tick,
        Alarm,
    }

    /// Издатель, который просто запоминает опубликованное.
    #[derive(Default)]
    struct Recorder {
        store: MessageStore<Msg>,
        published: Mutex<Vec<(Msg, Option<String>)>>,
    }

    impl Republish<Msg> for Recorder {
        fn duplicate(
            &self,
            kind: Msg,
            src: &OwnedPayload,
        ) -> BusResult<OwnedPayload> {
            self.store.duplicate(kind, src)
        }

        fn republish(
            &self,
            kind: Msg,
            payload: Option<OwnedPayload>,
        ) -> BusResult<()> {
            let text = payload
                .as_ref()
                .and_then(|p| p.payload().as_text().map(str::to_string));
            self.published.lock().push((kind, text));
            Ok(())
        }
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.published.lock().len()
        }
    }

    fn handles() -> (ScheduleHandles<Msg>, mpsc::UnboundedReceiver<ScheduleEvent<Msg>>) {
        let (mailbox, rx) = Mailbox::channel(32);
        let handles = ScheduleHandles {
            timers: Arc::new(TimerService::spawn("test-timer").unwrap()),
            mailbox: Arc::new(mailbox),
        };
        (handles, rx)
    }

    fn armed_gen(
        engine: &ScheduleEngine<Msg>,
        kind: Msg,
    ) -> Option<u64> {
        engine.entries.lock().get(&kind).and_then(|e| e.armed_gen)
    }

    const LONG: Duration = Duration::from_secs(3600);

    /// Тест проверяет учёт повторов: ровно `repeat` публикаций, после чего
    /// расписание останавливается, а запоздалые события игнорируются.
    #[test]
    fn test_repeat_accounting() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        engine.append(Msg::Tick, Some(rec.store.bytes_payload(b"tick")));
        engine.start(&h, Msg::Tick, LONG, 3, LONG).unwrap();

        let first = armed_gen(&engine, Msg::Tick).unwrap();
        engine.handle(&h, ScheduleEvent::Timer { kind: Msg::Tick, generation: first }, &rec);
        assert_eq!(rec.count(), 1);

        // После первой публикации таймер становится периодическим.
        let periodic = armed_gen(&engine, Msg::Tick).unwrap();
        assert_ne!(first, periodic);
        engine.handle(&h, ScheduleEvent::Timer { kind: Msg::Tick, generation: first }, &rec);
        assert_eq!(rec.count(), 1);

        for _ in 0..2 {
            engine.handle(
                &h,
                ScheduleEvent::Timer { kind: Msg::Tick, generation: periodic },
                &rec,
            );
        }
        assert_eq!(rec.count(), 3);
        assert_eq!(armed_gen(&engine, Msg::Tick), None);

        engine.handle(&h, ScheduleEvent::Timer { kind: Msg::Tick, generation: periodic }, &rec);
        assert_eq!(rec.count(), 3);
        assert_eq!(
            rec.published.lock()[0],
            (Msg::Tick, Some("tick".to_string()))
        );
        h.timers.close();
    }

    /// Тест проверяет, что `start` без `append` создаёт расписание без
    /// нагрузки, а нулевой интервал для повторов отвергается.
    #[test]
    fn test_start_autocreates_and_validates() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        assert!(engine.start(&h, Msg::Alarm, LONG, 0, Duration::ZERO).is_err());
        engine.start(&h, Msg::Alarm, LONG, 1, Duration::ZERO).unwrap();
        assert_eq!(engine.scheduled_count(), 1);

        let gen = armed_gen(&engine, Msg::Alarm).unwrap();
        engine.handle(&h, ScheduleEvent::Timer { kind: Msg::Alarm, generation: gen }, &rec);
        assert_eq!(rec.published.lock().as_slice(), &[(Msg::Alarm, None)]);
        h.timers.close();
    }

    /// Тест проверяет, что после `stop` события таймера отбрасываются, а
    /// restart снова публикует и возобновляет расписание.
    #[test]
    fn test_stop_and_restart() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        engine.start(&h, Msg::Tick, LONG, 0, LONG).unwrap();
        let gen = armed_gen(&engine, Msg::Tick).unwrap();

        engine.stop(&h, Msg::Tick);
        engine.handle(&h, ScheduleEvent::Timer { kind: Msg::Tick, generation: gen }, &rec);
        assert_eq!(rec.count(), 0);
        assert_eq!(engine.stats().stale.load(Ordering::Relaxed), 1);

        engine.handle(&h, ScheduleEvent::Restart(Msg::Tick), &rec);
        assert_eq!(rec.count(), 1);
        let entries = engine.entries.lock();
        let entry = &entries[&Msg::Tick];
        assert!(!entry.stopped);
        assert!(entry.armed_gen.is_some());
        drop(entries);
        h.timers.close();
    }

    #[test]
    fn test_restart_posts_event() {
        let (h, mut rx) = handles();
        let engine = ScheduleEngine::<Msg>::new();
        engine.restart(&h, Msg::Alarm).unwrap();
        assert_eq!(rx.blocking_recv(), Some(ScheduleEvent::Restart(Msg::Alarm)));
        h.timers.close();
    }

    /// Тест проверяет, что `append` на существующем расписании меняет
    /// только нагрузку.
    #[test]
    fn test_append_keeps_cadence() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        engine.start(&h, Msg::Tick, LONG, 0, LONG).unwrap();
        let gen = armed_gen(&engine, Msg::Tick);
        engine.append(Msg::Tick, Some(rec.store.bytes_payload(b"new")));
        assert_eq!(armed_gen(&engine, Msg::Tick), gen);

        engine.handle(&h, ScheduleEvent::Restart(Msg::Tick), &rec);
        assert_eq!(rec.published.lock()[0].1.as_deref(), Some("new"));
        h.timers.close();
    }

    /// Тест проверяет, что удаление расписания освобождает нагрузку через
    /// release-хук.
    #[test]
    fn test_delete_releases_payload() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let released = Arc::new(AtomicUsize::new(0));
        let hook = {
            let released = released.clone();
            Arc::new(TypedHook::new(
                |v: &u64| Some(*v),
                move |_v: &mut u64| {
                    released.fetch_add(1, Ordering::SeqCst);
                },
            ))
        };
        let obj = ObjectPayload::copy_of(&42u64, Some(&*hook)).unwrap();
        engine.append(Msg::Tick, Some(OwnedPayload::new(Payload::Object(obj), Some(hook))));

        assert!(engine.delete(&h, Msg::Tick));
        assert!(!engine.delete(&h, Msg::Tick));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(engine.scheduled_count(), 0);
        h.timers.close();
    }

    /// Тест проверяет, что отложенное сообщение публикуется один раз и
    /// удаляется из таблицы.
    #[test]
    fn test_delayed_publishes_once() {
        let (h, mut rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        engine
            .delay(&h, Msg::Alarm, Duration::from_millis(10), Some(rec.store.bytes_payload(b"late")))
            .unwrap();
        assert_eq!(engine.delayed_count(), 1);

        let event = rx.blocking_recv().unwrap();
        assert!(matches!(event, ScheduleEvent::Delayed(_)));
        engine.handle(&h, event.clone(), &rec);
        engine.handle(&h, event, &rec);
        assert_eq!(rec.published.lock().as_slice(), &[(Msg::Alarm, Some("late".to_string()))]);
        assert_eq!(engine.delayed_count(), 0);
        h.timers.close();
    }

    /// Издатель, чей хук копирования сам обращается к таблицам расписаний.
    struct Reentrant<'a> {
        engine: &'a ScheduleEngine<Msg>,
        handles: &'a ScheduleHandles<Msg>,
        loop_id: LoopId,
        inner: Recorder,
    }

    impl Republish<Msg> for Reentrant<'_> {
        fn duplicate(
            &self,
            kind: Msg,
            src: &OwnedPayload,
        ) -> BusResult<OwnedPayload> {
            self.engine.stop(self.handles, kind);
            self.engine.append(Msg::Alarm, None);
            self.engine.loop_stop(self.handles, self.loop_id)?;
            self.inner.duplicate(kind, src)
        }

        fn republish(
            &self,
            kind: Msg,
            payload: Option<OwnedPayload>,
        ) -> BusResult<()> {
            self.inner.republish(kind, payload)
        }
    }

    /// Тест проверяет, что хук копирования вызывается без блокировок
    /// таблиц: обращение из него к расписаниям и циклам не зависает.
    #[test]
    fn test_duplicate_hook_may_reenter_engine() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let loop_id = engine.loop_create(&h, Msg::Alarm);
        let publisher = Reentrant {
            engine: &engine,
            handles: &h,
            loop_id,
            inner: Recorder::default(),
        };

        engine.append(Msg::Tick, Some(publisher.inner.store.bytes_payload(b"tick")));
        engine.start(&h, Msg::Tick, LONG, 0, LONG).unwrap();
        engine.handle(&h, ScheduleEvent::Restart(Msg::Tick), &publisher);

        let payload = publisher.inner.store.bytes_payload(b"lp");
        engine
            .loop_start(&h, loop_id, LONG, |_| Ok(Some(payload)))
            .unwrap();
        let gen = engine.loops.lock()[&loop_id].armed_gen.unwrap();
        engine.handle(&h, ScheduleEvent::LoopTick { id: loop_id, generation: gen }, &publisher);

        assert_eq!(
            publisher.inner.published.lock().as_slice(),
            &[
                (Msg::Tick, Some("tick".to_string())),
                (Msg::Alarm, Some("lp".to_string())),
            ]
        );
        assert!(engine.entries.lock()[&Msg::Tick].stopped);
        assert_eq!(engine.loops.lock()[&loop_id].armed_gen, None);
        h.timers.close();
    }

    /// Тест проверяет жизненный цикл цикла: такты принимаются только от
    /// текущего взвода, неизвестный цикл даёт `UnknownLoop`.
    #[test]
    fn test_loop_lifecycle() {
        let (h, _rx) = handles();
        let engine = ScheduleEngine::new();
        let rec = Recorder::default();
        let id = engine.loop_create(&h, Msg::Tick);
        assert!(engine.loop_start(&h, id, Duration::ZERO, |_| Ok(None)).is_err());

        engine
            .loop_start(&h, id, LONG, |_| Ok(Some(rec.store.bytes_payload(b"one"))))
            .unwrap();
        let first = engine.loops.lock()[&id].armed_gen.unwrap();
        engine
            .loop_start(&h, id, LONG, |_| Ok(Some(rec.store.bytes_payload(b"two"))))
            .unwrap();
        let second = engine.loops.lock()[&id].armed_gen.unwrap();

        engine.handle(&h, ScheduleEvent::LoopTick { id, generation: first }, &rec);
        engine.handle(&h, ScheduleEvent::LoopTick { id, generation: second }, &rec);
        assert_eq!(rec.published.lock().as_slice(), &[(Msg::Tick, Some("two".to_string()))]);

        engine.loop_stop(&h, id).unwrap();
        engine.handle(&h, ScheduleEvent::LoopTick { id, generation: second }, &rec);
        assert_eq!(rec.count(), 1);

        engine.loop_delete(&h, id).unwrap();
        assert_eq!(
            engine.loop_stop(&h, id).unwrap_err(),
            BusError::UnknownLoop { id: id.as_u32() }
        );
        assert_eq!(engine.loop_count(), 0);
        h.timers.close();
    }
}
