use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// Обработчик срабатывания таймера. Получает поколение, с которым таймер
/// был взведён.
///
/// Вызывается в потоке службы таймеров и не должен блокироваться.
pub(crate) type TimerCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TimerId(u32);

/// Служба однократных и периодических таймеров с собственным потоком.
///
/// Сроки хранятся в двоичной куче; устаревшие записи кучи (после
/// перевзвода или снятия таймера) не удаляются, а пропускаются при
/// извлечении.
pub(crate) struct TimerService {
    inner: Arc<TimerInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cond: Condvar,
}

#[derive(Default)]
struct TimerState {
    slots: HashMap<TimerId, TimerSlot>,
    queue: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    next_id: u32,
    closed: bool,
}

struct TimerSlot {
    deadline: Option<Instant>,
    period: Option<Duration>,
    generation: u64,
    callback: TimerCallback,
}

impl TimerService {
    /// Запускает поток службы с именем `name`.
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
        });
        let worker = inner.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            inner,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Создаёт невзведённый таймер.
    pub(crate) fn create(
        &self,
        callback: TimerCallback,
    ) -> TimerId {
        let mut state = self.inner.state.lock();
        state.next_id = state.next_id.wrapping_add(1);
        let id = TimerId(state.next_id);
        state.slots.insert(
            id,
            TimerSlot {
                deadline: None,
                period: None,
                generation: 0,
                callback,
            },
        );
        id
    }

    /// Взводит таймер: первое срабатывание через `delay`, дальше с
    /// периодом `period`, если он задан.
    ///
    /// Возвращает новое поколение таймера; `None`, если таймера нет или
    /// служба остановлена. Срок, который не помещается в `Instant`, не
    /// наступает никогда: таймер получает поколение, но не срабатывает.
    pub(crate) fn arm(
        &self,
        id: TimerId,
        delay: Duration,
        period: Option<Duration>,
    ) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        let slot = state.slots.get_mut(&id)?;
        let deadline = Instant::now().checked_add(delay);
        slot.generation += 1;
        slot.deadline = deadline;
        slot.period = period.filter(|p| !p.is_zero());
        let generation = slot.generation;
        match deadline {
            Some(deadline) => state.queue.push(Reverse((deadline, generation, id))),
            None => debug!(timer = id.0, ?delay, "timer deadline out of range, never fires"),
        }
        drop(state);
        self.inner.cond.notify_one();
        trace!(timer = id.0, generation, ?delay, ?period, "timer armed");
        Some(generation)
    }

    /// Снимает таймер со взвода. Срабатывания, уже ушедшие обработчику,
    /// несут старое поколение.
    pub(crate) fn disarm(
        &self,
        id: TimerId,
    ) {
        let mut state = self.inner.state.lock();
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.deadline = None;
            slot.generation += 1;
        }
    }

    pub(crate) fn remove(
        &self,
        id: TimerId,
    ) {
        self.inner.state.lock().slots.remove(&id);
    }

    pub(crate) fn is_armed(
        &self,
        id: TimerId,
    ) -> bool {
        self.inner
            .state
            .lock()
            .slots
            .get(&id)
            .is_some_and(|slot| slot.deadline.is_some())
    }

    /// Останавливает поток службы и забывает все таймеры.
    pub(crate) fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.slots.clear();
            state.queue.clear();
        }
        self.inner.cond.notify_all();
    }

    /// Забирает дескриптор потока для `join`.
    pub(crate) fn take_thread(&self) -> Option<JoinHandle<()>> {
        self.thread.lock().take()
    }
}

impl TimerInner {
    fn run(&self) {
        debug!("timer service started");
        let mut state = self.state.lock();
        loop {
            if state.closed {
                break;
            }
            let Some(&Reverse((deadline, generation, id))) = state.queue.peek() else {
                self.cond.wait(&mut state);
                continue;
            };
            let now = Instant::now();
            if deadline > now {
                let _ = self.cond.wait_until(&mut state, deadline);
                continue;
            }
            state.queue.pop();

            let fired = {
                let st = &mut *state;
                match st.slots.get_mut(&id) {
                    Some(slot)
                        if slot.generation == generation && slot.deadline == Some(deadline) =>
                    {
                        match slot.period {
                            Some(period) => {
                                // Фиксированный темп, но без пачки срабатываний
                                // после долгой задержки потока.
                                let next = deadline
                                    .checked_add(period)
                                    .map(|next| next.max(now));
                                slot.deadline = next;
                                if let Some(next) = next {
                                    st.queue.push(Reverse((next, generation, id)));
                                }
                            }
                            None => slot.deadline = None,
                        }
                        Some(slot.callback.clone())
                    }
                    _ => None,
                }
            };
            let Some(callback) = fired else {
                continue;
            };

            drop(state);
            callback(generation);
            state = self.state.lock();
        }
        debug!("timer service stopped");
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.close();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = counter.clone();
        Arc::new(move |_gen| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Тест проверяет, что однократный таймер срабатывает один раз.
    #[test]
    fn test_one_shot_fires_once() {
        let timers = TimerService::spawn("test-timer").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = timers.create(counting(&hits));
        assert!(timers.arm(id, Duration::from_millis(20), None).is_some());
        assert!(timers.is_armed(id));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(id));
        timers.close();
    }

    /// Тест проверяет, что периодический таймер срабатывает многократно,
    /// а после `disarm` останавливается.
    #[test]
    fn test_periodic_until_disarmed() {
        let timers = TimerService::spawn("test-timer").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = timers.create(counting(&hits));
        timers.arm(id, Duration::from_millis(10), Some(Duration::from_millis(10)));

        thread::sleep(Duration::from_millis(120));
        timers.disarm(id);
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several firings, got {seen}");

        thread::sleep(Duration::from_millis(60));
        assert!(hits.load(Ordering::SeqCst) <= seen + 1);
        timers.close();
    }

    /// Тест проверяет, что перевзвод отменяет предыдущий срок и меняет
    /// поколение.
    #[test]
    fn test_rearm_replaces_deadline() {
        let timers = TimerService::spawn("test-timer").unwrap();
        let last_gen = Arc::new(AtomicU64::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let cb: TimerCallback = {
            let last_gen = last_gen.clone();
            let hits = hits.clone();
            Arc::new(move |gen| {
                last_gen.store(gen, Ordering::SeqCst);
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let id = timers.create(cb);
        let first = timers.arm(id, Duration::from_millis(30), None).unwrap();
        let second = timers.arm(id, Duration::from_millis(60), None).unwrap();
        assert!(second > first);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(last_gen.load(Ordering::SeqCst), second);
        timers.close();
    }

    /// Тест проверяет, что недостижимый срок не паникует, а таймер
    /// просто не срабатывает.
    #[test]
    fn test_out_of_range_deadline_never_fires() {
        let timers = TimerService::spawn("test-timer").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = timers.create(counting(&hits));
        assert!(timers.arm(id, Duration::MAX, None).is_some());
        assert!(!timers.is_armed(id));

        // Период без срока следующего срабатывания: ровно одно срабатывание.
        timers.arm(id, Duration::from_millis(5), Some(Duration::MAX));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(id));
        timers.close();
    }

    #[test]
    fn test_arm_after_close_fails() {
        let timers = TimerService::spawn("test-timer").unwrap();
        let id = timers.create(Arc::new(|_| {}));
        timers.close();
        assert!(timers.arm(id, Duration::ZERO, None).is_none());
        if let Some(handle) = timers.take_thread() {
            handle.join().unwrap();
        }
    }
}
