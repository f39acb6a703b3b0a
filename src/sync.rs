use parking_lot::{Condvar, Mutex};

/// Считающий семафор поверх `parking_lot`.
///
/// Используется как сигнал диспетчеру: каждый `publish` добавляет одно
/// разрешение, поток диспетчера забирает разрешения по одному. После
/// `close()` все ожидающие просыпаются и получают `false`.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    state: Mutex<SemaphoreState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct SemaphoreState {
    permits: usize,
    closed: bool,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Добавляет одно разрешение и будит одного ожидающего.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.permits = state.permits.saturating_add(1);
        drop(state);
        self.cond.notify_one();
    }

    /// Блокирует поток до появления разрешения.
    ///
    /// Возвращает `false`, если семафор закрыт.
    pub(crate) fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return true;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Закрывает семафор: текущие и будущие `acquire` возвращают `false`.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    /// Тест проверяет, что каждое `release` даёт ровно одно `acquire`, а
    /// после закрытия разрешений больше нет.
    #[test]
    fn test_permits_are_counted() {
        let sem = Semaphore::new();
        sem.release();
        sem.release();
        assert!(sem.acquire());
        assert!(sem.acquire());
        sem.close();
        assert!(!sem.acquire());
    }

    /// Тест проверяет, что `close` будит поток, заблокированный в `acquire`.
    #[test]
    fn test_close_wakes_waiter() {
        let sem = Arc::new(Semaphore::new());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        sem.close();
        assert!(!waiter.join().unwrap());
        assert!(sem.is_closed());
    }

    #[test]
    fn test_release_from_other_thread() {
        let sem = Arc::new(Semaphore::new());
        let sem2 = sem.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sem2.release();
        });
        assert!(sem.acquire());
        h.join().unwrap();
    }
}
