use std::time::Instant;

use tracing_appender::non_blocking::WorkerGuard;

/// Дескриптор жизненного цикла логирования.
///
/// Держит `WorkerGuard` файлового вывода: пока дескриптор жив, фоновый
/// писатель работает; `shutdown` (или `Drop`) сбрасывает буфер на диск.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    started_at: Instant,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            started_at: Instant::now(),
        }
    }

    /// Есть ли активный файловый вывод.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Явное завершение с записью оставшихся событий.
    pub fn shutdown(mut self) {
        tracing::info!(
            uptime_ms = self.started_at.elapsed().as_millis() as u64,
            "logging shutdown"
        );
        drop(self.file_guard.take());
    }
}
