use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use bytes::Bytes;
use taskbus_error::{BusError, BusResult};
use tracing::trace;

use super::{HookRegistry, Kind, ObjectPayload, OwnedPayload, Payload, PayloadHook};

/// Опубликованное сообщение.
///
/// Клонирование соответствует `retain`, уничтожение клона `release`. Объект и
/// его полезная нагрузка освобождаются, когда уходит последняя ссылка, и
/// ни мгновением раньше: это обеспечивает сам `Arc`.
pub struct Message<K: Kind> {
    inner: Arc<Envelope<K>>,
}

struct Envelope<K: Kind> {
    id: u64,
    kind: K,
    payload: Option<OwnedPayload>,
    stats: Arc<StoreStats>,
    published_at: Instant,
}

/// Счётчики хранилища сообщений.
#[derive(Debug, Default)]
pub struct StoreStats {
    allocated: AtomicU64,
    freed: AtomicU64,
    live: AtomicUsize,
}

/// Хранилище сообщений: выделяет объекты и дублирует полезную нагрузку
/// через хуки видов.
pub struct MessageStore<K: Kind> {
    hooks: HookRegistry<K>,
    stats: Arc<StoreStats>,
    next_id: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Message<K> {
    /// Порядковый номер сообщения внутри шины.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> K {
        self.inner.kind
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.inner.payload.as_ref().map(OwnedPayload::payload)
    }

    /// Размер полезной нагрузки; `0`, если её нет.
    pub fn payload_size(&self) -> usize {
        self.payload().map_or(0, Payload::size)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.payload().and_then(Payload::as_bytes)
    }

    pub fn as_text(&self) -> Option<&str> {
        self.payload().and_then(Payload::as_text)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload().and_then(Payload::downcast_ref::<T>)
    }

    /// Число держателей этого сообщения (очередь, ожидающие, вызывающие).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn published_at(&self) -> Instant {
        self.inner.published_at
    }
}

impl StoreStats {
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// Число сообщений, которые ещё кто-то держит.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl<K: Kind> MessageStore<K> {
    pub fn new() -> Self {
        Self {
            hooks: HookRegistry::new(),
            stats: Arc::new(StoreStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn hooks(&self) -> &HookRegistry<K> {
        &self.hooks
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn live_messages(&self) -> usize {
        self.stats.live()
    }

    /// Создаёт сообщение с единственной (начальной) ссылкой.
    pub fn allocate(
        &self,
        kind: K,
        payload: Option<OwnedPayload>,
    ) -> Message<K> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stats.allocated.fetch_add(1, Ordering::Relaxed);
        self.stats.live.fetch_add(1, Ordering::AcqRel);
        trace!(message_id = id, kind = ?kind, "message allocated");

        Message {
            inner: Arc::new(Envelope {
                id,
                kind,
                payload,
                stats: self.stats.clone(),
                published_at: Instant::now(),
            }),
        }
    }

    /// Собственная копия байтов (текст хранится без завершающего нуля).
    pub fn bytes_payload(
        &self,
        data: &[u8],
    ) -> OwnedPayload {
        OwnedPayload::new(Payload::Bytes(Bytes::copy_from_slice(data)), None)
    }

    /// Копия объекта через хук вида `kind` или через `Clone`.
    pub fn object_payload<T>(
        &self,
        kind: K,
        obj: &T,
    ) -> BusResult<OwnedPayload>
    where
        T: Any + Clone + Send + Sync,
    {
        let hook = self.hooks.get(kind);
        let object = ObjectPayload::copy_of(obj, hook.as_deref())
            .ok_or_else(|| BusError::oom(format!("payload of {kind:?}")))?;
        Ok(OwnedPayload::new(Payload::Object(object), hook))
    }

    /// Свежая копия кэшированной нагрузки для очередной публикации.
    ///
    /// Хук берётся актуальный для `kind`, если он зарегистрирован, иначе
    /// тот, с которым нагрузка была создана.
    pub fn duplicate(
        &self,
        kind: K,
        src: &OwnedPayload,
    ) -> BusResult<OwnedPayload> {
        let copy = match self.hooks.get(kind) {
            Some(hook) => src
                .payload()
                .duplicate(Some(hook.as_ref()))
                .map(|p| OwnedPayload::new(p, Some(hook))),
            None => src.duplicate(),
        };
        copy.ok_or_else(|| BusError::oom(format!("payload of {kind:?}")))
    }

    pub(crate) fn register_hook(
        &self,
        kind: K,
        hook: Arc<dyn PayloadHook>,
    ) {
        self.hooks.register(kind, hook);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<K: Kind> Clone for Message<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Kind> Drop for Envelope<K> {
    fn drop(&mut self) {
        // Нагрузка (и её release-хук) уходит до того, как сообщение
        // перестаёт считаться живым.
        drop(self.payload.take());
        self.stats.freed.fetch_add(1, Ordering::Relaxed);
        self.stats.live.fetch_sub(1, Ordering::AcqRel);
        trace!(message_id = self.id, kind = ?self.kind, "message freed");
    }
}

impl<K: Kind> Default for MessageStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kind> fmt::Debug for Message<K> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("payload", &self.payload())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
