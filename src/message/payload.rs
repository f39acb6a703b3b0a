use std::{any::Any, collections::HashMap, fmt, marker::PhantomData, mem, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use super::Kind;

/// Объект, хранимый в полезной нагрузке.
pub type AnyObject = Box<dyn Any + Send + Sync>;

type CloneFn = fn(&(dyn Any + Send + Sync)) -> Option<AnyObject>;

/// Полезная нагрузка сообщения.
///
/// - `Bytes`: текст или сырые байты, всегда собственная копия.
/// - `Object`: произвольное значение, которое при каждой публикации
///   дублируется через хук вида сообщения или через `Clone`.
pub enum Payload {
    Bytes(Bytes),
    Object(ObjectPayload),
}

/// Типизированный объект внутри [`Payload::Object`].
pub struct ObjectPayload {
    value: AnyObject,
    size: usize,
    type_name: &'static str,
    clone_fn: CloneFn,
}

/// Хук дублирования и освобождения объектов одного вида сообщения.
///
/// `duplicate` вызывается при каждой публикации (и при кэшировании в
/// расписании); `None` означает нехватку памяти и прерывает публикацию.
/// `release` вызывается один раз перед уничтожением копии.
pub trait PayloadHook: Send + Sync + 'static {
    fn duplicate(
        &self,
        src: &(dyn Any + Send + Sync),
    ) -> Option<AnyObject>;

    fn release(
        &self,
        _obj: &mut (dyn Any + Send + Sync),
    ) {
    }
}

/// Хук, собранный из двух замыканий над конкретным типом `T`.
pub struct TypedHook<T, D, R> {
    duplicate: D,
    release: R,
    _marker: PhantomData<fn(T)>,
}

/// Полезная нагрузка вместе с хуком, который её создал.
///
/// При уничтожении вызывает `release` хука (если он есть), затем
/// освобождает память. Так работают и сообщения, и кэш расписаний.
pub struct OwnedPayload {
    payload: Payload,
    hook: Option<Arc<dyn PayloadHook>>,
}

/// Реестр хуков по видам сообщений.
pub struct HookRegistry<K: Kind> {
    hooks: RwLock<HashMap<K, Arc<dyn PayloadHook>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Payload {
    /// Размер полезной нагрузки в байтах.
    pub fn size(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Object(o) => o.size,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Object(_) => None,
        }
    }

    /// Текстовое представление, если нагрузка содержит валидный UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(o) => o.value.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }

    /// Создаёт независимую копию.
    ///
    /// Байты копируются в новый буфер, объект: через `hook` или `Clone`.
    pub(crate) fn duplicate(
        &self,
        hook: Option<&dyn PayloadHook>,
    ) -> Option<Payload> {
        match self {
            Self::Bytes(b) => Some(Self::Bytes(Bytes::copy_from_slice(b))),
            Self::Object(o) => {
                let value = match hook {
                    Some(h) => h.duplicate(o.value.as_ref())?,
                    None => (o.clone_fn)(o.value.as_ref())?,
                };
                Some(Self::Object(ObjectPayload {
                    value,
                    size: o.size,
                    type_name: o.type_name,
                    clone_fn: o.clone_fn,
                }))
            }
        }
    }
}

impl ObjectPayload {
    /// Дублирует `obj` и упаковывает копию.
    pub(crate) fn copy_of<T>(
        obj: &T,
        hook: Option<&dyn PayloadHook>,
    ) -> Option<Self>
    where
        T: Any + Clone + Send + Sync,
    {
        let value = match hook {
            Some(h) => h.duplicate(obj)?,
            None => Box::new(obj.clone()),
        };
        Some(Self {
            value,
            size: mem::size_of::<T>(),
            type_name: std::any::type_name::<T>(),
            clone_fn: clone_object::<T>,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl<T, D, R> TypedHook<T, D, R>
where
    T: Any + Send + Sync,
    D: Fn(&T) -> Option<T> + Send + Sync + 'static,
    R: Fn(&mut T) + Send + Sync + 'static,
{
    pub fn new(
        duplicate: D,
        release: R,
    ) -> Self {
        Self {
            duplicate,
            release,
            _marker: PhantomData,
        }
    }
}

impl OwnedPayload {
    pub(crate) fn new(
        payload: Payload,
        hook: Option<Arc<dyn PayloadHook>>,
    ) -> Self {
        Self { payload, hook }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Независимая копия с тем же хуком.
    pub(crate) fn duplicate(&self) -> Option<OwnedPayload> {
        let payload = self.payload.duplicate(self.hook.as_deref())?;
        Some(Self::new(payload, self.hook.clone()))
    }
}

impl<K: Kind> HookRegistry<K> {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Регистрирует (или заменяет) хук для вида `kind`.
    pub fn register(
        &self,
        kind: K,
        hook: Arc<dyn PayloadHook>,
    ) -> Option<Arc<dyn PayloadHook>> {
        self.hooks.write().insert(kind, hook)
    }

    pub fn unregister(
        &self,
        kind: K,
    ) -> Option<Arc<dyn PayloadHook>> {
        self.hooks.write().remove(&kind)
    }

    pub fn get(
        &self,
        kind: K,
    ) -> Option<Arc<dyn PayloadHook>> {
        self.hooks.read().get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние функции
////////////////////////////////////////////////////////////////////////////////

fn clone_object<T>(src: &(dyn Any + Send + Sync)) -> Option<AnyObject>
where
    T: Any + Clone + Send + Sync,
{
    src.downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as AnyObject)
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<T, D, R> PayloadHook for TypedHook<T, D, R>
where
    T: Any + Send + Sync,
    D: Fn(&T) -> Option<T> + Send + Sync + 'static,
    R: Fn(&mut T) + Send + Sync + 'static,
{
    fn duplicate(
        &self,
        src: &(dyn Any + Send + Sync),
    ) -> Option<AnyObject> {
        let value = src.downcast_ref::<T>()?;
        (self.duplicate)(value).map(|copy| Box::new(copy) as AnyObject)
    }

    fn release(
        &self,
        obj: &mut (dyn Any + Send + Sync),
    ) {
        if let Some(value) = obj.downcast_mut::<T>() {
            (self.release)(value);
        }
    }
}

impl Drop for OwnedPayload {
    fn drop(&mut self) {
        if let (Some(hook), Payload::Object(obj)) = (&self.hook, &mut self.payload) {
            hook.release(obj.value.as_mut());
        }
    }
}

impl<K: Kind> Default for HookRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Payload {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Self::Object(o) => f
                .debug_struct("Object")
                .field("type", &o.type_name)
                .field("size", &o.size)
                .finish(),
        }
    }
}

impl fmt::Debug for OwnedPayload {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OwnedPayload")
            .field("payload", &self.payload)
            .field("hooked", &self.hook.is_some())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
