use std::{fmt::Debug, hash::Hash};

/// Вид сообщения.
///
/// Обычно это пользовательский `enum` без данных:
///
/// ```
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum AppMsg {
///     OsReady,
///     NetReady,
/// }
///
/// fn assert_kind<K: taskbus::Kind>() {}
/// assert_kind::<AppMsg>();
/// ```
pub trait Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Kind for T where T: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
