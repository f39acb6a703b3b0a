//! Сообщения шины и их жизненный цикл.
//!
//! - `kind`: идентичность вида сообщения.
//! - `payload`: полезная нагрузка и хуки дублирования/освобождения.
//! - `store`: выделение сообщений и учёт живых объектов.

pub mod kind;
pub mod payload;
pub mod store;

pub use kind::*;
pub use payload::*;
pub use store::*;
