pub mod bus;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use bus::*;
