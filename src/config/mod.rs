pub mod settings;

pub use settings::BusConfig;
