use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Фильтр событий: `RUST_LOG`, если задан, иначе директива из
/// конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directive = config.build_filter_directive();
    match EnvFilter::try_new(&directive) {
        Ok(filter) => filter,
        Err(e) => {
            // Логирование ещё не поднято, писать больше некуда.
            eprintln!("invalid log filter directive '{directive}': {e}; falling back to 'info'");
            EnvFilter::new("info")
        }
    }
}
