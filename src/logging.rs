use std::panic;
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the `env_logger` backend (default level `info`, `RUST_LOG`
/// overrides) and a panic hook that logs before the default hook runs.
pub fn init_logging() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .init();

        set_panic_hook();

        log::debug!("logging initialized");
    });
}

fn set_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log::error!(
            "{}\n{:?}",
            panic_summary(info),
            backtrace::Backtrace::new()
        );
        previous(info);
    }));
}

/// `thread 'name' panicked at file:line:col: message`
fn panic_summary(info: &panic::PanicHookInfo<'_>) -> String {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    match info.location() {
        Some(location) => format!("thread '{name}' panicked at {location}: {message}"),
        None => format!("thread '{name}' panicked: {message}"),
    }
}
