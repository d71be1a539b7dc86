use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt as _,
};

/// Log lines go to stderr so they never interleave with the operator
/// console on stdout. `LOG_FORMAT=json` switches to structured output.
pub fn init() {
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (plain, structured) = if json {
        (
            None,
            Some(
                fmt::Layer::new()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            ),
        )
    } else {
        (
            Some(
                fmt::Layer::new()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_span_events(FmtSpan::CLOSE),
            ),
            None,
        )
    };

    let subscriber = tracing_subscriber::registry()
        .with(plain)
        .with(structured)
        .with(EnvFilter::from_default_env());

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global subscriber");
}
