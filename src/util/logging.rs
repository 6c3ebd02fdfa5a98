//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `level`. Fails if a global
/// subscriber is already installed.
pub fn init_logging(level: &str, format: &LogFormat) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(format_layer(format, std::io::stdout))
        .try_init()
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Formatting layer for `format`, writing to `writer`.
fn format_layer<S, W>(format: &LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(writer).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn render(format: LogFormat) -> String {
        let captured = Captured::default();
        let writer = {
            let captured = captured.clone();
            move || captured.clone()
        };

        let subscriber = tracing_subscriber::registry().with(format_layer(&format, writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(backend = "http://10.0.0.1", "backend status changed");
        });

        let bytes = captured.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_second_init_is_an_error() {
        // Whichever test initializes first wins; later calls must not panic.
        let _ = init_logging("info", &LogFormat::Pretty);
        assert!(init_logging("debug", &LogFormat::Json).is_err());
    }

    #[test]
    fn test_pretty_spans_lines_with_location() {
        let out = render(LogFormat::Pretty);
        assert!(out.contains("backend status changed"));
        assert!(out.contains("logging.rs"));
        assert!(out.lines().count() > 1);
    }

    #[test]
    fn test_json_is_one_object_per_event() {
        let out = render(LogFormat::Json);
        assert_eq!(out.lines().count(), 1);
        assert!(out.trim_start().starts_with('{'));
        assert!(out.contains("\"message\":\"backend status changed\""));
    }
}
