#![cfg_attr(test, allow(clippy::unwrap_used))]

mod format;
#[macro_use]
mod unwrap_or;
mod capturing_writer;
mod err_with_sources;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _, reload,
    util::SubscriberInitExt,
};

pub use capturing_writer::CapturingWriter;
pub use err_with_sources::{ErrorWithSources, err_with_src};
pub use format::Format;

/// Registers a global subscriber that logs to stdout, as JSON if `stdout_json` is set.
///
/// The returned handle changes the filter at runtime.
pub fn setup_global_subscriber(directives: &str, stdout_json: bool) -> Result<FilterReloadHandle> {
    let (filter, reload_handle) = try_filter(directives).context("Failed to parse directives")?;

    let subscriber = Registry::default().with(match stdout_json {
        true => fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
        false => fmt::layer()
            .with_ansi(stdout_supports_ansi())
            .event_format(Format::new())
            .with_filter(filter)
            .boxed(),
    });
    init(subscriber)?;

    Ok(reload_handle)
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

pub fn stdout_supports_ansi() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
pub fn try_filter<S>(
    directives: &str,
) -> Result<(reload::Layer<EnvFilter, S>, FilterReloadHandle), ParseError>
where
    S: Subscriber + 'static,
{
    let env_filter = parse_filter(directives)?;

    let (layer, reload_handle) = reload::Layer::new(env_filter);
    let handle = FilterReloadHandle {
        inner: Arc::new(reload_handle),
    };

    Ok((layer, handle))
}

fn parse_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// Silences noisy dependencies so that a catch-all directive like `debug` stays readable.
    ///
    /// Restating a crate with a lower level, i.e. `quinn_udp=trace`, still activates its logs.
    const IRRELEVANT_CRATES: &str = "quinn_udp=info,mio=info";

    let env_filter = if directives.is_empty() {
        EnvFilter::try_new(IRRELEVANT_CRATES)?
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))?
    };

    Ok(env_filter)
}

pub struct FilterReloadHandle {
    inner: Arc<dyn Reload + Send + Sync>,
}

impl std::fmt::Debug for FilterReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FilterReloadHandle").finish_non_exhaustive()
    }
}

impl FilterReloadHandle {
    pub fn reload(&self, new_filter: &str) -> Result<()> {
        self.inner.reload(new_filter)?;

        Ok(())
    }
}

trait Reload {
    fn reload(&self, new_filter: &str) -> Result<()>;
}

impl<S> Reload for reload::Handle<EnvFilter, S>
where
    S: 'static,
{
    fn reload(&self, new_filter: &str) -> Result<()> {
        let filter = parse_filter(new_filter).context("Failed to parse new filter")?;

        reload::Handle::reload(self, filter).context("Failed to reload filter")?;

        Ok(())
    }
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directives_only_silence_noisy_crates() {
        let filter = parse_filter("").unwrap().to_string();

        assert!(filter.contains("quinn_udp=info"), "{filter}");
    }

    #[test]
    fn user_directives_take_precedence() {
        let filter = parse_filter("debug,quinn_udp=trace").unwrap().to_string();

        assert!(filter.contains("quinn_udp=trace"), "{filter}");
    }

    #[test]
    fn rejects_invalid_directives() {
        assert!(parse_filter("tun=loud").is_err());
    }

    #[test]
    fn reload_changes_active_filter() {
        let writer = CapturingWriter::default();
        let (filter, handle) = try_filter("info").unwrap();
        let subscriber = Registry::default().with(
            fmt::layer()
                .with_writer(writer.clone())
                .with_ansi(false)
                .event_format(Format::new().without_timestamp())
                .with_filter(filter),
        );
        let _guard = subscriber.set_default();

        tracing::debug!("Hidden");
        handle.reload("debug").unwrap();
        tracing::debug!("Shown");

        let lines = writer.lines();
        assert!(!lines.contains("Hidden"), "{lines}");
        assert!(lines.contains("Shown"), "{lines}");
    }

    #[test]
    fn reload_rejects_invalid_filter() {
        let (_filter, handle) = try_filter::<Registry>("info").unwrap();

        assert!(handle.reload("tun=loud").is_err());
    }
}
