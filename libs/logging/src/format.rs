//! A compact, single-line event format.
//!
//! `2026-01-01T12:00:00.000Z  INFO tun::device: Created TUN device name=wg0 index=3 mtu=1420`

use std::{fmt, io, num::NonZeroU8};

use nu_ansi_term::{AnsiString, Color, Style};
use time::format_description::well_known::{
    Iso8601,
    iso8601::{Config, EncodedConfig, TimePrecision},
};
use tracing::{Event, Level, Subscriber};
use tracing_log::NormalizeEvent as _;
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

/// Renders the timestamp, level, target, message and the fields of the event and all its spans.
///
/// Span names are omitted. Events from named threads are suffixed with the thread's name.
pub struct Format {
    time: bool,
    thread_names: bool,
}

impl Format {
    pub fn new() -> Self {
        Self {
            time: true,
            thread_names: true,
        }
    }

    pub fn without_timestamp(self) -> Self {
        Self {
            time: false,
            ..self
        }
    }

    pub fn without_thread_names(self) -> Self {
        Self {
            thread_names: false,
            ..self
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new()
    }
}

const TIMESTAMP: EncodedConfig = Config::DEFAULT
    .set_time_precision(TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

impl<S, N> FormatEvent<S, N> for Format
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let normalized_meta = event.normalized_metadata();
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());
        let ansi = writer.has_ansi_escapes();
        let dimmed = if ansi {
            Style::new().dimmed()
        } else {
            Style::new()
        };

        if self.time {
            write!(writer, "{}", dimmed.prefix())?;
            time::OffsetDateTime::now_utc()
                .format_into(&mut FmtWriter(&mut writer), &Iso8601::<TIMESTAMP>)
                .map_err(|_| fmt::Error)?;
            write!(writer, "{} ", dimmed.suffix())?;
        }

        write!(writer, "{} ", level(meta.level(), ansi))?;
        write!(writer, "{} ", dimmed.paint(format!("{}:", meta.target())))?;

        ctx.format_fields(writer.by_ref(), event)?;

        for span in ctx
            .event_scope()
            .into_iter()
            .flat_map(tracing_subscriber::registry::Scope::from_root)
        {
            let exts = span.extensions();
            if let Some(fields) = exts.get::<FormattedFields<N>>()
                && !fields.is_empty()
            {
                write!(writer, " {}", fields.fields)?;
            }
        }

        if self.thread_names
            && let Some(name) = std::thread::current().name()
            && name != "main"
        {
            write!(writer, " {}", dimmed.paint(format!("[{name}]")))?;
        }

        writeln!(writer)
    }
}

fn level(level: &Level, ansi: bool) -> AnsiString<'static> {
    let (text, color) = match *level {
        Level::TRACE => ("TRACE", Color::Purple),
        Level::DEBUG => ("DEBUG", Color::Blue),
        Level::INFO => (" INFO", Color::Green),
        Level::WARN => (" WARN", Color::Yellow),
        Level::ERROR => ("ERROR", Color::Red),
    };

    match ansi {
        true => color.paint(text),
        false => Style::new().paint(text),
    }
}

/// Lets `time` format straight into a [`fmt::Write`]r.
struct FmtWriter<'a, 'w>(&'a mut Writer<'w>);

impl io::Write for FmtWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = std::str::from_utf8(buf).map_err(io::Error::other)?;
        fmt::Write::write_str(self.0, s).map_err(io::Error::other)?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
