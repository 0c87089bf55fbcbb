// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Diagnostics go to stderr so job output on stdout stays clean.
pub fn init(verbose: bool) {
    let span_events = parse_span_events(env::var("SPARKDBG_LOG_SPAN_EVENTS").ok().as_deref());
    let format = parse_format(env::var("SPARKDBG_LOG_FORMAT").ok().as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(format, span_events.clone(), None)];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, Some(writer)));
        let _ = FILE_GUARD.set(guard);
    }

    let _ = Registry::default()
        .with(layers)
        .with(build_filter(verbose))
        .with(tracing_error::ErrorLayer::default())
        .try_init();
}

fn fmt_layer(format: LogFormat, span_events: FmtSpan, file: Option<NonBlocking>) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events);
    match (format, file) {
        (LogFormat::Json, None) => base.json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Json, Some(file)) => base.json().with_ansi(false).with_writer(file).boxed(),
        (LogFormat::Pretty, None) => base.pretty().with_writer(std::io::stderr).boxed(),
        (LogFormat::Pretty, Some(file)) => {
            base.pretty().with_ansi(false).with_writer(file).boxed()
        }
        (LogFormat::Compact, None) => base.compact().with_writer(std::io::stderr).boxed(),
        (LogFormat::Compact, Some(file)) => {
            base.compact().with_ansi(false).with_writer(file).boxed()
        }
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var("SPARKDBG_LOG") {
        Ok(value) => EnvFilter::new(value),
        Err(_) => {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("warn,sparkdbg=info")
            }
        }
    }
}

fn normalized(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn parse_format(raw: Option<&str>) -> LogFormat {
    match normalized(raw).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(raw: Option<&str>) -> FmtSpan {
    match normalized(raw).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var("SPARKDBG_LOG_FILE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_compact() {
        assert_eq!(parse_format(Some(" JSON ")), LogFormat::Json);
        assert_eq!(parse_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(parse_format(Some("fancy")), LogFormat::Compact);
        assert_eq!(parse_format(None), LogFormat::Compact);
    }

    #[test]
    fn span_events_default_to_none() {
        assert_eq!(parse_span_events(Some("close")), FmtSpan::CLOSE);
        assert_eq!(parse_span_events(Some("")), FmtSpan::NONE);
    }
}
