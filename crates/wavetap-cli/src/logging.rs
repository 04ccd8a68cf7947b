//! Tracing setup: log lines go to the TUI log panel (and optionally a file)
//! because the terminal itself belongs to the UI.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const DEFAULT_FILTER: &str = "info,wavetap_player=info";

/// Forwards formatted events to the UI over a channel.
pub struct LogLayer {
    tx: Sender<String>,
}

impl LogLayer {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for LogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = LogVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.message.unwrap_or_else(|| "log event".to_string());
        if !visitor.fields.is_empty() {
            message = format!("{message} {}", visitor.fields.join(" "));
        }
        let line = format!("{:>5} {}", event.metadata().level(), message);
        // Receiver gone means the UI has exited; nothing left to show.
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct LogVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for LogVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(formatted.trim_matches('"').to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), formatted));
        }
    }
}

/// Install the global subscriber. Returns the receiving end for the log panel.
pub fn init(log_file: Option<&Path>) -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(LogLayer::new(tx))
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn events_are_forwarded_with_fields() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let subscriber = Registry::default().with(LogLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(pid = 42, role = %"sampler", "grace period elapsed");
        });
        let line = rx.try_recv().unwrap();
        assert!(line.starts_with(" WARN grace period elapsed"), "{line}");
        assert!(line.contains("pid=42"), "{line}");
        assert!(line.contains("role=sampler"), "{line}");
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        drop(rx);
        let subscriber = Registry::default().with(LogLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("nobody listening");
        });
    }
}
