//! `DiagnosticsLayer`: an in-process tracing sink for JIT/syscall events.
//!
//! Mirrors the shape of a websocket-forwarding tracing layer (one `Layer`
//! impl visiting each event's fields and forwarding a summary), but instead
//! of fanning out to subscribers it appends to a capped in-memory ring that
//! `--metrics`/checkpoint diagnostics can read from later. Never blocks the
//! execution thread: a full ring silently drops its oldest entry.

use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// One captured diagnostics event: a JIT lifecycle transition or a syscall
/// completion, plus whatever else gets logged at `debug` level or above.
#[derive(Debug, Clone)]
pub struct DiagnosticsEvent {
    pub level: &'static str,
    pub target: String,
    pub message: String,
    pub ts_millis: i64,
}

pub struct DiagnosticsLayer {
    ring: Mutex<VecDeque<DiagnosticsEvent>>,
    capacity: usize,
}

impl DiagnosticsLayer {
    pub fn new(capacity: usize) -> Self {
        DiagnosticsLayer { ring: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// A point-in-time copy of the ring, oldest first, for `--metrics`
    /// snapshots and the checkpoint diagnostics dump.
    pub fn snapshot(&self) -> Vec<DiagnosticsEvent> {
        self.ring.lock().expect("diagnostics ring mutex poisoned").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("diagnostics ring mutex poisoned").len()
    }

    fn push(&self, event: DiagnosticsEvent) {
        let mut ring = self.ring.lock().expect("diagnostics ring mutex poisoned");
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }
}

impl<S> Layer<S> for DiagnosticsLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG => "debug",
            Level::TRACE => "debug",
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.push(DiagnosticsEvent {
            level,
            target: event.metadata().target().to_string(),
            message: visitor.summary(),
            ts_millis: chrono::Utc::now().timestamp_millis(),
        });
    }
}

/// Collects every recorded field into a single `key=value ...` summary
/// rather than relying on a single `message` field, since the JIT/syscall
/// events above are structured (`event`, `region_start`, `tier`, ...) and
/// carry no `message` at all.
#[derive(Default)]
struct FieldVisitor {
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn summary(&self) -> String {
        self.fields.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(" ")
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let layer = DiagnosticsLayer::new(2);
        layer.push(DiagnosticsEvent { level: "debug", target: "t".into(), message: "a".into(), ts_millis: 1 });
        layer.push(DiagnosticsEvent { level: "debug", target: "t".into(), message: "b".into(), ts_millis: 2 });
        layer.push(DiagnosticsEvent { level: "debug", target: "t".into(), message: "c".into(), ts_millis: 3 });
        let snap = layer.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "b");
        assert_eq!(snap[1].message, "c");
    }
}
