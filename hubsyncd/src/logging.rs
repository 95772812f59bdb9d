use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

pub const DEFAULT_FILTER: &str = "hubsyncd=info,hubsync_core=info";
pub const LOG_QUEUE_CAPACITY: usize = 500;

#[derive(Debug)]
struct QueueInner {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Bounded log buffer: producers never block, the oldest line is dropped
/// when full, and a single consumer drains it.
#[derive(Debug, Clone)]
pub struct LogQueue {
    inner: Arc<QueueInner>,
}

impl LogQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                lines: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = match self.inner.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() >= self.inner.capacity {
            lines.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        lines.push_back(line);
    }

    /// Removes and returns up to `max` of the oldest buffered lines.
    pub fn drain(&self, max: usize) -> Vec<String> {
        let mut lines = match self.inner.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        let take = max.min(lines.len());
        lines.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn layer(&self) -> LogQueueLayer {
        LogQueueLayer {
            queue: self.clone(),
        }
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new(LOG_QUEUE_CAPACITY)
    }
}

/// Formats each enabled event into one line and pushes it into a [`LogQueue`].
#[derive(Debug)]
pub struct LogQueueLayer {
    queue: LogQueue,
}

#[derive(Default)]
struct MsgVisitor {
    message: String,
    fields: String,
}

impl Visit for MsgVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S> Layer<S> for LogQueueLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MsgVisitor::default();
        event.record(&mut visitor);
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.queue.push(format!(
            "{timestamp} {:>5} {}: {}{}",
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

/// Installs the global subscriber: env filter, stderr formatter and the queue layer.
pub fn init_tracing(queue: &LogQueue) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(queue.layer())
        .try_init();
}
