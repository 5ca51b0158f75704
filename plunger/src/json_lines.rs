//! Bridge from `tracing-subscriber`'s JSON formatter into an event store.
//!
//! Each formatted line is decoded into [`EventFields`] and handed to
//! [`EventStore::store`]. Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use plunger::{JsonLineSink, SqliteEventStore};
//! use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteEventStore::open("plunger.db")?);
//! tracing_subscriber::registry()
//!     .with(
//!         fmt::layer()
//!             .json()
//!             .flatten_event(true)
//!             .without_time()
//!             .with_writer(JsonLineSink::new(store))
//!             .with_filter(JsonLineSink::<SqliteEventStore>::internal_filter()),
//!     )
//!     .init();
//! # Ok(())
//! # }
//! ```

use crate::event::EventFields;
use crate::event_store::EventStore;
use std::io;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::MakeWriter;

/// Target prefix of every record the store itself emits.
const STORE_TARGET: &str = "plunger::event_store";

/// Target for dropped lines. Nested under [`STORE_TARGET`] so the sink never
/// records its own complaints.
const DROP_TARGET: &str = "plunger::event_store::json_lines";

/// A [`MakeWriter`] that stores each JSON line as an event.
pub struct JsonLineSink<S> {
    store: Arc<S>,
}

impl<S> Clone for JsonLineSink<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: EventStore> JsonLineSink<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Filter that keeps the store's own records out of the sink.
    ///
    /// Without it, a write that logs would re-enter the store while it holds
    /// its lock.
    #[must_use]
    pub fn internal_filter() -> Targets {
        Targets::new()
            .with_default(LevelFilter::TRACE)
            .with_target(STORE_TARGET, LevelFilter::OFF)
    }
}

impl<'a, S: EventStore + 'a> MakeWriter<'a> for JsonLineSink<S> {
    type Writer = JsonLineWriter<'a, S>;

    fn make_writer(&'a self) -> Self::Writer {
        JsonLineWriter {
            store: self.store.as_ref(),
            buf: Vec::new(),
        }
    }
}

/// Line-buffering writer produced by [`JsonLineSink`].
///
/// Complete lines are stored as they arrive; a trailing partial line is
/// stored on flush or drop. A line that cannot be decoded or stored is
/// dropped with a warning, so `write` always accepts the whole buffer.
pub struct JsonLineWriter<'a, S: EventStore> {
    store: &'a S,
    buf: Vec<u8>,
}

impl<S: EventStore> JsonLineWriter<'_, S> {
    fn store_line(&self, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let fields = match EventFields::from_json(line) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(target: DROP_TARGET, "Dropping undecodable log line: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.store(fields) {
            warn!(target: DROP_TARGET, "Dropping log line the store rejected: {}", e);
        }
    }

    fn store_remainder(&mut self) {
        let rest = std::mem::take(&mut self.buf);
        self.store_line(&rest);
    }
}

impl<S: EventStore> io::Write for JsonLineWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            self.store_line(&line[..end]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.store_remainder();
        self.store.flush().map_err(io::Error::other)
    }
}

impl<S: EventStore> Drop for JsonLineWriter<'_, S> {
    fn drop(&mut self) {
        self.store_remainder();
    }
}
