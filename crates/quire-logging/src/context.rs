//! Span helpers and shared field names
//!
//! Publisher context is carried on spans rather than thread-locals: the sync
//! layer runs on a work-stealing runtime where a task can resume on any
//! thread, so the publisher travels with the future via `Instrument`.

use quire_core::{PublisherAddress, WriteKind};
use tracing::Span;

/// Span fields filled in after the span is created
pub mod fields {
    /// Entries carried by a flush group
    pub const ENTRIES: &str = "entries";
    /// Publishers queried by a fan-out read
    pub const PUBLISHERS: &str = "publishers";
}

/// Span names
pub mod spans {
    pub const FLUSH_GROUP: &str = "flush_group";
    pub const FAN_OUT_READ: &str = "fan_out_read";
}

/// Span for work done on behalf of one publisher group
pub fn publisher_span(kind: WriteKind, publisher: &PublisherAddress) -> Span {
    tracing::info_span!(
        spans::FLUSH_GROUP,
        kind = %kind,
        publisher = %publisher,
        entries = tracing::field::Empty
    )
}

/// Span for a fan-out read of one schema
pub fn read_span(schema: &str) -> Span {
    tracing::debug_span!(
        spans::FAN_OUT_READ,
        schema = %schema,
        publishers = tracing::field::Empty
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_can_be_created_without_subscriber() {
        let publisher = PublisherAddress::from_bytes([0xaa; 20]);
        let span = publisher_span(WriteKind::Like, &publisher);
        span.record(fields::ENTRIES, 3);
        let _entered = span.enter();

        let span = read_span("0x01");
        span.record(fields::PUBLISHERS, 2);
    }

    #[test]
    fn test_late_fields_are_declared_on_their_spans() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let publisher = PublisherAddress::from_bytes([0xaa; 20]);

            let span = publisher_span(WriteKind::Like, &publisher);
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), spans::FLUSH_GROUP);
            assert!(metadata.fields().field(fields::ENTRIES).is_some());
            assert!(metadata.fields().field("publisher").is_some());

            let span = read_span("0x01");
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), spans::FAN_OUT_READ);
            assert!(metadata.fields().field(fields::PUBLISHERS).is_some());
        });
    }
}
