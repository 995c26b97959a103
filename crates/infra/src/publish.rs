//! Post-commit event publication.
//!
//! Stores commit first; publication is best-effort fan-out. A publish
//! failure is logged and never unwinds the write.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tradepost_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};

/// A committed domain event with its payload erased to JSON.
pub type CommittedEvent = EventEnvelope<JsonValue>;

/// The bus shared by all services in a process.
pub type SharedEventBus = Arc<InMemoryEventBus<CommittedEvent>>;

pub(crate) fn publish_committed<E>(
    bus: &SharedEventBus,
    aggregate_id: Uuid,
    aggregate_type: &str,
    first_sequence: u64,
    events: &[E],
) where
    E: Event + Serialize,
{
    let mut sequence = first_sequence;
    for event in events {
        match serde_json::to_value(event) {
            Ok(payload) => {
                let envelope = EventEnvelope::new(
                    Uuid::now_v7(),
                    aggregate_id,
                    aggregate_type,
                    sequence,
                    event.occurred_at(),
                    payload,
                );
                if let Err(e) = bus.publish(envelope) {
                    tracing::warn!(
                        aggregate_type,
                        event_type = event.event_type(),
                        error = ?e,
                        "event publication failed"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    aggregate_type,
                    event_type = event.event_type(),
                    error = %e,
                    "event serialization failed"
                );
            }
        }
        sequence += 1;
    }
}
