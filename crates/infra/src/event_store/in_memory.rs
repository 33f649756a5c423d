use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use polity_core::{CommandId, EventId, StreamId};
use polity_events::SchemaRegistry;

use super::query::EventFilter;
use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, UncommittedEvent, check_chronology, validate_batch,
};

type ChronoKey = (DateTime<Utc>, EventId);

#[derive(Debug, Default)]
struct Inner {
    /// Commit order; everything else indexes into this.
    log: Vec<StoredEvent>,
    streams: HashMap<StreamId, Vec<usize>>,
    commands: HashMap<(StreamId, CommandId), Vec<usize>>,
    chronological: BTreeMap<ChronoKey, usize>,
    positions: HashMap<EventId, ChronoKey>,
}

impl Inner {
    fn current_version(&self, stream_id: &StreamId) -> u64 {
        self.streams
            .get(stream_id)
            .and_then(|idx| idx.last())
            .map(|i| self.log[*i].version)
            .unwrap_or(0)
    }

    fn collect(&self, indices: &[usize]) -> Vec<StoredEvent> {
        indices.iter().map(|i| self.log[*i].clone()).collect()
    }
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Every append runs its checks and its commit under a
/// single write guard, so a batch is all-or-nothing and two racing appends on
/// one stream serialize: the loser sees the winner's version (or the winner's
/// events, when both carry the same command id).
#[derive(Debug)]
pub struct InMemoryEventStore {
    registry: SchemaRegistry,
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn len(&self) -> Result<usize, EventStoreError> {
        Ok(self.read()?.log.len())
    }

    pub fn is_empty(&self) -> Result<bool, EventStoreError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, EventStoreError> {
        self.inner
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))
    }
}

impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, events), fields(stream_id = %stream_id, event_count = events.len()), err)]
    fn append(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let header = validate_batch(stream_id, &events, &self.registry)?;

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let command_key = (stream_id.clone(), header.command_id);
        if let Some(prior) = inner.commands.get(&command_key) {
            debug!(command_id = %header.command_id, "idempotent append; returning prior events");
            return Ok(inner.collect(prior));
        }

        let current = inner.current_version(stream_id);
        if current != expected_version {
            return Err(EventStoreError::VersionConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }

        // Stream type is fixed by the first event ever appended.
        if let Some(first) = inner.streams.get(stream_id).and_then(|idx| idx.first()) {
            let existing = &inner.log[*first].stream_type;
            if existing != &header.stream_type {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream '{stream_id}' has type '{existing}', attempted append with '{}'",
                    header.stream_type
                )));
            }
        }

        let head = inner
            .streams
            .get(stream_id)
            .and_then(|idx| idx.last())
            .map(|i| inner.log[*i].occurred_at);
        check_chronology(stream_id, head, &events)?;

        if let Some(e) = events.iter().find(|e| inner.positions.contains_key(&e.event_id)) {
            return Err(EventStoreError::InvalidAppend(format!("event {} is already stored", e.event_id)));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut indices = Vec::with_capacity(events.len());
        for (offset, e) in events.into_iter().enumerate() {
            let stored = e.commit(current + 1 + offset as u64);
            let idx = inner.log.len();
            let key = (stored.occurred_at, stored.event_id);
            inner.chronological.insert(key, idx);
            inner.positions.insert(stored.event_id, key);
            inner.log.push(stored.clone());
            indices.push(idx);
            committed.push(stored);
        }
        inner
            .streams
            .entry(stream_id.clone())
            .or_default()
            .extend(indices.iter().copied());
        inner.commands.insert(command_key, indices);

        Ok(committed)
    }

    fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.read()?;
        Ok(inner
            .streams
            .get(stream_id)
            .map(|idx| inner.collect(idx))
            .unwrap_or_default())
    }

    fn load_all_events(
        &self,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.read()?;
        let limit = limit.unwrap_or(usize::MAX);

        let range: Box<dyn Iterator<Item = &usize>> = match after {
            None => Box::new(inner.chronological.values()),
            Some(event_id) => {
                let key = inner
                    .positions
                    .get(&event_id)
                    .ok_or(EventStoreError::UnknownCursor(event_id))?;
                Box::new(
                    inner
                        .chronological
                        .range((std::ops::Bound::Excluded(*key), std::ops::Bound::Unbounded))
                        .map(|(_, idx)| idx),
                )
            }
        };

        Ok(range.take(limit).map(|i| inner.log[*i].clone()).collect())
    }

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.read()?;
        Ok(inner
            .chronological
            .values()
            .map(|i| &inner.log[*i])
            .filter(|e| filter.matches(e))
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }

    fn get_stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        Ok(self.read()?.current_version(stream_id))
    }

    fn load_command(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.read()?;
        Ok(inner
            .commands
            .get(&(stream_id.clone(), command_id))
            .map(|idx| inner.collect(idx))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register("test.happened", 1).unwrap();
        registry
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(stream: &StreamId, command_id: CommandId, offset_secs: i64) -> UncommittedEvent {
        UncommittedEvent {
            event_id: EventId::new(),
            stream_id: stream.clone(),
            stream_type: "test".to_string(),
            event_type: "test.happened".to_string(),
            schema_version: 1,
            occurred_at: t0() + Duration::seconds(offset_secs),
            actor_id: None,
            command_id,
            payload: json!({ "n": offset_secs }),
        }
    }

    #[test]
    fn versions_start_at_one_and_have_no_gaps() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        let cmd = CommandId::new();

        let committed = store
            .append(&stream, 0, vec![event(&stream, cmd, 0), event(&stream, cmd, 1)])
            .unwrap();
        assert_eq!(committed.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.get_stream_version(&stream).unwrap(), 2);
        assert_eq!(store.get_stream_version(&StreamId::new("nope")).unwrap(), 0);
    }

    #[test]
    fn unregistered_event_type_is_rejected() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        let mut e = event(&stream, CommandId::new(), 0);
        e.event_type = "test.unknown".to_string();

        let err = store.append(&stream, 0, vec![e]).unwrap_err();
        assert!(matches!(err, EventStoreError::Schema(_)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn mixed_command_ids_are_rejected() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        let err = store
            .append(
                &stream,
                0,
                vec![event(&stream, CommandId::new(), 0), event(&stream, CommandId::new(), 1)],
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn failing_batch_leaves_store_untouched() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        let first = store.append(&stream, 0, vec![event(&stream, CommandId::new(), 0)]).unwrap();
        let before = store.load_all_events(None, None).unwrap();

        let cmd = CommandId::new();
        let mut unknown = event(&stream, cmd, 3);
        unknown.event_type = "test.unknown".to_string();
        let batch = vec![event(&stream, cmd, 1), event(&stream, cmd, 2), unknown];
        assert!(matches!(store.append(&stream, 1, batch), Err(EventStoreError::Schema(_))));

        let cmd = CommandId::new();
        let mut reused = event(&stream, cmd, 2);
        reused.event_id = first[0].event_id;
        let batch = vec![event(&stream, cmd, 1), reused];
        assert!(matches!(store.append(&stream, 1, batch), Err(EventStoreError::InvalidAppend(_))));

        assert_eq!(store.get_stream_version(&stream).unwrap(), 1);
        assert_eq!(store.load_all_events(None, None).unwrap(), before);
        assert!(store.load_command(&stream, cmd).unwrap().is_empty());
    }

    #[test]
    fn append_before_stream_head_is_out_of_order() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        store.append(&stream, 0, vec![event(&stream, CommandId::new(), 10)]).unwrap();

        let err = store
            .append(&stream, 1, vec![event(&stream, CommandId::new(), 5)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::OutOfOrder { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.get_stream_version(&stream).unwrap(), 1);

        // Same instant as the head is fine; other streams are unaffected.
        store.append(&stream, 1, vec![event(&stream, CommandId::new(), 10)]).unwrap();
        let other = StreamId::new("s-2");
        store.append(&other, 0, vec![event(&other, CommandId::new(), 0)]).unwrap();

        let cmd = CommandId::new();
        let err = store
            .append(&stream, 2, vec![event(&stream, cmd, 12), event(&stream, cmd, 11)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn stream_type_is_fixed_by_first_append() {
        let store = InMemoryEventStore::new(registry());
        let stream = StreamId::new("s-1");
        store.append(&stream, 0, vec![event(&stream, CommandId::new(), 0)]).unwrap();

        let mut other = event(&stream, CommandId::new(), 1);
        other.stream_type = "other".to_string();
        let err = store.append(&stream, 1, vec![other]).unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn chronological_paging_is_exclusive_of_cursor() {
        let store = InMemoryEventStore::new(registry());
        let a = StreamId::new("a");
        let b = StreamId::new("b");
        // Commit order differs from chronological order.
        store.append(&a, 0, vec![event(&a, CommandId::new(), 30)]).unwrap();
        store.append(&b, 0, vec![event(&b, CommandId::new(), 10)]).unwrap();
        store.append(&b, 1, vec![event(&b, CommandId::new(), 20)]).unwrap();

        let all = store.load_all_events(None, None).unwrap();
        let offsets: Vec<i64> = all.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(offsets, vec![10, 20, 30]);

        let page = store.load_all_events(Some(all[0].event_id), Some(1)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event_id, all[1].event_id);

        let err = store.load_all_events(Some(EventId::new()), None).unwrap_err();
        assert!(matches!(err, EventStoreError::UnknownCursor(_)));
    }

    #[test]
    fn query_filters_by_type_and_time() {
        let store = InMemoryEventStore::new(registry());
        let a = StreamId::new("a");
        for i in 0..5 {
            store.append(&a, i as u64, vec![event(&a, CommandId::new(), i)]).unwrap();
        }

        let found = store
            .query_events(
                &EventFilter::new()
                    .stream_type("test")
                    .between(t0() + Duration::seconds(1), t0() + Duration::seconds(3)),
            )
            .unwrap();
        assert_eq!(found.len(), 3);

        let none = store.query_events(&EventFilter::new().event_type("other")).unwrap();
        assert!(none.is_empty());
    }
}
