//! SQLite-backed event store (embedded, durable, single node).
//!
//! ## Schema
//!
//! - `events`: one row per committed event, `UNIQUE(stream_id, version)`.
//! - `commands`: one row per committed `(stream_id, command_id)`.
//!
//! Timestamps are stored as fixed-width RFC 3339 text with nanoseconds and ids
//! as hyphenated lowercase UUIDs, so `ORDER BY occurred_at, event_id` in SQL is
//! the same order as `(DateTime, EventId)` in Rust.
//!
//! ## Error Mapping
//!
//! | Failure | EventStoreError |
//! |---------|-----------------|
//! | command id already committed on the stream | none: its events are returned |
//! | unique violation on `events(stream_id, version)` | `VersionConflict` |
//! | unique violation on `events(event_id)` | `InvalidAppend` |
//! | batch timestamped before the stream head | `OutOfOrder` |
//! | any other sqlx error | `Storage` |
//!
//! ## Runtime
//!
//! The `EventStore` trait is synchronous. The store owns a current-thread tokio
//! runtime and blocks on it, so it must not be called from inside another
//! tokio runtime.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tokio::runtime::Runtime;
use tracing::{debug, instrument};
use uuid::Uuid;

use polity_core::{ActorId, CommandId, EventId, StreamId};
use polity_events::SchemaRegistry;

use super::query::EventFilter;
use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, UncommittedEvent, check_chronology, validate_batch,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id       TEXT    NOT NULL PRIMARY KEY,
        stream_id      TEXT    NOT NULL,
        stream_type    TEXT    NOT NULL,
        version        INTEGER NOT NULL CHECK (version > 0),
        command_id     TEXT    NOT NULL,
        event_type     TEXT    NOT NULL,
        schema_version INTEGER NOT NULL,
        occurred_at    TEXT    NOT NULL,
        actor_id       TEXT    NULL,
        payload        TEXT    NOT NULL,
        UNIQUE (stream_id, version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS events_chronological ON events (occurred_at, event_id)",
    "CREATE INDEX IF NOT EXISTS events_command ON events (stream_id, command_id)",
    r#"
    CREATE TABLE IF NOT EXISTS commands (
        stream_id  TEXT NOT NULL,
        command_id TEXT NOT NULL,
        PRIMARY KEY (stream_id, command_id)
    )
    "#,
];

const SELECT_COLUMNS: &str = "event_id, stream_id, stream_type, version, command_id, event_type, \
     schema_version, occurred_at, actor_id, payload";

/// SQLite-backed append-only event store.
#[derive(Debug)]
pub struct SqliteEventStore {
    pool: SqlitePool,
    runtime: Runtime,
    registry: SchemaRegistry,
}

impl SqliteEventStore {
    /// Open (or create) the database at `url` and ensure the schema exists.
    ///
    /// `sqlite::memory:` gives a private in-memory database.
    pub fn connect(url: &str, registry: SchemaRegistry) -> Result<Self, EventStoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EventStoreError::Storage(format!("failed to build runtime: {e}")))?;

        let pool = runtime.block_on(async {
            let options = url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()
                .map_err(|e| map_sqlx_error("parse_url", e))?
                .create_if_missing(true);

            // One connection: a private in-memory database lives and dies with
            // its connection, and the kernel has a single writer anyway.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .map_err(|e| map_sqlx_error("connect", e))?;

            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(&pool)
                    .await
                    .map_err(|e| map_sqlx_error("create_schema", e))?;
            }
            Ok::<_, EventStoreError>(pool)
        })?;

        Ok(Self {
            pool,
            runtime,
            registry,
        })
    }

    async fn append_events(
        &self,
        stream_id: &StreamId,
        expected_version: u64,
        events: Vec<UncommittedEvent>,
        stream_type: String,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // 1) Idempotency, before anything else.
        let prior = fetch_command(&mut tx, stream_id, command_id).await?;
        if !prior.is_empty() {
            rollback(tx).await?;
            debug!(command_id = %command_id, "idempotent append; returning prior events");
            return Ok(prior);
        }

        // 2) Version, stream type and chronology.
        let head = stream_head(&mut tx, stream_id).await?;
        let current = head.version;
        if current != expected_version {
            rollback(tx).await?;
            return Err(EventStoreError::VersionConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }
        if let Some(existing) = head.stream_type {
            if existing != stream_type {
                rollback(tx).await?;
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream '{stream_id}' has type '{existing}', attempted append with '{stream_type}'"
                )));
            }
        }
        if let Err(e) = check_chronology(stream_id, head.occurred_at, &events) {
            rollback(tx).await?;
            return Err(e);
        }

        // 3) Claim the command id. SQLite serializes write transactions, so a
        // racing twin of this command is answered by step 1 once we commit.
        sqlx::query("INSERT INTO commands (stream_id, command_id) VALUES (?1, ?2)")
            .bind(stream_id.as_str())
            .bind(command_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_command", e))?;

        // 4) Events.
        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let stored = event.commit(current + 1 + offset as u64);
            let payload = serde_json::to_string(&stored.payload)
                .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, stream_id, stream_type, version, command_id,
                    event_type, schema_version, occurred_at, actor_id, payload
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(stored.event_id.to_string())
            .bind(stored.stream_id.as_str())
            .bind(&stored.stream_type)
            .bind(stored.version as i64)
            .bind(stored.command_id.to_string())
            .bind(&stored.event_type)
            .bind(i64::from(stored.schema_version))
            .bind(format_time(stored.occurred_at))
            .bind(stored.actor_id.map(|a| a.to_string()))
            .bind(payload)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    rollback(tx).await?;
                    let actual = self.stream_version(stream_id).await?;
                    if actual == expected_version {
                        // The stream did not move, so the clash is on the event id.
                        return Err(EventStoreError::InvalidAppend(format!(
                            "event {} is already stored",
                            stored.event_id
                        )));
                    }
                    return Err(EventStoreError::VersionConflict {
                        stream_id: stream_id.clone(),
                        expected: expected_version,
                        actual,
                    });
                }
                return Err(map_sqlx_error("insert_event", e));
            }
            committed.push(stored);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM events WHERE stream_id = ?1")
            .bind(stream_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stream_version", e))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("stream_version", e))?;
        Ok(version as u64)
    }

    async fn load_command_events(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE stream_id = ?1 AND command_id = ?2 ORDER BY version"
        ))
        .bind(stream_id.as_str())
        .bind(command_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_command", e))?;
        rows.iter().map(stored_event_from_row).collect()
    }
}

impl Drop for SqliteEventStore {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}

impl EventStore for SqliteEventStore {
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
        self.runtime.block_on(self.append_events(
            stream_id,
            expected_version,
            events,
            header.stream_type,
            header.command_id,
        ))
    }

    #[instrument(skip(self), fields(stream_id = %stream_id), err)]
    fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE stream_id = ?1 ORDER BY version"
            ))
            .bind(stream_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_stream", e))?;
            rows.iter().map(stored_event_from_row).collect()
        })
    }

    #[instrument(skip(self), err)]
    fn load_all_events(
        &self,
        after: Option<EventId>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);

        self.runtime.block_on(async {
            let rows = match after {
                None => sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM events ORDER BY occurred_at, event_id LIMIT ?1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_all_events", e))?,
                Some(event_id) => {
                    let cursor = sqlx::query("SELECT occurred_at FROM events WHERE event_id = ?1")
                        .bind(event_id.to_string())
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| map_sqlx_error("load_cursor", e))?
                        .ok_or(EventStoreError::UnknownCursor(event_id))?;
                    let occurred_at: String = cursor
                        .try_get("occurred_at")
                        .map_err(|e| map_sqlx_error("load_cursor", e))?;

                    sqlx::query(&format!(
                        "SELECT {SELECT_COLUMNS} FROM events \
                         WHERE occurred_at > ?1 OR (occurred_at = ?1 AND event_id > ?2) \
                         ORDER BY occurred_at, event_id LIMIT ?3"
                    ))
                    .bind(occurred_at)
                    .bind(event_id.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("load_all_events", e))?
                }
            };
            rows.iter().map(stored_event_from_row).collect()
        })
    }

    #[instrument(skip(self), err)]
    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM events \
                 WHERE (?1 IS NULL OR stream_type = ?1) \
                   AND (?2 IS NULL OR event_type = ?2) \
                   AND (?3 IS NULL OR occurred_at >= ?3) \
                   AND (?4 IS NULL OR occurred_at <= ?4) \
                 ORDER BY occurred_at, event_id LIMIT ?5"
            ))
            .bind(filter.stream_type.as_deref())
            .bind(filter.event_type.as_deref())
            .bind(filter.occurred_after.map(format_time))
            .bind(filter.occurred_before.map(format_time))
            .bind(filter.effective_limit() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_events", e))?;
            rows.iter().map(stored_event_from_row).collect()
        })
    }

    fn get_stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        self.runtime.block_on(self.stream_version(stream_id))
    }

    fn load_command(
        &self,
        stream_id: &StreamId,
        command_id: CommandId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.load_command_events(stream_id, command_id))
    }
}

async fn fetch_command(
    tx: &mut Transaction<'_, Sqlite>,
    stream_id: &StreamId,
    command_id: CommandId,
) -> Result<Vec<StoredEvent>, EventStoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM events WHERE stream_id = ?1 AND command_id = ?2 ORDER BY version"
    ))
    .bind(stream_id.as_str())
    .bind(command_id.to_string())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_command", e))?;
    rows.iter().map(stored_event_from_row).collect()
}

struct StreamHead {
    version: u64,
    stream_type: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
}

async fn stream_head(tx: &mut Transaction<'_, Sqlite>, stream_id: &StreamId) -> Result<StreamHead, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(version), 0) AS current_version,
            (SELECT stream_type FROM events WHERE stream_id = ?1 ORDER BY version LIMIT 1) AS stream_type,
            (SELECT occurred_at FROM events WHERE stream_id = ?1 ORDER BY version DESC LIMIT 1) AS head_at
        FROM events
        WHERE stream_id = ?1
        "#,
    )
    .bind(stream_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    let stream_type: Option<String> = row
        .try_get("stream_type")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    let head_at: Option<String> = row
        .try_get("head_at")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    Ok(StreamHead {
        version: current as u64,
        stream_type,
        occurred_at: head_at.as_deref().map(parse_time).transpose()?,
    })
}

async fn rollback(tx: Transaction<'_, Sqlite>) -> Result<(), EventStoreError> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, EventStoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EventStoreError::Storage(format!("corrupt timestamp '{raw}': {e}")))
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid, EventStoreError> {
    Uuid::parse_str(raw).map_err(|e| EventStoreError::Storage(format!("corrupt {column} '{raw}': {e}")))
}

fn stored_event_from_row(row: &SqliteRow) -> Result<StoredEvent, EventStoreError> {
    let get = |column: &str| -> Result<String, EventStoreError> {
        row.try_get::<String, _>(column)
            .map_err(|e| map_sqlx_error("decode_row", e))
    };

    let version: i64 = row.try_get("version").map_err(|e| map_sqlx_error("decode_row", e))?;
    let schema_version: i64 = row
        .try_get("schema_version")
        .map_err(|e| map_sqlx_error("decode_row", e))?;
    let actor_id: Option<String> = row.try_get("actor_id").map_err(|e| map_sqlx_error("decode_row", e))?;
    let payload = get("payload")?;

    Ok(StoredEvent {
        event_id: EventId::from_uuid(parse_uuid("event_id", &get("event_id")?)?),
        stream_id: StreamId::new(get("stream_id")?),
        stream_type: get("stream_type")?,
        version: version as u64,
        event_type: get("event_type")?,
        schema_version: u32::try_from(schema_version)
            .map_err(|_| EventStoreError::Storage(format!("corrupt schema_version {schema_version}")))?,
        occurred_at: parse_time(&get("occurred_at")?)?,
        actor_id: actor_id
            .map(|raw| parse_uuid("actor_id", &raw).map(ActorId::from_uuid))
            .transpose()?,
        command_id: CommandId::from_uuid(parse_uuid("command_id", &get("command_id")?)?),
        payload: serde_json::from_str(&payload)
            .map_err(|e| EventStoreError::Storage(format!("corrupt payload: {e}")))?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            EventStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => EventStoreError::Storage(format!("connection pool closed in {operation}")),
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
