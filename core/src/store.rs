//! SQLite event store.
//!
//! RULE: Only store.rs talks to the database.
//! Everything else sees the store through EventSource / ConversionTotal.

use crate::{
    error::AttrResult,
    event::{format_timestamp, parse_timestamp, TouchEvent},
    source::{ConversionTotal, EventIter, EventSource},
    types::CONVERSION,
};
use rusqlite::{params, Connection};

pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the event database at `path`.
    pub fn open(path: &str) -> AttrResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> AttrResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> AttrResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_touch_events.sql"))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────

    pub fn insert_event(&self, event: &TouchEvent) -> AttrResult<()> {
        self.conn.execute(
            "INSERT INTO touch_event (customer_id, timestamp_utc, state) VALUES (?1, ?2, ?3)",
            params![
                event.customer_id,
                format_timestamp(&event.timestamp),
                event.state,
            ],
        )?;
        Ok(())
    }

    /// Insert many events in one transaction. Returns the number inserted.
    pub fn insert_events<'a, I>(&self, events: I) -> AttrResult<u64>
    where
        I: IntoIterator<Item = &'a TouchEvent>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO touch_event (customer_id, timestamp_utc, state) VALUES (?1, ?2, ?3)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.customer_id,
                    format_timestamp(&event.timestamp),
                    event.state,
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        log::debug!("store: inserted {inserted} events");
        Ok(inserted)
    }

    /// Delete every stored event. Returns the number removed.
    pub fn clear_events(&self) -> AttrResult<u64> {
        let removed = self.conn.execute("DELETE FROM touch_event", [])?;
        log::debug!("store: cleared {removed} events");
        Ok(removed as u64)
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn event_count(&self) -> AttrResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM touch_event", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// All events ordered by (customer_id, timestamp), insertion order
    /// breaking ties.
    pub fn sorted_events(&self) -> AttrResult<Vec<TouchEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_id, timestamp_utc, state
             FROM touch_event
             ORDER BY customer_id ASC, timestamp_utc ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(customer_id, ts, state)| {
                Ok(TouchEvent {
                    customer_id,
                    timestamp: parse_timestamp(&ts)?,
                    state,
                })
            })
            .collect()
    }

    /// Distinct customers with at least one Conversion event.
    pub fn converted_customer_count(&self) -> AttrResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT customer_id) FROM touch_event WHERE state = ?1",
            params![CONVERSION],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Event count per state label, sorted by label.
    pub fn state_counts(&self) -> AttrResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT state, COUNT(*) FROM touch_event GROUP BY state ORDER BY state ASC",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

impl EventSource for EventStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn events(&self) -> AttrResult<EventIter<'_>> {
        Ok(Box::new(self.sorted_events()?.into_iter().map(Ok)))
    }
}

impl ConversionTotal for EventStore {
    fn total_conversions(&self) -> AttrResult<u64> {
        self.converted_customer_count()
    }
}
