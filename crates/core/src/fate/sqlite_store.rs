//! SQLite-backed fate store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    BatchQueueEntry, Event, EventDate, FateBatch, FateError, FateStatus, FateStore, FateTicket,
    FateTicketFilter, NewFateBatch, NewFateTicket, QueueStatus, ServiceRole, Shop,
};

const QUEUE_COLUMNS: &str = "id, event_id, event_date_id, status, requested_at, processed_at, completed_at, error_message, batch_id";

const BATCH_COLUMNS: &str =
    "id, event_id, event_date_id, batch_size, status, created_at, activated_at";

const TICKET_COLUMNS: &str = "t.id, t.batch_id, t.shop_id, t.event_id, t.event_date_id, t.status, t.fate_position, t.is_drawn, t.drawn_at, t.drawn_by, t.created_at, t.deleted_at";

const TICKET_ORDER: &str = "ORDER BY b.created_at ASC, t.batch_id ASC, t.fate_position ASC, t.id ASC";

/// SQLite-backed fate store.
pub struct SqliteFateStore {
    conn: Mutex<Connection>,
}

impl SqliteFateStore {
    /// Create a new SQLite fate store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, FateError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite fate store (useful for testing).
    pub fn in_memory() -> Result<Self, FateError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), FateError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS event_dates (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                date TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS shops (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS shop_attendance (
                event_date_id TEXT NOT NULL,
                shop_id TEXT NOT NULL,
                PRIMARY KEY (event_date_id, shop_id)
            );

            CREATE TABLE IF NOT EXISTS batch_queue (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_date_id TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                processed_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                batch_id TEXT
            );

            CREATE TABLE IF NOT EXISTS fate_batches (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_date_id TEXT NOT NULL,
                batch_size INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                activated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS fate_tickets (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                shop_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                event_date_id TEXT NOT NULL,
                status TEXT NOT NULL,
                fate_position INTEGER,
                is_drawn INTEGER NOT NULL DEFAULT 0,
                drawn_at TEXT,
                drawn_by TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_event_dates_event_id ON event_dates(event_id);
            CREATE INDEX IF NOT EXISTS idx_fate_batches_event_date ON fate_batches(event_date_id);
            CREATE INDEX IF NOT EXISTS idx_fate_tickets_batch ON fate_tickets(batch_id, fate_position);
            CREATE INDEX IF NOT EXISTS idx_fate_tickets_event_date ON fate_tickets(event_date_id, status);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, FateError> {
        self.conn
            .lock()
            .map_err(|_| FateError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &FateTicketFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref event_id) = filter.event_id {
            conditions.push("t.event_id = ?");
            params.push(Box::new(event_id.clone()));
        }

        if let Some(ref event_date_id) = filter.event_date_id {
            conditions.push("t.event_date_id = ?");
            params.push(Box::new(event_date_id.clone()));
        }

        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("t.batch_id = ?");
            params.push(Box::new(batch_id.clone()));
        }

        if filter.active_only {
            conditions.push("t.status = 'active' AND b.status = 'active'");
        }

        if !filter.include_deleted {
            conditions.push("t.deleted_at IS NULL");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_queue_entry(row: &rusqlite::Row) -> rusqlite::Result<BatchQueueEntry> {
        let status: String = row.get(3)?;
        Ok(BatchQueueEntry {
            id: row.get(0)?,
            event_id: row.get(1)?,
            event_date_id: row.get(2)?,
            status: QueueStatus::parse(&status).ok_or_else(|| bad_value(3, &status))?,
            requested_at: parse_ts(4, row.get(4)?)?,
            processed_at: parse_opt_ts(5, row.get(5)?)?,
            completed_at: parse_opt_ts(6, row.get(6)?)?,
            error_message: row.get(7)?,
            batch_id: row.get(8)?,
        })
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<FateBatch> {
        let status: String = row.get(4)?;
        Ok(FateBatch {
            id: row.get(0)?,
            event_id: row.get(1)?,
            event_date_id: row.get(2)?,
            batch_size: row.get(3)?,
            status: FateStatus::parse(&status).ok_or_else(|| bad_value(4, &status))?,
            created_at: parse_ts(5, row.get(5)?)?,
            activated_at: parse_opt_ts(6, row.get(6)?)?,
        })
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<FateTicket> {
        let status: String = row.get(5)?;
        Ok(FateTicket {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            shop_id: row.get(2)?,
            event_id: row.get(3)?,
            event_date_id: row.get(4)?,
            status: FateStatus::parse(&status).ok_or_else(|| bad_value(5, &status))?,
            fate_position: row.get(6)?,
            is_drawn: row.get(7)?,
            drawn_at: parse_opt_ts(8, row.get(8)?)?,
            drawn_by: row.get(9)?,
            created_at: parse_ts(10, row.get(10)?)?,
            deleted_at: parse_opt_ts(11, row.get(11)?)?,
        })
    }

    fn fetch_queue_entry(conn: &Connection, id: &str) -> Result<BatchQueueEntry, FateError> {
        conn.query_row(
            &format!("SELECT {} FROM batch_queue WHERE id = ?", QUEUE_COLUMNS),
            params![id],
            Self::row_to_queue_entry,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| FateError::not_found("queue entry", id))
    }

    fn fetch_batch(conn: &Connection, id: &str) -> Result<Option<FateBatch>, FateError> {
        conn.query_row(
            &format!("SELECT {} FROM fate_batches WHERE id = ?", BATCH_COLUMNS),
            params![id],
            Self::row_to_batch,
        )
        .optional()
        .map_err(db_err)
    }

    fn fetch_ticket(conn: &Connection, id: &str) -> Result<Option<FateTicket>, FateError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM fate_tickets t WHERE t.id = ?",
                TICKET_COLUMNS
            ),
            params![id],
            Self::row_to_ticket,
        )
        .optional()
        .map_err(db_err)
    }
}

impl FateStore for SqliteFateStore {
    fn get_event(&self, id: &str) -> Result<Option<Event>, FateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, deleted_at FROM events WHERE id = ?",
            params![id],
            |row| {
                Ok(Event {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    deleted_at: parse_opt_ts(2, row.get(2)?)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn get_event_date(&self, id: &str) -> Result<Option<EventDate>, FateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, event_id, date, deleted_at FROM event_dates WHERE id = ?",
            params![id],
            |row| {
                let date: String = row.get(2)?;
                Ok(EventDate {
                    id: row.get(0)?,
                    event_id: row.get(1)?,
                    date: date
                        .parse::<NaiveDate>()
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
                    deleted_at: parse_opt_ts(3, row.get(3)?)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn get_shop(&self, id: &str) -> Result<Option<Shop>, FateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, deleted_at FROM shops WHERE id = ?",
            params![id],
            |row| {
                Ok(Shop {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    deleted_at: parse_opt_ts(2, row.get(2)?)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn attending_shop_ids(&self, event_date_id: &str) -> Result<Vec<String>, FateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT shop_id FROM shop_attendance WHERE event_date_id = ? ORDER BY shop_id")
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![event_date_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn put_event(&self, event: &Event) -> Result<(), FateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO events (id, name, deleted_at) VALUES (?, ?, ?)",
            params![event.id, event.name, event.deleted_at.as_ref().map(ts)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn put_event_date(&self, event_date: &EventDate) -> Result<(), FateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO event_dates (id, event_id, date, deleted_at) VALUES (?, ?, ?, ?)",
            params![
                event_date.id,
                event_date.event_id,
                event_date.date.to_string(),
                event_date.deleted_at.as_ref().map(ts),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn put_shop(&self, shop: &Shop) -> Result<(), FateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO shops (id, name, deleted_at) VALUES (?, ?, ?)",
            params![shop.id, shop.name, shop.deleted_at.as_ref().map(ts)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn register_attendance(&self, event_date_id: &str, shop_id: &str) -> Result<(), FateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO shop_attendance (event_date_id, shop_id) VALUES (?, ?)",
            params![event_date_id, shop_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn create_queue_entry(
        &self,
        event_id: &str,
        event_date_id: &str,
    ) -> Result<BatchQueueEntry, FateError> {
        let conn = self.lock()?;

        let entry = BatchQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            event_date_id: event_date_id.to_string(),
            status: QueueStatus::Pending,
            requested_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            error_message: None,
            batch_id: None,
        };

        conn.execute(
            "INSERT INTO batch_queue (id, event_id, event_date_id, status, requested_at) VALUES (?, ?, ?, ?, ?)",
            params![
                entry.id,
                entry.event_id,
                entry.event_date_id,
                entry.status.as_str(),
                ts(&entry.requested_at),
            ],
        )
        .map_err(db_err)?;

        Ok(entry)
    }

    fn get_queue_entry(&self, id: &str) -> Result<Option<BatchQueueEntry>, FateError> {
        let conn = self.lock()?;
        match Self::fetch_queue_entry(&conn, id) {
            Ok(entry) => Ok(Some(entry)),
            Err(FateError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mark_queue_processing(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE batch_queue SET status = ?, batch_id = ?, processed_at = ? WHERE id = ?",
                params![QueueStatus::Processing.as_str(), batch_id, ts(&at), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(FateError::not_found("queue entry", id));
        }
        Self::fetch_queue_entry(&conn, id)
    }

    fn mark_queue_completed(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE batch_queue SET status = ?, batch_id = ?, processed_at = ?, completed_at = ? WHERE id = ?",
                params![
                    QueueStatus::Completed.as_str(),
                    batch_id,
                    ts(&at),
                    ts(&at),
                    id
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(FateError::not_found("queue entry", id));
        }
        Self::fetch_queue_entry(&conn, id)
    }

    fn mark_queue_error(
        &self,
        id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE batch_queue SET status = ?, error_message = ?, processed_at = ? WHERE id = ?",
                params![QueueStatus::Error.as_str(), message, ts(&at), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(FateError::not_found("queue entry", id));
        }
        Self::fetch_queue_entry(&conn, id)
    }

    fn create_batch(&self, batch: &NewFateBatch) -> Result<FateBatch, FateError> {
        let conn = self.lock()?;

        let created = FateBatch {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: batch.event_id.clone(),
            event_date_id: batch.event_date_id.clone(),
            batch_size: batch.batch_size,
            status: FateStatus::Pending,
            created_at: Utc::now(),
            activated_at: None,
        };

        conn.execute(
            "INSERT INTO fate_batches (id, event_id, event_date_id, batch_size, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                created.id,
                created.event_id,
                created.event_date_id,
                created.batch_size,
                created.status.as_str(),
                ts(&created.created_at),
            ],
        )
        .map_err(db_err)?;

        Ok(created)
    }

    fn get_batch(&self, id: &str) -> Result<Option<FateBatch>, FateError> {
        let conn = self.lock()?;
        Self::fetch_batch(&conn, id)
    }

    fn activate_batch(
        &self,
        id: &str,
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<FateBatch, FateError> {
        let conn = self.lock()?;

        let current = Self::fetch_batch(&conn, id)?.ok_or_else(|| FateError::not_found("batch", id))?;
        if current.status == FateStatus::Active {
            return Err(FateError::InvalidState {
                entity: "batch",
                id: id.to_string(),
                operation: "activate",
                reason: "already active".to_string(),
            });
        }

        conn.execute(
            "UPDATE fate_batches SET status = ?, activated_at = ? WHERE id = ?",
            params![FateStatus::Active.as_str(), ts(&at), id],
        )
        .map_err(db_err)?;

        Ok(FateBatch {
            status: FateStatus::Active,
            activated_at: Some(at),
            ..current
        })
    }

    fn insert_tickets(
        &self,
        tickets: &[NewFateTicket],
        _role: &ServiceRole,
    ) -> Result<Vec<FateTicket>, FateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let now = Utc::now();

        let mut created = Vec::with_capacity(tickets.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO fate_tickets (id, batch_id, shop_id, event_id, event_date_id, status, is_drawn, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
                )
                .map_err(db_err)?;

            for ticket in tickets {
                let row = FateTicket {
                    id: uuid::Uuid::new_v4().to_string(),
                    batch_id: ticket.batch_id.clone(),
                    shop_id: ticket.shop_id.clone(),
                    event_id: ticket.event_id.clone(),
                    event_date_id: ticket.event_date_id.clone(),
                    status: FateStatus::Pending,
                    fate_position: None,
                    is_drawn: false,
                    drawn_at: None,
                    drawn_by: None,
                    created_at: now,
                    deleted_at: None,
                };

                stmt.execute(params![
                    row.id,
                    row.batch_id,
                    row.shop_id,
                    row.event_id,
                    row.event_date_id,
                    row.status.as_str(),
                    ts(&row.created_at),
                ])
                .map_err(db_err)?;

                created.push(row);
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(created)
    }

    fn activate_tickets(
        &self,
        positions: &[(String, u32)],
        _role: &ServiceRole,
    ) -> Result<usize, FateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "UPDATE fate_tickets SET fate_position = ?, status = 'active' WHERE id = ? AND status = 'pending' AND deleted_at IS NULL",
                )
                .map_err(db_err)?;

            for (id, position) in positions {
                let changed = stmt.execute(params![position, id]).map_err(db_err)?;
                if changed == 0 {
                    // Dropping the transaction rolls back the earlier updates.
                    return Err(FateError::InvalidState {
                        entity: "ticket",
                        id: id.clone(),
                        operation: "activate",
                        reason: "missing, deleted or already active".to_string(),
                    });
                }
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(positions.len())
    }

    fn soft_delete_tickets(
        &self,
        ids: &[String],
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<usize, FateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare("UPDATE fate_tickets SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .map_err(db_err)?;
            for id in ids {
                deleted += stmt.execute(params![ts(&at), id]).map_err(db_err)?;
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }

    fn draw_next_ticket(
        &self,
        event_date_id: &str,
        drawn_by: &str,
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<Option<FateTicket>, FateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let next = tx
            .query_row(
                &format!(
                    "SELECT {} FROM fate_tickets t JOIN fate_batches b ON b.id = t.batch_id \
                     WHERE t.event_date_id = ? AND t.status = 'active' AND b.status = 'active' \
                     AND t.is_drawn = 0 AND t.deleted_at IS NULL {} LIMIT 1",
                    TICKET_COLUMNS, TICKET_ORDER
                ),
                params![event_date_id],
                Self::row_to_ticket,
            )
            .optional()
            .map_err(db_err)?;

        let Some(ticket) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE fate_tickets SET is_drawn = 1, drawn_at = ?, drawn_by = ? WHERE id = ?",
            params![ts(&at), drawn_by, ticket.id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(Some(FateTicket {
            is_drawn: true,
            drawn_at: Some(at),
            drawn_by: Some(drawn_by.to_string()),
            ..ticket
        }))
    }

    fn get_ticket(&self, id: &str) -> Result<Option<FateTicket>, FateError> {
        let conn = self.lock()?;
        Self::fetch_ticket(&conn, id)
    }

    fn list_tickets(&self, filter: &FateTicketFilter) -> Result<Vec<FateTicket>, FateError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM fate_tickets t LEFT JOIN fate_batches b ON b.id = t.batch_id {} {} LIMIT ? OFFSET ?",
            TICKET_COLUMNS, where_clause, TICKET_ORDER
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_ticket)
            .map_err(db_err)?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result.map_err(db_err)?);
        }

        Ok(tickets)
    }

    fn count_tickets(&self, filter: &FateTicketFilter) -> Result<i64, FateError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT COUNT(*) FROM fate_tickets t LEFT JOIN fate_batches b ON b.id = t.batch_id {}",
            where_clause
        );

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> FateError {
    FateError::Database(e.to_string())
}

fn bad_value(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn create_test_store() -> SqliteFateStore {
        let store = SqliteFateStore::in_memory().unwrap();
        fixtures::seed_catalog(&store, &["shop-a", "shop-b"]).unwrap();
        store
    }

    fn new_tickets(batch: &FateBatch, shops: &[&str]) -> Vec<NewFateTicket> {
        shops
            .iter()
            .map(|shop| NewFateTicket {
                batch_id: batch.id.clone(),
                shop_id: shop.to_string(),
                event_id: batch.event_id.clone(),
                event_date_id: batch.event_date_id.clone(),
            })
            .collect()
    }

    fn active_batch(store: &SqliteFateStore, shops: &[&str]) -> (FateBatch, Vec<FateTicket>) {
        let role = ServiceRole::elevate();
        let batch = store
            .create_batch(&NewFateBatch {
                event_id: fixtures::EVENT_ID.to_string(),
                event_date_id: fixtures::EVENT_DATE_ID.to_string(),
                batch_size: shops.len() as u32,
            })
            .unwrap();
        let tickets = store.insert_tickets(&new_tickets(&batch, shops), &role).unwrap();
        let positions: Vec<(String, u32)> = tickets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i as u32 + 1))
            .collect();
        store.activate_tickets(&positions, &role).unwrap();
        let batch = store.activate_batch(&batch.id, Utc::now(), &role).unwrap();
        (batch, tickets)
    }

    #[test]
    fn test_catalog_lookups() {
        let store = create_test_store();

        let event = store.get_event(fixtures::EVENT_ID).unwrap().unwrap();
        assert_eq!(event.name, "Spring Market");
        assert!(!event.is_deleted());

        let date = store.get_event_date(fixtures::EVENT_DATE_ID).unwrap().unwrap();
        assert_eq!(date.event_id, fixtures::EVENT_ID);

        assert!(store.get_shop("shop-a").unwrap().is_some());
        assert!(store.get_shop("missing").unwrap().is_none());
        assert!(store.get_event("missing").unwrap().is_none());
    }

    #[test]
    fn test_attendance_is_idempotent() {
        let store = create_test_store();
        store
            .register_attendance(fixtures::EVENT_DATE_ID, "shop-a")
            .unwrap();

        let ids = store.attending_shop_ids(fixtures::EVENT_DATE_ID).unwrap();
        assert_eq!(ids, vec!["shop-a".to_string(), "shop-b".to_string()]);
        assert!(store.attending_shop_ids("other-date").unwrap().is_empty());
    }

    #[test]
    fn test_queue_lifecycle() {
        let store = create_test_store();

        let entry = store
            .create_queue_entry(fixtures::EVENT_ID, fixtures::EVENT_DATE_ID)
            .unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert!(entry.batch_id.is_none());

        let processing = store
            .mark_queue_processing(&entry.id, "batch-1", Utc::now())
            .unwrap();
        assert_eq!(processing.status, QueueStatus::Processing);
        assert_eq!(processing.batch_id.as_deref(), Some("batch-1"));
        assert!(processing.processed_at.is_some());

        let completed = store
            .mark_queue_completed(&entry.id, "batch-1", Utc::now())
            .unwrap();
        assert_eq!(completed.status, QueueStatus::Completed);
        assert!(completed.completed_at.is_some());

        let fetched = store.get_queue_entry(&entry.id).unwrap().unwrap();
        assert_eq!(fetched, completed);
    }

    #[test]
    fn test_mark_queue_error_overwrites() {
        let store = create_test_store();
        let entry = store
            .create_queue_entry(fixtures::EVENT_ID, fixtures::EVENT_DATE_ID)
            .unwrap();

        store.mark_queue_error(&entry.id, "first", Utc::now()).unwrap();
        let again = store.mark_queue_error(&entry.id, "second", Utc::now()).unwrap();

        assert_eq!(again.status, QueueStatus::Error);
        assert_eq!(again.error_message.as_deref(), Some("second"));
    }

    #[test]
    fn test_mark_unknown_queue_entry() {
        let store = create_test_store();
        let result = store.mark_queue_error("nope", "msg", Utc::now());
        assert!(matches!(result, Err(FateError::NotFound { .. })));
        assert!(store.get_queue_entry("nope").unwrap().is_none());
    }

    #[test]
    fn test_insert_and_activate_tickets() {
        let store = create_test_store();
        let (batch, tickets) = active_batch(&store, &["shop-a", "shop-b", "shop-a"]);

        assert_eq!(batch.status, FateStatus::Active);
        assert!(batch.activated_at.is_some());
        assert_eq!(tickets.len(), 3);

        let listed = store
            .list_tickets(&FateTicketFilter::new().with_batch(&batch.id).active_only())
            .unwrap();
        let positions: Vec<u32> = listed.iter().filter_map(|t| t.fate_position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(listed.iter().all(|t| !t.is_drawn));
    }

    #[test]
    fn test_activate_tickets_is_all_or_nothing() {
        let store = create_test_store();
        let role = ServiceRole::elevate();
        let batch = store
            .create_batch(&NewFateBatch {
                event_id: fixtures::EVENT_ID.to_string(),
                event_date_id: fixtures::EVENT_DATE_ID.to_string(),
                batch_size: 2,
            })
            .unwrap();
        let tickets = store
            .insert_tickets(&new_tickets(&batch, &["shop-a", "shop-b"]), &role)
            .unwrap();

        let positions = vec![(tickets[0].id.clone(), 1), ("missing".to_string(), 2)];
        let result = store.activate_tickets(&positions, &role);
        assert!(matches!(result, Err(FateError::InvalidState { .. })));

        let first = store.get_ticket(&tickets[0].id).unwrap().unwrap();
        assert_eq!(first.status, FateStatus::Pending);
        assert_eq!(first.fate_position, None);
    }

    #[test]
    fn test_activate_batch_twice_fails() {
        let store = create_test_store();
        let (batch, _) = active_batch(&store, &["shop-a"]);
        let result = store.activate_batch(&batch.id, Utc::now(), &ServiceRole::elevate());
        assert!(matches!(result, Err(FateError::InvalidState { .. })));
    }

    #[test]
    fn test_soft_delete_skips_already_deleted() {
        let store = create_test_store();
        let role = ServiceRole::elevate();
        let (_, tickets) = active_batch(&store, &["shop-a", "shop-b"]);

        let ids = vec![tickets[0].id.clone(), "unknown".to_string()];
        assert_eq!(store.soft_delete_tickets(&ids, Utc::now(), &role).unwrap(), 1);
        assert_eq!(store.soft_delete_tickets(&ids, Utc::now(), &role).unwrap(), 0);

        let deleted = store.get_ticket(&tickets[0].id).unwrap().unwrap();
        assert!(deleted.deleted_at.is_some());

        let visible = store.count_tickets(&FateTicketFilter::new()).unwrap();
        assert_eq!(visible, 1);
        let all = store
            .count_tickets(&FateTicketFilter::new().including_deleted())
            .unwrap();
        assert_eq!(all, 2);
    }

    #[test]
    fn test_draw_in_position_order() {
        let store = create_test_store();
        let role = ServiceRole::elevate();
        let (_, tickets) = active_batch(&store, &["shop-a", "shop-b", "shop-a"]);

        let first = store
            .draw_next_ticket(fixtures::EVENT_DATE_ID, "alice", Utc::now(), &role)
            .unwrap()
            .unwrap();
        assert_eq!(first.id, tickets[0].id);
        assert!(first.is_drawn);
        assert_eq!(first.drawn_by.as_deref(), Some("alice"));

        store
            .soft_delete_tickets(&[tickets[1].id.clone()], Utc::now(), &role)
            .unwrap();

        let second = store
            .draw_next_ticket(fixtures::EVENT_DATE_ID, "bob", Utc::now(), &role)
            .unwrap()
            .unwrap();
        assert_eq!(second.id, tickets[2].id);

        let none = store
            .draw_next_ticket(fixtures::EVENT_DATE_ID, "carol", Utc::now(), &role)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_draw_ignores_pending_batches() {
        let store = create_test_store();
        let role = ServiceRole::elevate();
        let batch = store
            .create_batch(&NewFateBatch {
                event_id: fixtures::EVENT_ID.to_string(),
                event_date_id: fixtures::EVENT_DATE_ID.to_string(),
                batch_size: 1,
            })
            .unwrap();
        store
            .insert_tickets(&new_tickets(&batch, &["shop-a"]), &role)
            .unwrap();

        let drawn = store
            .draw_next_ticket(fixtures::EVENT_DATE_ID, "alice", Utc::now(), &role)
            .unwrap();
        assert!(drawn.is_none());
    }

    #[test]
    fn test_list_pagination_and_order() {
        let store = create_test_store();
        let (first_batch, _) = active_batch(&store, &["shop-a", "shop-b"]);
        let (second_batch, _) = active_batch(&store, &["shop-b", "shop-a", "shop-b"]);

        let filter = FateTicketFilter::new()
            .with_event(fixtures::EVENT_ID)
            .with_event_date(fixtures::EVENT_DATE_ID)
            .active_only();

        let all = store.list_tickets(&filter).unwrap();
        let keys: Vec<(&str, u32)> = all
            .iter()
            .map(|t| (t.batch_id.as_str(), t.fate_position.unwrap()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (first_batch.id.as_str(), 1),
                (first_batch.id.as_str(), 2),
                (second_batch.id.as_str(), 1),
                (second_batch.id.as_str(), 2),
                (second_batch.id.as_str(), 3),
            ]
        );

        let page = store
            .list_tickets(&filter.clone().with_limit(2).with_offset(2))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].batch_id, second_batch.id);

        assert_eq!(store.count_tickets(&filter).unwrap(), 5);
    }

    #[test]
    fn test_listing_hides_tickets_of_pending_batches() {
        let store = create_test_store();
        let role = ServiceRole::elevate();
        let batch = store
            .create_batch(&NewFateBatch {
                event_id: fixtures::EVENT_ID.to_string(),
                event_date_id: fixtures::EVENT_DATE_ID.to_string(),
                batch_size: 1,
            })
            .unwrap();
        let tickets = store
            .insert_tickets(&new_tickets(&batch, &["shop-a"]), &role)
            .unwrap();
        store
            .activate_tickets(&[(tickets[0].id.clone(), 1)], &role)
            .unwrap();

        let filter = FateTicketFilter::new()
            .with_event_date(fixtures::EVENT_DATE_ID)
            .active_only();
        assert!(store.list_tickets(&filter).unwrap().is_empty());
        assert_eq!(store.count_tickets(&filter).unwrap(), 0);

        // Without active_only the row is still there
        assert_eq!(store.count_tickets(&FateTicketFilter::new()).unwrap(), 1);

        store.activate_batch(&batch.id, Utc::now(), &role).unwrap();
        assert_eq!(store.list_tickets(&filter).unwrap().len(), 1);
        assert_eq!(store.count_tickets(&filter).unwrap(), 1);
    }

    #[test]
    fn test_listing_twice_returns_same_page() {
        let store = create_test_store();
        active_batch(&store, &["shop-a", "shop-b", "shop-a"]);
        active_batch(&store, &["shop-b", "shop-a"]);

        let filter = FateTicketFilter::new()
            .with_event_date(fixtures::EVENT_DATE_ID)
            .active_only()
            .with_limit(3)
            .with_offset(1);

        let ids = |tickets: Vec<FateTicket>| -> Vec<String> {
            tickets.into_iter().map(|t| t.id).collect()
        };
        let first = ids(store.list_tickets(&filter).unwrap());
        let second = ids(store.list_tickets(&filter).unwrap());
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("fate.db");

        let store = SqliteFateStore::new(&db_path).unwrap();
        fixtures::seed_catalog(&store, &["shop-a"]).unwrap();

        assert!(db_path.exists());
        drop(store);

        let reopened = SqliteFateStore::new(&db_path).unwrap();
        assert!(reopened.get_event(fixtures::EVENT_ID).unwrap().is_some());
    }
}
