use std::path::Path;
use std::str::FromStr;

use rastreo_protocol::ids::{CancellationRequestId, CustomerId, OrderId};
use rastreo_protocol::order::{CancellationRequest, CancellationState, Order, OrderStatus};
use rastreo_protocol::tracking::{TrackingEvent, TrackingFields, TrackingSnapshot, TrackingState};
use rastreo_protocol::wire::RoomEvent;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::types::{NewOrder, OutboxEntry};

const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Orders, tracking state, append-only tracking history, the cancellation
/// queue, and the broadcast outbox, all in one SQLite database.
///
/// Every mutating operation commits its outbox row in the same transaction
/// as the domain change, so a persisted mutation always has a pending
/// broadcast or an already-dispatched one, never a silently lost notify.
pub struct TrackingStore {
    conn: Connection,
}

impl TrackingStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(persistence)?;
        let mut store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        let mut store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> StoreResult<u32> {
        self.current_schema_version()
    }

    // ---- orders ----

    pub fn create_order(&mut self, new_order: NewOrder) -> StoreResult<Order> {
        let now = OffsetDateTime::now_utc();
        let now_text = format_ts(now)?;
        let inserted = self
            .conn
            .execute(
                "
                INSERT OR IGNORE INTO orders (order_id, customer_id, status, notes, created_at, updated_at)
                VALUES (?1, ?2, ?3, NULL, ?4, ?4)
                ",
                params![
                    new_order.id.as_str(),
                    new_order.customer_id.as_str(),
                    OrderStatus::Pendiente.as_str(),
                    now_text,
                ],
            )
            .map_err(persistence)?;
        if inserted == 0 {
            return Err(StoreError::Conflict(format!(
                "order already exists: {}",
                new_order.id
            )));
        }

        Ok(Order {
            id: new_order.id,
            customer_id: new_order.customer_id,
            status: OrderStatus::Pendiente,
            notes: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_order(&self, order_id: &OrderId) -> StoreResult<Order> {
        self.conn
            .query_row(
                "
                SELECT order_id, customer_id, status, notes, created_at, updated_at
                FROM orders
                WHERE order_id = ?1
                ",
                params![order_id.as_str()],
                map_order_row,
            )
            .optional()
            .map_err(persistence)?
            .ok_or_else(|| StoreError::OrderNotFound(order_id.as_str().to_owned()))?
    }

    pub fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT order_id, customer_id, status, notes, created_at, updated_at
                FROM orders
                ORDER BY created_at ASC, order_id ASC
                ",
            )
            .map_err(persistence)?;
        let rows = stmt.query_map([], map_order_row).map_err(persistence)?;
        let mut orders = Vec::new();
        for row in rows {
            orders.push(row.map_err(persistence)??);
        }
        Ok(orders)
    }

    // ---- tracking ----

    pub fn tracking_snapshot(&self, order_id: &OrderId) -> StoreResult<TrackingSnapshot> {
        let order = self.get_order(order_id)?;
        let seguimiento = load_tracking(&self.conn, order_id)?;
        Ok(TrackingSnapshot {
            pedido_id: order.id,
            estado_pedido: order.status,
            seguimiento,
        })
    }

    /// Updates the order status (and note), enqueueing a `trackingUpdated`
    /// broadcast carrying the new status, all in one transaction.
    pub fn update_status(
        &mut self,
        order_id: &OrderId,
        new_status: OrderStatus,
        notes: Option<&str>,
    ) -> StoreResult<OutboxEntry> {
        let now = OffsetDateTime::now_utc();
        let now_text = format_ts(now)?;
        let tx = self.conn.transaction().map_err(persistence)?;

        let changed = match notes {
            Some(notes) => tx
                .execute(
                    "UPDATE orders SET status = ?1, notes = ?2, updated_at = ?3 WHERE order_id = ?4",
                    params![new_status.as_str(), notes, now_text, order_id.as_str()],
                )
                .map_err(persistence)?,
            None => tx
                .execute(
                    "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3",
                    params![new_status.as_str(), now_text, order_id.as_str()],
                )
                .map_err(persistence)?,
        };
        if changed == 0 {
            return Err(StoreError::OrderNotFound(order_id.as_str().to_owned()));
        }

        let seguimiento = load_tracking(&tx, order_id)?;
        let event = RoomEvent::TrackingUpdated {
            seguimiento,
            estado_pedido: Some(new_status),
        };
        let entry = insert_outbox(&tx, order_id, &event, now)?;
        tx.commit().map_err(persistence)?;
        Ok(entry)
    }

    /// Sets or replaces the carrier fields. History is untouched; the
    /// enqueued broadcast is a full-state `trackingUpdated` without a status
    /// piggyback (the order status did not change).
    pub fn update_tracking(
        &mut self,
        order_id: &OrderId,
        fields: &TrackingFields,
    ) -> StoreResult<OutboxEntry> {
        let now = OffsetDateTime::now_utc();
        let tx = self.conn.transaction().map_err(persistence)?;
        require_order(&tx, order_id)?;

        let estimated = fields
            .estimated_delivery
            .map(format_ts)
            .transpose()?;
        tx.execute(
            "
            INSERT INTO tracking (order_id, tracking_number, carrier, tracking_url, estimated_delivery)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(order_id) DO UPDATE SET
                tracking_number = excluded.tracking_number,
                carrier = excluded.carrier,
                tracking_url = excluded.tracking_url,
                estimated_delivery = excluded.estimated_delivery
            ",
            params![
                order_id.as_str(),
                fields.tracking_number,
                fields.carrier,
                fields.tracking_url,
                estimated,
            ],
        )
        .map_err(persistence)?;

        let seguimiento = load_tracking(&tx, order_id)?;
        let event = RoomEvent::TrackingUpdated {
            seguimiento,
            estado_pedido: None,
        };
        let entry = insert_outbox(&tx, order_id, &event, now)?;
        tx.commit().map_err(persistence)?;
        Ok(entry)
    }

    /// Appends one immutable history entry and enqueues a
    /// `trackingEventAdded` broadcast. The broadcast carries the full
    /// updated history; subscribers replace wholesale.
    pub fn append_tracking_event(
        &mut self,
        order_id: &OrderId,
        status_text: &str,
    ) -> StoreResult<OutboxEntry> {
        let now = OffsetDateTime::now_utc();
        let now_text = format_ts(now)?;
        let tx = self.conn.transaction().map_err(persistence)?;
        require_order(&tx, order_id)?;

        let has_tracking: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM tracking WHERE order_id = ?1",
                params![order_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(persistence)?;
        if has_tracking.is_none() {
            return Err(StoreError::TrackingNotInitialized(
                order_id.as_str().to_owned(),
            ));
        }

        tx.execute(
            "INSERT INTO tracking_events (order_id, status, occurred_at) VALUES (?1, ?2, ?3)",
            params![order_id.as_str(), status_text, now_text],
        )
        .map_err(persistence)?;

        let seguimiento = load_tracking(&tx, order_id)?.ok_or_else(|| {
            StoreError::TrackingNotInitialized(order_id.as_str().to_owned())
        })?;
        let event = RoomEvent::TrackingEventAdded { seguimiento };
        let entry = insert_outbox(&tx, order_id, &event, now)?;
        tx.commit().map_err(persistence)?;
        Ok(entry)
    }

    // ---- cancellation queue ----

    pub fn submit_cancellation(
        &mut self,
        order_id: &OrderId,
        reason: &str,
        requested_by: &str,
    ) -> StoreResult<CancellationRequest> {
        let now = OffsetDateTime::now_utc();
        let now_text = format_ts(now)?;
        let tx = self.conn.transaction().map_err(persistence)?;
        require_order(&tx, order_id)?;

        tx.execute(
            "
            INSERT INTO cancellation_requests (order_id, reason, requested_by, state, requested_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                order_id.as_str(),
                reason,
                requested_by,
                CancellationState::Pendiente.as_str(),
                now_text,
            ],
        )
        .map_err(persistence)?;
        let request_id = tx.last_insert_rowid();
        tx.commit().map_err(persistence)?;

        Ok(CancellationRequest {
            id: CancellationRequestId::new(request_id.to_string()),
            order_id: order_id.clone(),
            reason: reason.to_owned(),
            requested_by: requested_by.to_owned(),
            state: CancellationState::Pendiente,
            decided_by: None,
            decided_at: None,
            requested_at: now,
        })
    }

    pub fn list_cancellations(
        &self,
        state: Option<CancellationState>,
    ) -> StoreResult<Vec<CancellationRequest>> {
        let (sql, bind) = match state {
            Some(state) => (
                "
                SELECT request_id, order_id, reason, requested_by, state, decided_by, decided_at, requested_at
                FROM cancellation_requests
                WHERE state = ?1
                ORDER BY request_id ASC
                ",
                Some(state.as_str()),
            ),
            None => (
                "
                SELECT request_id, order_id, reason, requested_by, state, decided_by, decided_at, requested_at
                FROM cancellation_requests
                ORDER BY request_id ASC
                ",
                None,
            ),
        };

        let mut stmt = self.conn.prepare(sql).map_err(persistence)?;
        let mut requests = Vec::new();
        match bind {
            Some(value) => {
                let rows = stmt
                    .query_map(params![value], map_cancellation_row)
                    .map_err(persistence)?;
                for row in rows {
                    requests.push(row.map_err(persistence)??);
                }
            }
            None => {
                let rows = stmt
                    .query_map([], map_cancellation_row)
                    .map_err(persistence)?;
                for row in rows {
                    requests.push(row.map_err(persistence)??);
                }
            }
        }
        Ok(requests)
    }

    /// Records the admin decision. Approval also flips the order to
    /// `cancelado` and enqueues the broadcast, all in the same transaction;
    /// rejection only records the decision. Deciding twice is a conflict.
    pub fn decide_cancellation(
        &mut self,
        request_id: &CancellationRequestId,
        approve: bool,
        decided_by: &str,
    ) -> StoreResult<CancellationRequest> {
        let now = OffsetDateTime::now_utc();
        let now_text = format_ts(now)?;
        let tx = self.conn.transaction().map_err(persistence)?;

        let mut request = tx
            .query_row(
                "
                SELECT request_id, order_id, reason, requested_by, state, decided_by, decided_at, requested_at
                FROM cancellation_requests
                WHERE request_id = ?1
                ",
                params![request_id.as_str()],
                map_cancellation_row,
            )
            .optional()
            .map_err(persistence)?
            .ok_or_else(|| StoreError::RequestNotFound(request_id.as_str().to_owned()))??;

        if request.state.is_decided() {
            return Err(StoreError::Conflict(format!(
                "cancellation request already decided: {}",
                request_id
            )));
        }

        let new_state = if approve {
            CancellationState::Aprobada
        } else {
            CancellationState::Rechazada
        };
        tx.execute(
            "
            UPDATE cancellation_requests
            SET state = ?1, decided_by = ?2, decided_at = ?3
            WHERE request_id = ?4
            ",
            params![new_state.as_str(), decided_by, now_text, request_id.as_str()],
        )
        .map_err(persistence)?;

        if approve {
            let changed = tx
                .execute(
                    "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3",
                    params![
                        OrderStatus::Cancelado.as_str(),
                        now_text,
                        request.order_id.as_str()
                    ],
                )
                .map_err(persistence)?;
            if changed == 0 {
                return Err(StoreError::OrderNotFound(
                    request.order_id.as_str().to_owned(),
                ));
            }
            let seguimiento = load_tracking(&tx, &request.order_id)?;
            let event = RoomEvent::TrackingUpdated {
                seguimiento,
                estado_pedido: Some(OrderStatus::Cancelado),
            };
            insert_outbox(&tx, &request.order_id, &event, now)?;
        }

        tx.commit().map_err(persistence)?;

        request.state = new_state;
        request.decided_by = Some(decided_by.to_owned());
        request.decided_at = Some(now);
        Ok(request)
    }

    // ---- outbox ----

    /// Undispatched broadcasts, oldest first.
    pub fn undispatched(&self, limit: usize) -> StoreResult<Vec<OutboxEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT entry_id, order_id, payload, created_at, dispatched_at
                FROM outbox
                WHERE dispatched_at IS NULL
                ORDER BY entry_id ASC
                LIMIT ?1
                ",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map(params![limit], map_outbox_row)
            .map_err(persistence)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(persistence)??);
        }
        Ok(entries)
    }

    pub fn mark_dispatched(&mut self, entry_id: i64) -> StoreResult<()> {
        let now_text = format_ts(OffsetDateTime::now_utc())?;
        let changed = self
            .conn
            .execute(
                "UPDATE outbox SET dispatched_at = ?1 WHERE entry_id = ?2 AND dispatched_at IS NULL",
                params![now_text, entry_id],
            )
            .map_err(persistence)?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "outbox entry missing or already dispatched: {entry_id}"
            )));
        }
        Ok(())
    }

    // ---- schema ----

    fn bootstrap(&mut self) -> StoreResult<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(persistence)?;

        let current = self.current_schema_version()?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                supported: CURRENT_SCHEMA_VERSION,
                found: current,
            });
        }
        if current >= CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        let now_text = format_ts(OffsetDateTime::now_utc())?;
        let tx = self.conn.transaction().map_err(persistence)?;
        tx.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                status TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracking (
                order_id TEXT PRIMARY KEY,
                tracking_number TEXT NOT NULL,
                carrier TEXT NOT NULL,
                tracking_url TEXT,
                estimated_delivery TEXT,
                FOREIGN KEY(order_id) REFERENCES orders(order_id)
            );

            CREATE TABLE IF NOT EXISTS tracking_events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                status TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                FOREIGN KEY(order_id) REFERENCES orders(order_id)
            );

            CREATE TABLE IF NOT EXISTS cancellation_requests (
                request_id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                state TEXT NOT NULL,
                decided_by TEXT,
                decided_at TEXT,
                requested_at TEXT NOT NULL,
                FOREIGN KEY(order_id) REFERENCES orders(order_id)
            );

            CREATE TABLE IF NOT EXISTS outbox (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                dispatched_at TEXT
            );
            ",
        )
        .map_err(persistence)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![CURRENT_SCHEMA_VERSION, now_text],
        )
        .map_err(persistence)?;
        tx.commit().map_err(persistence)
    }

    fn current_schema_version(&self) -> StoreResult<u32> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(persistence)?;
        if exists.is_none() {
            return Ok(0);
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .map_err(persistence)
    }
}

fn persistence(err: impl ToString) -> StoreError {
    StoreError::Persistence(err.to_string())
}

fn format_ts(ts: OffsetDateTime) -> StoreResult<String> {
    ts.format(&Rfc3339)
        .map_err(|err| StoreError::Serialization(err.to_string()))
}

fn parse_ts(raw: &str) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| StoreError::InvalidStored(format!("timestamp '{raw}': {err}")))
}

fn require_order(conn: &Connection, order_id: &OrderId) -> StoreResult<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM orders WHERE order_id = ?1",
            params![order_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(persistence)?;
    if exists.is_none() {
        return Err(StoreError::OrderNotFound(order_id.as_str().to_owned()));
    }
    Ok(())
}

fn load_tracking(conn: &Connection, order_id: &OrderId) -> StoreResult<Option<TrackingState>> {
    let row: Option<(String, String, Option<String>, Option<String>)> = conn
        .query_row(
            "
            SELECT tracking_number, carrier, tracking_url, estimated_delivery
            FROM tracking
            WHERE order_id = ?1
            ",
            params![order_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(persistence)?;

    let Some((tracking_number, carrier, tracking_url, estimated_delivery)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "
            SELECT status, occurred_at
            FROM tracking_events
            WHERE order_id = ?1
            ORDER BY event_id ASC
            ",
        )
        .map_err(persistence)?;
    let rows = stmt
        .query_map(params![order_id.as_str()], |row| {
            let status: String = row.get(0)?;
            let occurred_at: String = row.get(1)?;
            Ok((status, occurred_at))
        })
        .map_err(persistence)?;

    let mut history = Vec::new();
    for row in rows {
        let (status, occurred_at) = row.map_err(persistence)?;
        history.push(TrackingEvent {
            status,
            timestamp: parse_ts(&occurred_at)?,
        });
    }

    Ok(Some(TrackingState {
        tracking_number,
        carrier,
        tracking_url,
        estimated_delivery: estimated_delivery.as_deref().map(parse_ts).transpose()?,
        history,
    }))
}

fn insert_outbox(
    conn: &Transaction<'_>,
    order_id: &OrderId,
    event: &RoomEvent,
    now: OffsetDateTime,
) -> StoreResult<OutboxEntry> {
    let payload =
        serde_json::to_string(event).map_err(|err| StoreError::Serialization(err.to_string()))?;
    let now_text = format_ts(now)?;
    conn.execute(
        "INSERT INTO outbox (order_id, payload, created_at) VALUES (?1, ?2, ?3)",
        params![order_id.as_str(), payload, now_text],
    )
    .map_err(persistence)?;
    Ok(OutboxEntry {
        entry_id: conn.last_insert_rowid(),
        order_id: order_id.clone(),
        event: event.clone(),
        created_at: now,
        dispatched_at: None,
    })
}

type OrderRow = StoreResult<Order>;

fn map_order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    let order_id: String = row.get(0)?;
    let customer_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let notes: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok((|| {
        Ok(Order {
            id: OrderId::new(order_id),
            customer_id: CustomerId::new(customer_id),
            status: OrderStatus::from_str(&status)
                .map_err(|err| StoreError::InvalidStored(err.to_string()))?,
            notes,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}

fn map_cancellation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreResult<CancellationRequest>> {
    let request_id: i64 = row.get(0)?;
    let order_id: String = row.get(1)?;
    let reason: String = row.get(2)?;
    let requested_by: String = row.get(3)?;
    let state: String = row.get(4)?;
    let decided_by: Option<String> = row.get(5)?;
    let decided_at: Option<String> = row.get(6)?;
    let requested_at: String = row.get(7)?;

    Ok((|| {
        Ok(CancellationRequest {
            id: CancellationRequestId::new(request_id.to_string()),
            order_id: OrderId::new(order_id),
            reason,
            requested_by,
            state: CancellationState::from_str(&state)
                .map_err(|err| StoreError::InvalidStored(err.to_string()))?,
            decided_by,
            decided_at: decided_at.as_deref().map(parse_ts).transpose()?,
            requested_at: parse_ts(&requested_at)?,
        })
    })())
}

fn map_outbox_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreResult<OutboxEntry>> {
    let entry_id: i64 = row.get(0)?;
    let order_id: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let dispatched_at: Option<String> = row.get(4)?;

    Ok((|| {
        Ok(OutboxEntry {
            entry_id,
            order_id: OrderId::new(order_id),
            event: serde_json::from_str(&payload)
                .map_err(|err| StoreError::InvalidStored(err.to_string()))?,
            created_at: parse_ts(&created_at)?,
            dispatched_at: dispatched_at.as_deref().map(parse_ts).transpose()?,
        })
    })())
}
