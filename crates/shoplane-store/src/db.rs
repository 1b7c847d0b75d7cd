//! SQLite-backed store for the automation engine.
//!
//! Column conventions follow the rest of the platform: TEXT primary keys,
//! RFC3339 UTC timestamps, JSON blobs for opaque config. WAL mode so the
//! gateway and overlapping cron ticks can read and write concurrently.
//!
//! The claim step (`scheduled → running`) and the cart reminder claim are
//! single conditional UPDATEs; counter updates are increment-style, never
//! read-modify-write in application code.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use shoplane_core::error::{Result, ShoplaneError};
use shoplane_core::traits::AutomationStore;
use shoplane_core::types::{
    AbandonedCart, AutomationRecord, AutomationRun, RunStatus, TriggerData, MAX_CART_REMINDERS,
};

/// SQLite store. `Connection` is not Sync, so it lives behind a mutex;
/// statements are short enough that contention is a non-issue at cron-tick
/// rates.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn store_err(e: rusqlite::Error) -> ShoplaneError {
    ShoplaneError::Store(e.to_string())
}

/// Fixed-width RFC3339 so TEXT comparisons in SQL order correctly.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A malformed stored timestamp is a corrupted row; surface it as a
/// conversion error rather than inventing a value.
fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

/// Shared SELECT column lists — single source of truth per table.
const AUTOMATION_SELECT: &str = "SELECT id, store_id, trigger_type, trigger_conditions, \
     action_type, action_config, delay_minutes, is_active, total_runs, total_successes, \
     total_failures, last_run_at, created_at FROM automations";

const RUN_SELECT: &str = "SELECT id, automation_id, store_id, trigger_data, resource_id, \
     resource_type, status, scheduled_for, started_at, completed_at, result, error, created_at \
     FROM automation_runs";

const CART_SELECT: &str = "SELECT id, store_id, email, items, subtotal, recovery_token, \
     created_at, recovered_at, reminder_sent_at, reminder_count FROM abandoned_carts";

fn row_to_automation(row: &rusqlite::Row) -> rusqlite::Result<AutomationRecord> {
    let conditions: String = row.get(3)?;
    let config: String = row.get(5)?;
    Ok(AutomationRecord {
        id: row.get(0)?,
        store_id: row.get(1)?,
        trigger_type: row.get(2)?,
        trigger_conditions: serde_json::from_str(&conditions).unwrap_or_default(),
        action_type: row.get(4)?,
        action_config: serde_json::from_str(&config).unwrap_or_default(),
        delay_minutes: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        total_runs: row.get::<_, i64>(8)? as u64,
        total_successes: row.get::<_, i64>(9)? as u64,
        total_failures: row.get::<_, i64>(10)? as u64,
        last_run_at: opt_ts(11, row.get(11)?)?,
        created_at: parse_ts(12, &row.get::<_, String>(12)?)?,
    })
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<AutomationRun> {
    let trigger_data: String = row.get(3)?;
    let status: String = row.get(6)?;
    let result: Option<String> = row.get(10)?;
    Ok(AutomationRun {
        id: row.get(0)?,
        automation_id: row.get(1)?,
        store_id: row.get(2)?,
        trigger_data: serde_json::from_str::<TriggerData>(&trigger_data).unwrap_or_default(),
        resource_id: row.get(4)?,
        resource_type: row.get(5)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Scheduled),
        scheduled_for: parse_ts(7, &row.get::<_, String>(7)?)?,
        started_at: opt_ts(8, row.get(8)?)?,
        completed_at: opt_ts(9, row.get(9)?)?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get(11)?,
        created_at: parse_ts(12, &row.get::<_, String>(12)?)?,
    })
}

fn row_to_cart(row: &rusqlite::Row) -> rusqlite::Result<AbandonedCart> {
    let items: String = row.get(3)?;
    Ok(AbandonedCart {
        id: row.get(0)?,
        store_id: row.get(1)?,
        email: row.get(2)?,
        items: serde_json::from_str(&items).unwrap_or_default(),
        subtotal: row.get(4)?,
        recovery_token: row.get(5)?,
        created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        recovered_at: opt_ts(7, row.get(7)?)?,
        reminder_sent_at: opt_ts(8, row.get(8)?)?,
        reminder_count: row.get::<_, i64>(9)? as u32,
    })
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).map_err(store_err)?;
        // WAL so overlapping ticks and the gateway don't hit "database is locked"
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("💾 Store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            -- Rule Store: automation definitions + running statistics
            CREATE TABLE IF NOT EXISTS automations (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,       -- 'order.paid', 'cart.abandoned', ...
                trigger_conditions TEXT NOT NULL DEFAULT '{}',
                action_type TEXT NOT NULL,        -- 'send_email', 'webhook_call', ...
                action_config TEXT NOT NULL DEFAULT '{}',
                delay_minutes INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                total_runs INTEGER NOT NULL DEFAULT 0,
                total_successes INTEGER NOT NULL DEFAULT 0,
                total_failures INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_automations_trigger
                ON automations(trigger_type, is_active);

            -- Run Ledger: one row per attempted/scheduled execution
            CREATE TABLE IF NOT EXISTS automation_runs (
                id TEXT PRIMARY KEY,
                automation_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                trigger_data TEXT NOT NULL DEFAULT '{}',
                resource_id TEXT,
                resource_type TEXT,
                status TEXT NOT NULL DEFAULT 'scheduled',
                scheduled_for TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_due
                ON automation_runs(status, scheduled_for);

            CREATE TABLE IF NOT EXISTS abandoned_carts (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                email TEXT,
                items TEXT NOT NULL DEFAULT '[]',
                subtotal REAL NOT NULL DEFAULT 0,
                recovery_token TEXT NOT NULL,
                created_at TEXT NOT NULL,
                recovered_at TEXT,
                reminder_sent_at TEXT,
                reminder_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_carts_scan
                ON abandoned_carts(store_id, recovered_at, created_at);

            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                email TEXT,
                marketing_consent INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS customer_tags (
                customer_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                PRIMARY KEY (customer_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                fulfillment_status TEXT NOT NULL DEFAULT 'pending'
            );

            CREATE TABLE IF NOT EXISTS crm_tasks (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                customer_id TEXT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS crm_notes (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        ",
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ── Admin-side writes (used by the CRUD layer and tests) ──

    pub fn insert_automation(&self, a: &AutomationRecord) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO automations
                 (id, store_id, trigger_type, trigger_conditions, action_type, action_config,
                  delay_minutes, is_active, total_runs, total_successes, total_failures,
                  last_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    a.id,
                    a.store_id,
                    a.trigger_type,
                    a.trigger_conditions.to_string(),
                    a.action_type,
                    a.action_config.to_string(),
                    a.delay_minutes,
                    a.is_active as i64,
                    a.total_runs as i64,
                    a.total_successes as i64,
                    a.total_failures as i64,
                    a.last_run_at.map(ts),
                    ts(a.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn set_automation_active(&self, id: &str, active: bool) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automations SET is_active = ?1 WHERE id = ?2",
                params![active as i64, id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn delete_automation(&self, id: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM automations WHERE id = ?1", [id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_cart(&self, cart: &AbandonedCart) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO abandoned_carts
                 (id, store_id, email, items, subtotal, recovery_token, created_at,
                  recovered_at, reminder_sent_at, reminder_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    cart.id,
                    cart.store_id,
                    cart.email,
                    cart.items.to_string(),
                    cart.subtotal,
                    cart.recovery_token,
                    ts(cart.created_at),
                    cart.recovered_at.map(ts),
                    cart.reminder_sent_at.map(ts),
                    cart.reminder_count as i64,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn cart(&self, id: &str) -> Result<Option<AbandonedCart>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{CART_SELECT} WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query_map([id], row_to_cart).map_err(store_err)?;
        rows.next().transpose().map_err(store_err)
    }

    pub fn insert_customer(
        &self,
        id: &str,
        store_id: &str,
        email: Option<&str>,
        marketing_consent: bool,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO customers (id, store_id, email, marketing_consent)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, store_id, email, marketing_consent as i64],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn customer_tags(&self, customer_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT tag_id FROM customer_tags WHERE customer_id = ?1 ORDER BY tag_id")
            .map_err(store_err)?;
        let tags = stmt
            .query_map([customer_id], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(tags)
    }

    pub fn marketing_consent(&self, customer_id: &str) -> Result<Option<bool>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT marketing_consent FROM customers WHERE id = ?1",
            [customer_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| Some(v != 0))
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(store_err(other)),
        })
    }

    pub fn insert_order(&self, id: &str, store_id: &str, fulfillment_status: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO orders (id, store_id, fulfillment_status) VALUES (?1, ?2, ?3)",
                params![id, store_id, fulfillment_status],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn order_status(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT fulfillment_status FROM orders WHERE id = ?1",
            [id],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(store_err(other)),
        })
    }

    pub fn crm_note_count(&self, store_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM crm_notes WHERE store_id = ?1",
            [store_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u32)
        .map_err(store_err)
    }

    pub fn crm_task_count(&self, store_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM crm_tasks WHERE store_id = ?1",
            [store_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u32)
        .map_err(store_err)
    }

    /// Runs in a given status, newest first. Used by the admin run-history
    /// view and by tests.
    pub fn runs_with_status(&self, status: RunStatus) -> Result<Vec<AutomationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{RUN_SELECT} WHERE status = ?1 ORDER BY created_at DESC"
            ))
            .map_err(store_err)?;
        let runs = stmt
            .query_map([status.as_str()], row_to_run)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(runs)
    }
}

impl AutomationStore for SqliteStore {
    fn automation(&self, id: &str) -> Result<Option<AutomationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{AUTOMATION_SELECT} WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt
            .query_map([id], row_to_automation)
            .map_err(store_err)?;
        rows.next().transpose().map_err(store_err)
    }

    fn active_cart_automations(&self) -> Result<Vec<AutomationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{AUTOMATION_SELECT} WHERE trigger_type = 'cart.abandoned' AND is_active = 1
                 ORDER BY store_id"
            ))
            .map_err(store_err)?;
        let records = stmt
            .query_map([], row_to_automation)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(records)
    }

    fn record_run_outcome(
        &self,
        automation_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sql = if success {
            "UPDATE automations SET total_runs = total_runs + 1,
                 total_successes = total_successes + 1, last_run_at = ?1 WHERE id = ?2"
        } else {
            "UPDATE automations SET total_runs = total_runs + 1,
                 total_failures = total_failures + 1, last_run_at = ?1 WHERE id = ?2"
        };
        self.conn
            .lock()
            .unwrap()
            .execute(sql, params![ts(now), automation_id])
            .map_err(store_err)?;
        Ok(())
    }

    fn insert_run(&self, run: &AutomationRun) -> Result<()> {
        let trigger_data = serde_json::to_string(&run.trigger_data)
            .map_err(|e| ShoplaneError::Store(format!("serialize trigger data: {e}")))?;
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO automation_runs
                 (id, automation_id, store_id, trigger_data, resource_id, resource_type,
                  status, scheduled_for, started_at, completed_at, result, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run.id,
                    run.automation_id,
                    run.store_id,
                    trigger_data,
                    run.resource_id,
                    run.resource_type,
                    run.status.as_str(),
                    ts(run.scheduled_for),
                    run.started_at.map(ts),
                    run.completed_at.map(ts),
                    run.result.as_ref().map(|r| r.to_string()),
                    run.error,
                    ts(run.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn run(&self, id: &str) -> Result<Option<AutomationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{RUN_SELECT} WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query_map([id], row_to_run).map_err(store_err)?;
        rows.next().transpose().map_err(store_err)
    }

    fn due_runs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AutomationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{RUN_SELECT} WHERE status = 'scheduled' AND scheduled_for <= ?1
                 ORDER BY scheduled_for LIMIT ?2"
            ))
            .map_err(store_err)?;
        let runs = stmt
            .query_map(params![ts(now), limit as i64], row_to_run)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(runs)
    }

    fn claim_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automation_runs SET status = 'running', started_at = ?1
                 WHERE id = ?2 AND status = 'scheduled'",
                params![ts(now), run_id],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }

    fn cancel_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automation_runs SET status = 'cancelled', completed_at = ?1
                 WHERE id = ?2 AND status = 'scheduled'",
                params![ts(now), run_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn complete_run(
        &self,
        run_id: &str,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automation_runs SET status = 'completed', completed_at = ?1, result = ?2
                 WHERE id = ?3 AND status = 'running'",
                params![ts(now), result.to_string(), run_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn fail_run(&self, run_id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automation_runs SET status = 'failed', completed_at = ?1, error = ?2
                 WHERE id = ?3 AND status = 'running'",
                params![ts(now), error, run_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn reclaim_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE automation_runs SET status = 'scheduled', started_at = NULL
                 WHERE status = 'running' AND started_at IS NOT NULL AND started_at <= ?1",
                params![ts(cutoff)],
            )
            .map_err(store_err)?;
        Ok(changed)
    }

    fn eligible_carts(
        &self,
        store_id: &str,
        created_before: DateTime<Utc>,
        resend_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AbandonedCart>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{CART_SELECT} WHERE store_id = ?1
                   AND recovered_at IS NULL
                   AND email IS NOT NULL
                   AND created_at <= ?2
                   AND reminder_count < ?3
                   AND (reminder_sent_at IS NULL OR reminder_sent_at <= ?4)
                 ORDER BY created_at LIMIT ?5"
            ))
            .map_err(store_err)?;
        let carts = stmt
            .query_map(
                params![
                    store_id,
                    ts(created_before),
                    MAX_CART_REMINDERS as i64,
                    ts(resend_before),
                    limit as i64
                ],
                row_to_cart,
            )
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(carts)
    }

    fn claim_cart_reminder(
        &self,
        cart_id: &str,
        observed_sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // `IS` gives NULL-safe equality, so the CAS also covers the
        // never-reminded case.
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE abandoned_carts SET reminder_sent_at = ?1
                 WHERE id = ?2 AND reminder_sent_at IS ?3",
                params![ts(now), cart_id, observed_sent_at.map(ts)],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }

    fn release_cart_reminder(
        &self,
        cart_id: &str,
        previous_sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE abandoned_carts SET reminder_sent_at = ?1 WHERE id = ?2",
                params![previous_sent_at.map(ts), cart_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn confirm_cart_reminder(&self, cart_id: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE abandoned_carts SET reminder_count = reminder_count + 1 WHERE id = ?1",
                [cart_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn set_order_status(&self, store_id: &str, order_id: &str, status: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE orders SET fulfillment_status = ?1 WHERE id = ?2 AND store_id = ?3",
                params![status, order_id, store_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn customer_exists(&self, store_id: &str, customer_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM customers WHERE id = ?1 AND store_id = ?2",
            params![customer_id, store_id],
            |_| Ok(()),
        )
        .map(|_| true)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            other => Err(store_err(other)),
        })
    }

    fn add_customer_tag(&self, _store_id: &str, customer_id: &str, tag_id: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR IGNORE INTO customer_tags (customer_id, tag_id) VALUES (?1, ?2)",
                params![customer_id, tag_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn remove_customer_tag(&self, _store_id: &str, customer_id: &str, tag_id: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM customer_tags WHERE customer_id = ?1 AND tag_id = ?2",
                params![customer_id, tag_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn set_marketing_consent(
        &self,
        store_id: &str,
        customer_id: &str,
        consent: bool,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE customers SET marketing_consent = ?1 WHERE id = ?2 AND store_id = ?3",
                params![consent as i64, customer_id, store_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn create_crm_task(
        &self,
        store_id: &str,
        customer_id: Option<&str>,
        title: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO crm_tasks (id, store_id, customer_id, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, store_id, customer_id, title, ts(Utc::now())],
            )
            .map_err(store_err)?;
        Ok(id)
    }

    fn create_crm_note(&self, store_id: &str, customer_id: &str, content: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO crm_notes (id, store_id, customer_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, store_id, customer_id, content, ts(Utc::now())],
            )
            .map_err(store_err)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn automation(id: &str, store_id: &str) -> AutomationRecord {
        AutomationRecord {
            id: id.into(),
            store_id: store_id.into(),
            trigger_type: "order.paid".into(),
            trigger_conditions: json!({}),
            action_type: "send_email".into(),
            action_config: json!({"subject": "Thanks!", "body": "Your order is paid."}),
            delay_minutes: 0,
            is_active: true,
            total_runs: 0,
            total_successes: 0,
            total_failures: 0,
            last_run_at: None,
            created_at: Utc::now(),
        }
    }

    fn cart(id: &str, store_id: &str, age_hours: i64) -> AbandonedCart {
        AbandonedCart {
            id: id.into(),
            store_id: store_id.into(),
            email: Some("shopper@example.com".into()),
            items: json!([{"name": "Mug", "quantity": 2}]),
            subtotal: 100.0,
            recovery_token: format!("tok-{id}"),
            created_at: Utc::now() - Duration::hours(age_hours),
            recovered_at: None,
            reminder_sent_at: None,
            reminder_count: 0,
        }
    }

    #[test]
    fn test_automation_roundtrip() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_automation(&automation("a1", "store-1")).unwrap();

        let loaded = db.automation("a1").unwrap().unwrap();
        assert_eq!(loaded.store_id, "store-1");
        assert_eq!(loaded.action_config["subject"], "Thanks!");
        assert!(db.automation("nope").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_automation(&automation("a1", "s1")).unwrap();
        let run =
            AutomationRun::scheduled("a1", "s1", TriggerData::default(), Utc::now());
        db.insert_run(&run).unwrap();

        let now = Utc::now();
        assert!(db.claim_run(&run.id, now).unwrap());
        // second claim loses the race
        assert!(!db.claim_run(&run.id, now).unwrap());

        let loaded = db.run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.started_at.is_some());
    }

    #[test]
    fn test_terminal_states_never_regress() {
        let db = SqliteStore::open_in_memory().unwrap();
        let run = AutomationRun::scheduled("a1", "s1", TriggerData::default(), Utc::now());
        db.insert_run(&run).unwrap();
        let now = Utc::now();

        db.claim_run(&run.id, now).unwrap();
        db.complete_run(&run.id, &json!({"emailSent": true}), now)
            .unwrap();

        // a completed run ignores further writes
        db.fail_run(&run.id, "late failure", now).unwrap();
        db.cancel_run(&run.id, now).unwrap();
        assert!(!db.claim_run(&run.id, now).unwrap());

        let loaded = db.run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert!(loaded.error.is_none());
    }

    #[test]
    fn test_due_runs_filter_and_order() {
        let db = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut past1 = AutomationRun::scheduled("a", "s", TriggerData::default(), now);
        past1.scheduled_for = now - Duration::minutes(5);
        let mut past2 = AutomationRun::scheduled("a", "s", TriggerData::default(), now);
        past2.scheduled_for = now - Duration::minutes(30);
        let mut future = AutomationRun::scheduled("a", "s", TriggerData::default(), now);
        future.scheduled_for = now + Duration::minutes(10);
        for r in [&past1, &past2, &future] {
            db.insert_run(r).unwrap();
        }

        let due = db.due_runs(now, 100).unwrap();
        assert_eq!(due.len(), 2);
        // oldest first
        assert_eq!(due[0].id, past2.id);
        assert_eq!(due[1].id, past1.id);

        let capped = db.due_runs(now, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_counter_invariant_after_outcomes() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_automation(&automation("a1", "s1")).unwrap();
        let now = Utc::now();

        db.record_run_outcome("a1", true, now).unwrap();
        db.record_run_outcome("a1", false, now).unwrap();
        db.record_run_outcome("a1", true, now).unwrap();

        let a = db.automation("a1").unwrap().unwrap();
        assert_eq!(a.total_runs, 3);
        assert_eq!(a.total_successes, 2);
        assert_eq!(a.total_failures, 1);
        assert_eq!(a.total_runs, a.total_successes + a.total_failures);
        assert!(a.last_run_at.is_some());
    }

    #[test]
    fn test_reclaim_stale_runs() {
        let db = SqliteStore::open_in_memory().unwrap();
        let run = AutomationRun::scheduled("a1", "s1", TriggerData::default(), Utc::now());
        db.insert_run(&run).unwrap();

        let claimed_at = Utc::now() - Duration::minutes(30);
        db.claim_run(&run.id, claimed_at).unwrap();

        // nothing younger than the cutoff is touched
        assert_eq!(
            db.reclaim_stale_runs(Utc::now() - Duration::hours(1)).unwrap(),
            0
        );
        assert_eq!(
            db.reclaim_stale_runs(Utc::now() - Duration::minutes(15)).unwrap(),
            1
        );
        let loaded = db.run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Scheduled);
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn test_eligible_carts_rate_limits() {
        let db = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();

        // eligible: 2h old, never reminded
        db.insert_cart(&cart("c-ok", "s1", 2)).unwrap();
        // too fresh
        db.insert_cart(&cart("c-fresh", "s1", 0)).unwrap();
        // recovered
        let mut recovered = cart("c-rec", "s1", 2);
        recovered.recovered_at = Some(now);
        db.insert_cart(&recovered).unwrap();
        // no email
        let mut anon = cart("c-anon", "s1", 2);
        anon.email = None;
        db.insert_cart(&anon).unwrap();
        // reminder cap reached
        let mut capped = cart("c-cap", "s1", 48);
        capped.reminder_count = MAX_CART_REMINDERS;
        db.insert_cart(&capped).unwrap();
        // reminded 10h ago — inside the 24h floor
        let mut recent = cart("c-recent", "s1", 48);
        recent.reminder_sent_at = Some(now - Duration::hours(10));
        recent.reminder_count = 1;
        db.insert_cart(&recent).unwrap();
        // reminded 25h ago — eligible again
        let mut old_reminder = cart("c-old", "s1", 48);
        old_reminder.reminder_sent_at = Some(now - Duration::hours(25));
        old_reminder.reminder_count = 1;
        db.insert_cart(&old_reminder).unwrap();
        // other store
        db.insert_cart(&cart("c-other", "s2", 2)).unwrap();

        let eligible = db
            .eligible_carts(
                "s1",
                now - Duration::minutes(60),
                now - Duration::hours(24),
                50,
            )
            .unwrap();
        let ids: Vec<&str> = eligible.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-old", "c-ok"]);
    }

    #[test]
    fn test_cart_claim_cas() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_cart(&cart("c1", "s1", 2)).unwrap();
        let now = Utc::now();

        assert!(db.claim_cart_reminder("c1", None, now).unwrap());
        // racing tick that observed the same NULL loses
        assert!(!db.claim_cart_reminder("c1", None, now).unwrap());

        // failed send: roll the claim back, count untouched
        db.release_cart_reminder("c1", None).unwrap();
        let c = db.cart("c1").unwrap().unwrap();
        assert!(c.reminder_sent_at.is_none());
        assert_eq!(c.reminder_count, 0);

        // successful send: claim then confirm
        assert!(db.claim_cart_reminder("c1", None, now).unwrap());
        db.confirm_cart_reminder("c1").unwrap();
        let c = db.cart("c1").unwrap().unwrap();
        assert!(c.reminder_sent_at.is_some());
        assert_eq!(c.reminder_count, 1);
    }

    #[test]
    fn test_tag_mutation_idempotent() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_customer("cust-1", "s1", Some("a@b.c"), false)
            .unwrap();

        db.add_customer_tag("s1", "cust-1", "vip").unwrap();
        db.add_customer_tag("s1", "cust-1", "vip").unwrap();
        assert_eq!(db.customer_tags("cust-1").unwrap(), vec!["vip"]);

        db.remove_customer_tag("s1", "cust-1", "vip").unwrap();
        db.remove_customer_tag("s1", "cust-1", "vip").unwrap();
        assert!(db.customer_tags("cust-1").unwrap().is_empty());
    }

    #[test]
    fn test_order_update_is_tenant_scoped() {
        let db = SqliteStore::open_in_memory().unwrap();
        db.insert_order("ord-1", "s1", "pending").unwrap();

        // wrong store cannot touch the order
        db.set_order_status("s2", "ord-1", "shipped").unwrap();
        assert_eq!(db.order_status("ord-1").unwrap().unwrap(), "pending");

        db.set_order_status("s1", "ord-1", "shipped").unwrap();
        assert_eq!(db.order_status("ord-1").unwrap().unwrap(), "shipped");
    }

    #[test]
    fn test_run_trigger_data_roundtrip() {
        let db = SqliteStore::open_in_memory().unwrap();
        let data: TriggerData = serde_json::from_value(json!({
            "customerEmail": "x@y.z",
            "subtotal": 42.5,
            "couponCode": "SAVE10"
        }))
        .unwrap();
        let run = AutomationRun::scheduled("a1", "s1", data.clone(), Utc::now());
        db.insert_run(&run).unwrap();

        let loaded = db.run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.trigger_data, data);
    }

    #[test]
    fn test_corrupted_timestamp_is_an_error() {
        let db = SqliteStore::open_in_memory().unwrap();
        let run = AutomationRun::scheduled("a1", "s1", TriggerData::default(), Utc::now());
        db.insert_run(&run).unwrap();

        db.conn
            .lock()
            .unwrap()
            .execute(
                // sorts before any real timestamp but fails RFC3339 parsing
                "UPDATE automation_runs SET scheduled_for = '2020-13-45T99:99:99.000000Z'
                 WHERE id = ?1",
                [&run.id],
            )
            .unwrap();

        // a corrupted row surfaces as a store error, never a made-up time
        assert!(db.run(&run.id).is_err());
        assert!(db.due_runs(Utc::now() + Duration::hours(1), 10).is_err());
    }
}
