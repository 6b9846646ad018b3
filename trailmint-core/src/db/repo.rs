//! Local persistent state
//!
//! [`StateStore`] is the single owner of tracked activity. Every mutation is
//! one method call running one SQLite transaction under the connection
//! mutex, so "read, modify, write back" sequences issued by the tracker, the
//! fallback recorder and the batcher can never interleave.

use crate::capture::normalize_prompt;
use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Keys of the flat key/value namespace.
pub mod keys {
    pub const PAGES_VISITED: &str = "pagesVisited";
    pub const TIME_TRACKED: &str = "timeTracked";
    pub const WALLET_STATE: &str = "walletState";
    pub const TOKEN_BALANCE: &str = "tokenBalance";
}

/// Outcome of flushing session time into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Minutes added to `timeTracked`
    pub minutes: u32,
    /// Whether an entry for the URL was found and updated
    pub entry_updated: bool,
}

/// Handle to the local state database (single connection)
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind, so a poisoned guard is still usable.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Key/value helpers
    // ============================================

    fn get_kv<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_kv<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn add_to_counter(conn: &Connection, key: &str, amount: u64) -> Result<u64> {
        let current: u64 = Self::get_kv(conn, key)?.unwrap_or(0);
        let updated = current.saturating_add(amount);
        Self::set_kv(conn, key, &updated)?;
        Ok(updated)
    }

    // ============================================
    // Counters
    // ============================================

    /// Number of accepted navigation entries since the last reset
    pub fn pages_visited(&self) -> Result<u64> {
        let conn = self.conn();
        Ok(Self::get_kv(&conn, keys::PAGES_VISITED)?.unwrap_or(0))
    }

    /// Minutes accumulated from session flushes since the last reset
    pub fn time_tracked(&self) -> Result<u64> {
        let conn = self.conn();
        Ok(Self::get_kv(&conn, keys::TIME_TRACKED)?.unwrap_or(0))
    }

    // ============================================
    // Navigation log
    // ============================================

    /// Append an entry unless one for the same URL lies within `window_ms`
    /// of its timestamp. Accepted entries bump `pagesVisited`.
    ///
    /// Returns whether the entry was stored.
    pub fn append_navigation_entry(&self, entry: &NavigationEntry, window_ms: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if Self::has_entry_near(&tx, &entry.url, entry.timestamp, window_ms)? {
            tracing::debug!(
                url = %entry.url,
                event_type = %entry.event_type,
                "Dropping duplicate navigation entry"
            );
            return Ok(false);
        }

        tx.execute(
            r#"
            INSERT INTO navigation_entries (
                url, title, domain, timestamp_ms, visit_start_ms, event_type,
                time_spent, interactions, referrer, fallback, time_end_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entry.url,
                entry.title,
                entry.domain,
                entry.timestamp.timestamp_millis(),
                entry.visit_start.timestamp_millis(),
                entry.event_type.as_str(),
                entry.time_spent,
                entry.interactions,
                entry.referrer,
                entry.fallback,
                entry.time_end.map(|t| t.timestamp_millis()),
            ],
        )?;
        let pages = Self::add_to_counter(&tx, keys::PAGES_VISITED, 1)?;
        tx.commit()?;

        tracing::debug!(
            url = %entry.url,
            event_type = %entry.event_type,
            pages_visited = pages,
            "Recorded navigation entry"
        );
        Ok(true)
    }

    fn has_entry_near(
        conn: &Connection,
        url: &str,
        at: DateTime<Utc>,
        window_ms: i64,
    ) -> Result<bool> {
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM navigation_entries
                WHERE url = ?1 AND ABS(timestamp_ms - ?2) < ?3
            )
            "#,
            params![url, at.timestamp_millis(), window_ms],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Add `minutes` to `timeTracked` and rewrite the most recent entry for
    /// `url` with the session's time, interactions and end time.
    ///
    /// When no entry for `url` exists only the counter changes.
    pub fn flush_time_spent(
        &self,
        url: &str,
        minutes: u32,
        interactions: u32,
        time_end: DateTime<Utc>,
    ) -> Result<FlushOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        Self::add_to_counter(&tx, keys::TIME_TRACKED, u64::from(minutes))?;

        let latest: Option<i64> = tx
            .query_row(
                "SELECT id FROM navigation_entries WHERE url = ?1 ORDER BY id DESC LIMIT 1",
                [url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = latest {
            tx.execute(
                r#"
                UPDATE navigation_entries
                SET time_spent = ?1, interactions = ?2, time_end_ms = ?3
                WHERE id = ?4
                "#,
                params![minutes, interactions, time_end.timestamp_millis(), id],
            )?;
        }
        tx.commit()?;

        Ok(FlushOutcome {
            minutes,
            entry_updated: latest.is_some(),
        })
    }

    /// Navigation log in insertion order, optionally only the last `limit`
    pub fn navigation_entries(&self, limit: Option<usize>) -> Result<Vec<NavigationEntry>> {
        let conn = self.conn();
        Self::load_navigation_entries(&conn, limit)
    }

    fn load_navigation_entries(
        conn: &Connection,
        limit: Option<usize>,
    ) -> Result<Vec<NavigationEntry>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM (
                SELECT * FROM navigation_entries ORDER BY id DESC LIMIT ?1
            ) ORDER BY id ASC
            "#,
        )?;
        let entries = stmt
            .query_map([limit], Self::row_to_navigation_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn row_to_navigation_entry(row: &Row) -> rusqlite::Result<NavigationEntry> {
        let event_type: String = row.get("event_type")?;
        let time_end_ms: Option<i64> = row.get("time_end_ms")?;

        Ok(NavigationEntry {
            url: row.get("url")?,
            title: row.get("title")?,
            domain: row.get("domain")?,
            timestamp: from_millis(row.get("timestamp_ms")?),
            visit_start: from_millis(row.get("visit_start_ms")?),
            event_type: EventType::from(event_type),
            time_spent: row.get("time_spent")?,
            interactions: row.get("interactions")?,
            referrer: row.get("referrer")?,
            fallback: row.get("fallback")?,
            time_end: time_end_ms.map(from_millis),
        })
    }

    /// Number of entries in the navigation log
    pub fn count_navigation_entries(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM navigation_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    // ============================================
    // Captured prompts
    // ============================================

    /// Append a prompt unless it repeats a stored one (same normalized text,
    /// or within `window_ms` of a stored prompt's timestamp). Keeps at most
    /// `max_prompts`, evicting the oldest.
    ///
    /// Returns whether the prompt was stored.
    pub fn append_prompt(
        &self,
        prompt: &CapturedPrompt,
        window_ms: i64,
        max_prompts: usize,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let normalized = normalize_prompt(&prompt.prompt);
        let at = prompt.timestamp.timestamp_millis();
        let duplicate = {
            let mut stmt = tx.prepare("SELECT prompt, timestamp_ms FROM captured_prompts")?;
            let existing = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            existing.iter().any(|(text, ts)| {
                (ts - at).abs() < window_ms || normalize_prompt(text) == normalized
            })
        };

        if duplicate {
            tracing::debug!(
                conversation_id = %prompt.conversation_id,
                "Dropping duplicate prompt"
            );
            return Ok(false);
        }

        tx.execute(
            r#"
            INSERT INTO captured_prompts (
                kind, url, domain, prompt, timestamp_ms, conversation_id, prompt_length
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                prompt.kind,
                prompt.url,
                prompt.domain,
                prompt.prompt,
                at,
                prompt.conversation_id,
                prompt.prompt_length as i64,
            ],
        )?;

        let evicted = tx.execute(
            r#"
            DELETE FROM captured_prompts
            WHERE id NOT IN (
                SELECT id FROM captured_prompts ORDER BY id DESC LIMIT ?1
            )
            "#,
            [max_prompts as i64],
        )?;
        tx.commit()?;

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted oldest prompts");
        }
        Ok(true)
    }

    /// Captured prompts, oldest first
    pub fn prompts(&self) -> Result<Vec<CapturedPrompt>> {
        let conn = self.conn();
        Self::load_prompts(&conn)
    }

    fn load_prompts(conn: &Connection) -> Result<Vec<CapturedPrompt>> {
        let mut stmt = conn.prepare("SELECT * FROM captured_prompts ORDER BY id ASC")?;
        let prompts = stmt
            .query_map([], |row| {
                let length: i64 = row.get("prompt_length")?;
                Ok(CapturedPrompt {
                    kind: row.get("kind")?,
                    url: row.get("url")?,
                    domain: row.get("domain")?,
                    prompt: row.get("prompt")?,
                    timestamp: from_millis(row.get("timestamp_ms")?),
                    conversation_id: row.get("conversation_id")?,
                    prompt_length: length.max(0) as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prompts)
    }

    // ============================================
    // Wallet and balance
    // ============================================

    /// Persisted wallet state, disconnected when never saved
    pub fn wallet_state(&self) -> Result<WalletState> {
        let conn = self.conn();
        Ok(Self::get_kv(&conn, keys::WALLET_STATE)?.unwrap_or_default())
    }

    pub fn save_wallet_state(&self, state: &WalletState) -> Result<()> {
        let conn = self.conn();
        Self::set_kv(&conn, keys::WALLET_STATE, state)
    }

    /// Last balance fetched from the relay, as displayed
    pub fn token_balance(&self) -> Result<Option<String>> {
        let conn = self.conn();
        Self::get_kv(&conn, keys::TOKEN_BALANCE)
    }

    pub fn set_token_balance(&self, balance: &str) -> Result<()> {
        let conn = self.conn();
        Self::set_kv(&conn, keys::TOKEN_BALANCE, &balance)
    }

    // ============================================
    // Session events
    // ============================================

    /// Append a session event and prune everything older than `retention`
    pub fn record_session_event(
        &self,
        kind: &str,
        at: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO session_events (kind, timestamp_ms) VALUES (?1, ?2)",
            params![kind, at.timestamp_millis()],
        )?;
        let pruned = tx.execute(
            "DELETE FROM session_events WHERE timestamp_ms <= ?1",
            [(at - retention).timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(pruned)
    }

    /// Session events, oldest first
    pub fn session_events(&self) -> Result<Vec<SessionEvent>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT kind, timestamp_ms FROM session_events ORDER BY id ASC")?;
        let events = stmt
            .query_map([], |row| {
                Ok(SessionEvent {
                    kind: row.get(0)?,
                    timestamp: from_millis(row.get(1)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // ============================================
    // Batch operations
    // ============================================

    /// Consistent read of everything a submission carries
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        let conn = self.conn();
        Ok(StateSnapshot {
            pages_visited: Self::get_kv(&conn, keys::PAGES_VISITED)?.unwrap_or(0),
            time_tracked: Self::get_kv(&conn, keys::TIME_TRACKED)?.unwrap_or(0),
            navigation_data: Self::load_navigation_entries(&conn, None)?,
            chatgpt_prompts: Self::load_prompts(&conn)?,
        })
    }

    /// Clear the navigation log, the prompt log and both counters together
    pub fn reset_all(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM navigation_entries", [])?;
        tx.execute("DELETE FROM captured_prompts", [])?;
        Self::set_kv(&tx, keys::PAGES_VISITED, &0u64)?;
        Self::set_kv(&tx, keys::TIME_TRACKED, &0u64)?;
        tx.commit()?;
        tracing::info!("Local activity state reset");
        Ok(())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn at(ms: i64) -> DateTime<Utc> {
        from_millis(1_700_000_000_000 + ms)
    }

    fn entry(url: &str, ms: i64) -> NavigationEntry {
        NavigationEntry::for_page(&PageInfo::new(url), EventType::InitialLoad, at(ms), at(ms))
    }

    fn prompt(text: &str, ms: i64) -> CapturedPrompt {
        CapturedPrompt {
            kind: PROMPT_KIND.to_string(),
            url: "https://chatgpt.com/c/abc".to_string(),
            domain: "chatgpt.com".to_string(),
            prompt: text.to_string(),
            timestamp: at(ms),
            conversation_id: "abc".to_string(),
            prompt_length: text.len(),
        }
    }

    #[test]
    fn test_defaults_when_empty() {
        let store = store();
        assert_eq!(store.pages_visited().unwrap(), 0);
        assert_eq!(store.time_tracked().unwrap(), 0);
        assert_eq!(store.wallet_state().unwrap(), WalletState::default());
        assert!(store.token_balance().unwrap().is_none());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_append_dedups_within_window() {
        let store = store();
        assert!(store
            .append_navigation_entry(&entry("https://a.example/", 0), 5000)
            .unwrap());
        assert!(!store
            .append_navigation_entry(&entry("https://a.example/", 4999), 5000)
            .unwrap());
        // A different URL inside the window is fine
        assert!(store
            .append_navigation_entry(&entry("https://b.example/", 1000), 5000)
            .unwrap());
        // Same URL exactly at the window edge is a new visit
        assert!(store
            .append_navigation_entry(&entry("https://a.example/", 5000), 5000)
            .unwrap());

        assert_eq!(store.pages_visited().unwrap(), 3);
        assert_eq!(store.count_navigation_entries().unwrap(), 3);
    }

    #[test]
    fn test_flush_updates_latest_matching_entry() {
        let store = store();
        store
            .append_navigation_entry(&entry("https://a.example/", 0), 5000)
            .unwrap();
        store
            .append_navigation_entry(&entry("https://a.example/", 60_000), 5000)
            .unwrap();

        let outcome = store
            .flush_time_spent("https://a.example/", 3, 7, at(240_000))
            .unwrap();
        assert!(outcome.entry_updated);
        assert_eq!(store.time_tracked().unwrap(), 3);

        let entries = store.navigation_entries(None).unwrap();
        assert_eq!(entries[0].time_spent, 0);
        assert_eq!(entries[1].time_spent, 3);
        assert_eq!(entries[1].interactions, 7);
        assert_eq!(entries[1].time_end, Some(at(240_000)));
    }

    #[test]
    fn test_flush_without_entry_only_counts() {
        let store = store();
        let outcome = store
            .flush_time_spent("https://missing.example/", 2, 0, at(0))
            .unwrap();
        assert!(!outcome.entry_updated);
        assert_eq!(store.time_tracked().unwrap(), 2);
        assert_eq!(store.count_navigation_entries().unwrap(), 0);
    }

    #[test]
    fn test_navigation_entries_limit_keeps_most_recent() {
        let store = store();
        for i in 0..5 {
            store
                .append_navigation_entry(&entry(&format!("https://{}.example/", i), i), 5000)
                .unwrap();
        }
        let last_two = store.navigation_entries(Some(2)).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].url, "https://3.example/");
        assert_eq!(last_two[1].url, "https://4.example/");
    }

    #[test]
    fn test_prompt_dedup_and_cap() {
        let store = store();
        assert!(store
            .append_prompt(&prompt("How do I sort a list?", 0), 2000, 3)
            .unwrap());
        // Too close in time
        assert!(!store
            .append_prompt(&prompt("Something else entirely", 1500), 2000, 3)
            .unwrap());
        // Same text modulo whitespace
        assert!(!store
            .append_prompt(&prompt("How do I  sort a list?", 60_000), 2000, 3)
            .unwrap());

        for (i, text) in ["second prompt", "third prompt", "fourth prompt"]
            .iter()
            .enumerate()
        {
            let ms = 10_000 * (i as i64 + 1);
            assert!(store.append_prompt(&prompt(text, ms), 2000, 3).unwrap());
        }

        let prompts = store.prompts().unwrap();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[0].prompt, "second prompt");
        assert_eq!(prompts[2].prompt, "fourth prompt");
    }

    #[test]
    fn test_reset_all_clears_activity_but_keeps_wallet() {
        let store = store();
        store
            .append_navigation_entry(&entry("https://a.example/", 0), 5000)
            .unwrap();
        store
            .flush_time_spent("https://a.example/", 4, 1, at(1000))
            .unwrap();
        store
            .append_prompt(&prompt("Explain ownership in Rust", 0), 2000, 100)
            .unwrap();
        store
            .save_wallet_state(&WalletState::connected("0xabc", at(0)))
            .unwrap();
        store.set_token_balance("12.5").unwrap();

        store.reset_all().unwrap();

        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.is_empty());
        assert!(store.wallet_state().unwrap().connected);
        assert_eq!(store.token_balance().unwrap().as_deref(), Some("12.5"));
    }

    #[test]
    fn test_session_events_pruned_by_retention() {
        let store = store();
        let hour = Duration::seconds(3600);
        store.record_session_event("window_focus", at(0), hour).unwrap();
        store
            .record_session_event("window_focus", at(1_800_000), hour)
            .unwrap();
        let pruned = store
            .record_session_event("window_focus", at(3_700_000), hour)
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.session_events().unwrap().len(), 2);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.migrate().unwrap();
            store
                .append_navigation_entry(&entry("https://a.example/", 0), 5000)
                .unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        store.migrate().unwrap();
        assert_eq!(store.pages_visited().unwrap(), 1);
    }
}
