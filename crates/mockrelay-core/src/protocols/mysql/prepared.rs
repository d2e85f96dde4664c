//! Prepared-statement lifecycle tracking: `COM_STMT_PREPARE` /
//! `COM_STMT_EXECUTE` / `COM_STMT_CLOSE` history, capped and reindexed so a
//! long-lived connection's history doesn't grow without bound.

use std::collections::HashMap;

/// One entry in a connection's prepared-statement history.
#[derive(Debug, Clone)]
pub struct PreparedStmtHistoryEntry {
    /// Server-assigned statement ID.
    pub stmt_id: u32,
    /// The query text this ID was prepared from.
    pub query: String,
    /// Logical cycle (monotonic counter) the statement was prepared at.
    pub prepared_at_cycle: i64,
    /// Logical cycle it was closed at, or `-1` if still open.
    pub closed_at_cycle: i64,
}

impl PreparedStmtHistoryEntry {
    fn is_open(&self) -> bool {
        self.closed_at_cycle < 0
    }
}

/// Bounded history of prepared statements for a single connection.
#[derive(Debug, Clone)]
pub struct PreparedStmtHistory {
    entries: Vec<PreparedStmtHistoryEntry>,
    max: usize,
    cycle: i64,
}

impl PreparedStmtHistory {
    /// Build a new history capped at `max` entries.
    pub fn new(max: usize) -> Self {
        Self { entries: Vec::new(), max, cycle: 0 }
    }

    /// Record a newly prepared statement.
    pub fn prepare(&mut self, stmt_id: u32, query: impl Into<String>) {
        self.cycle += 1;
        self.entries.push(PreparedStmtHistoryEntry {
            stmt_id,
            query: query.into(),
            prepared_at_cycle: self.cycle,
            closed_at_cycle: -1,
        });
        self.cap_and_reindex();
    }

    /// Close the most-recently-prepared open entry for `stmt_id`.
    ///
    /// A statement ID can be reused after being closed, so this always
    /// targets the latest open entry rather than the first match.
    pub fn close(&mut self, stmt_id: u32) {
        self.cycle += 1;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.stmt_id == stmt_id && e.is_open())
        {
            entry.closed_at_cycle = self.cycle;
        }
    }

    /// Find the most recently prepared, still-open statement with a
    /// matching normalized query text.
    pub fn find_active_by_query(&self, normalized: &str) -> Option<&PreparedStmtHistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.is_open() && e.query == normalized)
    }

    /// Look up by statement ID regardless of open/closed state.
    pub fn find_by_id(&self, stmt_id: u32) -> Option<&PreparedStmtHistoryEntry> {
        self.entries.iter().rev().find(|e| e.stmt_id == stmt_id)
    }

    /// Number of entries currently retained (after capping).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep every open entry plus the most recent half of closed entries,
    /// once the total exceeds `max`. Reindexes in prepared-order afterward
    /// so iteration stays chronological.
    fn cap_and_reindex(&mut self) {
        if self.entries.len() <= self.max {
            return;
        }
        let (mut open, mut closed): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.is_open());
        closed.sort_by_key(|e| e.prepared_at_cycle);
        let keep_closed = self.max.saturating_sub(open.len()) / 2;
        if closed.len() > keep_closed {
            let drop = closed.len() - keep_closed;
            closed.drain(..drop);
        }
        open.sort_by_key(|e| e.prepared_at_cycle);
        closed.extend(open);
        closed.sort_by_key(|e| e.prepared_at_cycle);
        self.entries = closed;
    }
}

/// Per-connection decode state threaded through the command phase:
/// negotiated capability flags, the server's greeting, and prepared
/// statement bookkeeping.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// The last command byte seen on the wire (e.g. `COM_QUERY`), used to
    /// interpret the following response packet group.
    pub last_op: Option<u8>,
    /// Capability flags the server advertised in its greeting.
    pub server_caps: u32,
    /// Capability flags the client actually negotiated (from
    /// `HandshakeResponse41`), once observed.
    pub client_caps: Option<u32>,
    /// `COM_STMT_PREPARE` response metadata, keyed by server-assigned
    /// statement ID: `(num_params, num_columns)`.
    pub prepared_statements: HashMap<u32, (u16, u16)>,
    /// Prepared-statement lifecycle history.
    pub stmt_history: PreparedStmtHistory,
    /// Replay-mode statement ID counter. Record mode never touches this —
    /// it forwards whatever ID the real server assigned.
    next_stmt_id: u32,
    /// Replay-mode map from a runtime ID this engine handed to the client
    /// back to the ID embedded in the recorded mock, so a later
    /// `COM_STMT_EXECUTE`/`COM_STMT_CLOSE` (which carries the runtime ID)
    /// can be rewritten to match what was recorded.
    runtime_stmt_ids: HashMap<u32, u32>,
}

impl DecodeContext {
    pub fn new(server_caps: u32, max_history: usize) -> Self {
        Self {
            last_op: None,
            server_caps,
            client_caps: None,
            prepared_statements: HashMap::new(),
            stmt_history: PreparedStmtHistory::new(max_history),
            next_stmt_id: 0,
            runtime_stmt_ids: HashMap::new(),
        }
    }

    /// Mint a fresh runtime statement ID for a replayed `COM_STMT_PREPARE`
    /// response, mapped back to `recorded_id` for later rewriting.
    pub fn allocate_runtime_stmt_id(&mut self, recorded_id: u32) -> u32 {
        self.next_stmt_id += 1;
        let runtime_id = self.next_stmt_id;
        self.runtime_stmt_ids.insert(runtime_id, recorded_id);
        runtime_id
    }

    /// The recorded statement ID a runtime ID was minted for, if any.
    pub fn recorded_stmt_id(&self, runtime_id: u32) -> Option<u32> {
        self.runtime_stmt_ids.get(&runtime_id).copied()
    }

    /// Drop a runtime ID's mapping once the client closes it.
    pub fn forget_runtime_stmt_id(&mut self, runtime_id: u32) {
        self.runtime_stmt_ids.remove(&runtime_id);
    }

    /// Whether `CLIENT_DEPRECATE_EOF` is in effect for this connection —
    /// requires both sides to have advertised it.
    pub fn deprecate_eof(&self) -> bool {
        let client = self.client_caps.unwrap_or(0);
        (self.server_caps & super::handshake::CLIENT_DEPRECATE_EOF != 0)
            && (client & super::handshake::CLIENT_DEPRECATE_EOF != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_the_most_recently_prepared_open_entry_for_a_reused_id() {
        let mut history = PreparedStmtHistory::new(1000);
        history.prepare(7, "select 1");
        history.close(7);
        history.prepare(7, "select 2");
        history.close(7);

        let entry = history.find_by_id(7).unwrap();
        assert_eq!(entry.query, "select 2");
        assert!(!entry.is_open());
    }

    #[test]
    fn find_active_by_query_ignores_closed_entries() {
        let mut history = PreparedStmtHistory::new(1000);
        history.prepare(1, "select a");
        history.close(1);
        history.prepare(2, "select a");
        let found = history.find_active_by_query("select a").unwrap();
        assert_eq!(found.stmt_id, 2);
    }

    #[test]
    fn caps_and_keeps_all_open_entries() {
        let mut history = PreparedStmtHistory::new(10);
        for i in 0..20u32 {
            history.prepare(i, format!("q{i}"));
            if i % 2 == 0 {
                history.close(i);
            }
        }
        assert!(history.len() <= 15);
        for i in (1..20u32).step_by(2) {
            assert!(history.find_by_id(i).is_some(), "open entry {i} should survive capping");
        }
    }

    #[test]
    fn deprecate_eof_requires_both_sides() {
        let mut ctx = DecodeContext::new(super::super::handshake::CLIENT_DEPRECATE_EOF, 1000);
        assert!(!ctx.deprecate_eof());
        ctx.client_caps = Some(super::super::handshake::CLIENT_DEPRECATE_EOF);
        assert!(ctx.deprecate_eof());
    }

    #[test]
    fn runtime_stmt_ids_are_minted_fresh_and_map_back_to_the_recorded_id() {
        let mut ctx = DecodeContext::new(0, 1000);
        let runtime_a = ctx.allocate_runtime_stmt_id(945);
        let runtime_b = ctx.allocate_runtime_stmt_id(946);
        assert_ne!(runtime_a, runtime_b);
        assert_eq!(ctx.recorded_stmt_id(runtime_a), Some(945));
        assert_eq!(ctx.recorded_stmt_id(runtime_b), Some(946));

        ctx.forget_runtime_stmt_id(runtime_a);
        assert_eq!(ctx.recorded_stmt_id(runtime_a), None);
        assert_eq!(ctx.recorded_stmt_id(runtime_b), Some(946));
    }
}
