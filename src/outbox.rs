//! Outbox: durable priority queue of outbound packets with a
//! retry/expiry/crash-recovery discipline. Backed by a sled tree
//! (`outbox/{packet_id -> OutboxEntry}`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub packet: Packet,
    pub added_at: i64,
    pub retry_count: u32,
    pub last_attempt_at: Option<i64>,
    pub status: OutboxStatus,
    /// Monotonic sequence assigned at `enqueue` — breaks ties among equal
    /// priority/added_at entries deterministically across a sled reopen,
    /// since sled's own iteration order is not guaranteed to be FIFO.
    pub sequence: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub in_progress: u64,
    pub sent: u64,
    pub failed: u64,
}

pub struct Outbox {
    tree: sled::Tree,
    next_sequence: u64,
    max_retries: u32,
    max_sos_retries: u32,
    ttl_normal: Duration,
    ttl_sos: Duration,
}

impl Outbox {
    /// Opens the durable tree and runs crash recovery: every entry with
    /// status `in_progress` is reset to `pending` *before* the outbox
    /// serves any query. Without this a crash between `mark_in_progress`
    /// and `mark_sent` causes permanent packet loss.
    pub fn init(
        db: &sled::Db,
        max_retries: u32,
        max_sos_retries: u32,
        ttl_normal: Duration,
        ttl_sos: Duration,
    ) -> EngineResult<Self> {
        let tree = db.open_tree("outbox")?;
        let mut max_seq = 0u64;
        let mut recovered = 0u64;
        for item in tree.iter() {
            let (key, value) = item?;
            let mut entry: OutboxEntry = serde_json::from_slice(&value)
                .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?;
            max_seq = max_seq.max(entry.sequence);
            if entry.status == OutboxStatus::InProgress {
                entry.status = OutboxStatus::Pending;
                recovered += 1;
                let bytes = serde_json::to_vec(&entry)
                    .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?;
                tree.insert(key, bytes)?;
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered, "outbox_crash_recovery: in_progress entries reset to pending");
        }
        Ok(Self {
            tree,
            next_sequence: max_seq + 1,
            max_retries,
            max_sos_retries,
            ttl_normal,
            ttl_sos,
        })
    }

    fn max_for(&self, packet: &Packet) -> u32 {
        if packet.is_sos() { self.max_sos_retries } else { self.max_retries }
    }

    fn ttl_for(&self, packet: &Packet) -> Duration {
        if packet.is_sos() { self.ttl_sos } else { self.ttl_normal }
    }

    fn get(&self, id: &str) -> EngineResult<Option<OutboxEntry>> {
        match self.tree.get(id)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, entry: &OutboxEntry) -> EngineResult<()> {
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?;
        self.tree.insert(entry.packet.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn enqueue(&mut self, packet: Packet, now: i64) -> EngineResult<()> {
        let entry = OutboxEntry {
            added_at: now,
            retry_count: 0,
            last_attempt_at: None,
            status: OutboxStatus::Pending,
            sequence: self.next_sequence,
            packet,
        };
        self.next_sequence += 1;
        self.put(&entry)
    }

    /// Highest-`priority` pending entry first, ties broken by insertion
    /// sequence.
    pub fn next_pending(&self) -> EngineResult<Option<Packet>> {
        let mut best: Option<OutboxEntry> = None;
        for item in self.tree.iter() {
            let (_, value) = item?;
            let entry: OutboxEntry = serde_json::from_slice(&value)
                .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?;
            if entry.status != OutboxStatus::Pending {
                continue;
            }
            best = match best {
                None => Some(entry),
                Some(cur) => {
                    if entry.packet.priority > cur.packet.priority
                        || (entry.packet.priority == cur.packet.priority && entry.sequence < cur.sequence)
                    {
                        Some(entry)
                    } else {
                        Some(cur)
                    }
                }
            };
        }
        Ok(best.map(|e| e.packet))
    }

    pub fn mark_in_progress(&mut self, id: &str) -> EngineResult<()> {
        if let Some(mut entry) = self.get(id)? {
            entry.status = OutboxStatus::InProgress;
            self.put(&entry)?;
        }
        Ok(())
    }

    pub fn mark_sent(&mut self, id: &str) -> EngineResult<()> {
        if let Some(mut entry) = self.get(id)? {
            entry.status = OutboxStatus::Sent;
            self.put(&entry)?;
        }
        Ok(())
    }

    /// Returns whether the entry may still be retried after this failure.
    /// SOS entries failed with `transient=true` do NOT increment
    /// `retry_count` and stay `pending` — they did not correspond to a
    /// real send attempt.
    pub fn mark_failed(&mut self, id: &str, transient: bool, now: i64) -> EngineResult<bool> {
        let Some(mut entry) = self.get(id)? else {
            return Ok(false);
        };
        entry.last_attempt_at = Some(now);

        if transient && entry.packet.is_sos() {
            entry.status = OutboxStatus::Pending;
            self.put(&entry)?;
            return Ok(true);
        }

        entry.retry_count += 1;
        let max = self.max_for(&entry.packet);
        let can_retry = entry.retry_count < max;
        entry.status = if can_retry { OutboxStatus::Pending } else { OutboxStatus::Failed };
        self.put(&entry)?;
        Ok(can_retry)
    }

    pub fn remove(&mut self, id: &str) -> EngineResult<()> {
        self.tree.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn all_entries(&self) -> EngineResult<Vec<OutboxEntry>> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            out.push(
                serde_json::from_slice(&value)
                    .map_err(|e| crate::error::EngineError::Storage(e.to_string()))?,
            );
        }
        Ok(out)
    }

    pub fn stats(&self) -> EngineResult<OutboxStats> {
        let mut stats = OutboxStats::default();
        for entry in self.all_entries()? {
            match entry.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::InProgress => stats.in_progress += 1,
                OutboxStatus::Sent => stats.sent += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Deletes entries whose age exceeds the type-specific TTL. Run on
    /// init and on the 60s expiry sweep.
    pub fn expire(&mut self, now: i64) -> EngineResult<Vec<String>> {
        let mut expired = Vec::new();
        for entry in self.all_entries()? {
            let ttl = self.ttl_for(&entry.packet);
            let age_ms = now.saturating_sub(entry.added_at);
            if age_ms > ttl.as_millis() as i64 {
                self.remove(&entry.packet.id)?;
                expired.push(entry.packet.id);
            }
        }
        Ok(expired)
    }

    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.tree.is_empty())
    }
}
