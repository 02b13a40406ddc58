//! Append-only audit log (§3: "retained for the life of the process;
//! externalization out of scope").

use aether_core::{AccessLevel, AgentId, AuditEntry, AuditId, InformationCategory, SequenceGenerator};
use std::sync::RwLock;

/// Multi-writer, append-only log of [`AuditEntry`] records, totally
/// ordered by monotonic sequence number (§5).
#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    sequence: SequenceGenerator,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sequence: SequenceGenerator::new(),
        }
    }

    pub fn append(
        &self,
        agent_id: AgentId,
        category: InformationCategory,
        query_summary: impl Into<String>,
        decision: impl Into<String>,
        access_level: AccessLevel,
        sanitized: bool,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: AuditId::now_v7(),
            sequence: self.sequence.next(),
            ts: chrono::Utc::now(),
            agent_id,
            category,
            query_summary: query_summary.into(),
            decision: decision.into(),
            access_level,
            sanitized,
        };
        self.entries
            .write()
            .expect("audit log lock poisoned")
            .push(entry.clone());
        entry
    }

    /// Snapshot of every entry recorded so far, in sequence order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().expect("audit log lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_strictly_sequenced() {
        let log = AuditLog::new();
        log.append(
            AgentId::now_v7(),
            InformationCategory::Doctrine,
            "q1",
            "allow",
            AccessLevel::Internal,
            false,
        );
        log.append(
            AgentId::now_v7(),
            InformationCategory::Doctrine,
            "q2",
            "allow",
            AccessLevel::Internal,
            false,
        );
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].sequence < entries[1].sequence);
    }
}
