//! Audit log entries and the authorization decision envelope (§3, §4.2).

use crate::{AccessLevel, AgentId, AuditId, InformationCategory, SequenceNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// Outcome of an `authorize` call. The `reasons` list enumerates every
/// failing factor, not just the first one encountered (§4.2: "not
/// short-circuited, for observability").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reasons: Vec<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reasons: Vec::new(),
        }
    }

    pub fn deny(reasons: Vec<String>) -> Self {
        Self {
            allow: false,
            reasons,
        }
    }
}

/// One append-only audit record (§3). Produced by the Information Broker
/// whenever `CategoryPolicy::audit` is set, and by the Authorization Engine
/// for policy-evaluator decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub sequence: SequenceNumber,
    pub ts: Timestamp,
    pub agent_id: AgentId,
    pub category: InformationCategory,
    pub query_summary: String,
    pub decision: String,
    pub access_level: AccessLevel,
    pub sanitized: bool,
}
