//! Identity types for AetherOS entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Gives compile-time safety so IDs of different entity kinds can never be
/// mixed up, even though every one of them is a UUID underneath.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g., "agent", "cycle").
    const ENTITY_NAME: &'static str;

    fn new(uuid: Uuid) -> Self;
    fn as_uuid(&self) -> Uuid;

    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} id from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_entity_id!(AgentId, "agent", "Type-safe ID for a registered agent.");
define_entity_id!(CycleId, "cycle", "Type-safe ID for an ATO cycle.");
define_entity_id!(FlagId, "flag", "Type-safe ID for a process-improvement flag.");
define_entity_id!(AuditId, "audit", "Type-safe ID for an audit log entry.");
define_entity_id!(MessageId, "message", "Type-safe ID for an inter-agent message.");
define_entity_id!(
    DelegationId,
    "delegation",
    "Type-safe ID for a delegated action chain."
);

// ============================================================================
// CONTEXT ELEMENT IDS (typed, human-legible prefix rather than a bare UUID)
// ============================================================================

/// The kind-derived prefix stamped on every [`ElementId`], e.g. `DOC-` for a
/// doctrinal element. Citation extraction in the LLM adapter looks for these
/// prefixes in free-text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementPrefix {
    /// Doctrinal KB element (`DOC-`).
    Doctrine,
    /// Situational / threat-and-asset element (`THR-`).
    Situational,
    /// Mission-plan element (`MSN-`).
    Mission,
    /// Historical / prior-cycle element (`HIST-`).
    Historical,
    /// Collaborative / cross-agent element (`COLL-`).
    Collaborative,
}

impl ElementPrefix {
    pub const fn as_str(self) -> &'static str {
        match self {
            ElementPrefix::Doctrine => "DOC",
            ElementPrefix::Situational => "THR",
            ElementPrefix::Mission => "MSN",
            ElementPrefix::Historical => "HIST",
            ElementPrefix::Collaborative => "COLL",
        }
    }

    pub fn parse_prefix(s: &str) -> Option<Self> {
        match s {
            "DOC" => Some(ElementPrefix::Doctrine),
            "THR" => Some(ElementPrefix::Situational),
            "MSN" => Some(ElementPrefix::Mission),
            "HIST" => Some(ElementPrefix::Historical),
            "COLL" => Some(ElementPrefix::Collaborative),
            _ => None,
        }
    }
}

/// A globally unique, typed-prefix, citation-stable element ID, e.g.
/// `DOC-3f9a2b7c`. Unlike the UUID newtypes above, the prefix is part of the
/// wire format: agents cite elements by this string, so it must round-trip
/// through free text untouched.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Mint a fresh ID for the given layer, backed by a random UUID.
    pub fn new(prefix: ElementPrefix) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", prefix.as_str(), &suffix[..8]))
    }

    pub fn prefix(&self) -> Option<ElementPrefix> {
        self.0.split('-').next().and_then(ElementPrefix::parse_prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// MONOTONIC SEQUENCING
// ============================================================================

/// A strictly increasing sequence number, used to totally order the
/// append-only flag log and audit log (§5, §8: "strictly increasing
/// sequence numbers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide monotonic counter. One instance is shared by the flag log
/// and the audit log inside the kernel; each `next()` call is unique and
/// strictly greater than any previously issued value.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    counter: AtomicI64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> SequenceNumber {
        let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        SequenceNumber(value as u64)
    }
}

pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_type_safety() {
        let agent = AgentId::now_v7();
        let cycle = CycleId::now_v7();
        assert_ne!(agent.as_uuid(), cycle.as_uuid());
    }

    #[test]
    fn entity_id_roundtrips_through_serde() {
        let id = AgentId::now_v7();
        let json = serde_json::to_string(&id).unwrap();
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn element_id_prefix_roundtrips() {
        let id = ElementId::new(ElementPrefix::Doctrine);
        assert_eq!(id.prefix(), Some(ElementPrefix::Doctrine));
        assert!(id.as_str().starts_with("DOC-"));
    }

    #[test]
    fn sequence_generator_is_strictly_increasing() {
        let gen = SequenceGenerator::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();
        assert!(a < b);
        assert!(b < c);
    }

    proptest::proptest! {
        /// §8: "flags and audit entries carry strictly increasing sequence
        /// numbers" — holds for any run length, not just three calls.
        #[test]
        fn sequence_generator_strictly_increasing_over_n_calls(n in 1usize..500) {
            let gen = SequenceGenerator::new();
            let mut prev = gen.next();
            for _ in 1..n {
                let next = gen.next();
                prop_assert!(next > prev);
                prev = next;
            }
        }

        /// §3.1: entity ids of the same kind minted in a batch never
        /// collide, for any batch size.
        #[test]
        fn agent_ids_minted_in_a_batch_are_unique(n in 1usize..500) {
            let ids: Vec<AgentId> = (0..n).map(|_| AgentId::now_v7()).collect();
            let unique: std::collections::HashSet<_> = ids.iter().collect();
            prop_assert_eq!(unique.len(), ids.len());
        }
    }
}
