use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Opaque, immutable identity of a node.
///
/// Keys are assigned once at creation and never reused. They are UUID v7
/// values, so the natural ordering of keys follows creation order; the
/// identity index iterates documents in this order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(Uuid);

impl NodeKey {
    /// Allocate a fresh key.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID (used when decoding persisted records).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.0)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for NodeKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidNodeKey(format!("{s}: {e}")))
    }
}

/// Human-readable identifier of a root document (e.g. `GS-2024A-Q-12`).
///
/// Program ids double as file names in the durable store, so they must be
/// non-empty and free of path separators, whitespace, and control
/// characters, and must not start with a dot.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProgramId(String);

impl ProgramId {
    /// Parse and validate a program id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.starts_with('.') {
            Some("leading dot")
        } else if id.contains(['/', '\\']) {
            Some("path separator")
        } else if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            Some("whitespace or control character")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TypeError::InvalidProgramId {
                id,
                reason: reason.to_string(),
            }),
            None => Ok(Self(id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramId({})", self.0)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProgramId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProgramId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProgramId> for String {
    fn from(id: ProgramId) -> Self {
        id.0
    }
}

/// Reference to an observation: the owning program id plus the 1-based
/// observation number, written `<program-id>-<number>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId {
    pub program_id: ProgramId,
    pub number: u32,
}

impl ObservationId {
    pub fn new(program_id: ProgramId, number: u32) -> Self {
        Self { program_id, number }
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.program_id, self.number)
    }
}

impl FromStr for ObservationId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prog, num) = s
            .rsplit_once('-')
            .ok_or_else(|| TypeError::InvalidObservationId(s.to_string()))?;
        let number: u32 = num
            .parse()
            .map_err(|_| TypeError::InvalidObservationId(s.to_string()))?;
        if number == 0 {
            return Err(TypeError::InvalidObservationId(s.to_string()));
        }
        let program_id =
            ProgramId::new(prog).map_err(|_| TypeError::InvalidObservationId(s.to_string()))?;
        Ok(Self { program_id, number })
    }
}
