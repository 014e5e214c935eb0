use std::fmt;

use serde::{Deserialize, Serialize};

/// The two kinds of root document held by the store.
///
/// Each kind has its own identity index, storage manager, and file suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A science program (`.sp` files).
    Program,
    /// A nightly record (`.pl` files).
    NightlyRecord,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Program, DocumentKind::NightlyRecord];

    /// File suffix, without the leading dot.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Program => "sp",
            Self::NightlyRecord => "pl",
        }
    }

    /// Map a file extension back to a document kind.
    pub fn from_suffix(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.suffix() == ext)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Program => "program",
            Self::NightlyRecord => "nightly-record",
        };
        f.write_str(s)
    }
}
