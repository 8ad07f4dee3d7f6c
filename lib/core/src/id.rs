//! Strongly-typed ID types for domain entities.
//!
//! All IDs use ULID format, so they sort by creation time. Node ids are not
//! defined here: they are user-chosen strings scoped to one workflow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Why a string could not be read back as a typed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The string carried another id type's prefix, e.g. `run_...` for a workflow.
    WrongPrefix {
        expected: &'static str,
        found: String,
    },
    /// The ULID part did not decode.
    Malformed { kind: &'static str, details: String },
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPrefix { expected, found } => {
                write!(f, "expected id prefix '{expected}', found '{found}'")
            }
            Self::Malformed { kind, details } => write!(f, "malformed {kind}: {details}"),
        }
    }
}

impl std::error::Error for ParseIdError {}

/// Accepts `<prefix>_<ulid>` or a bare ULID.
fn parse_ulid(s: &str, prefix: &'static str, kind: &'static str) -> Result<Ulid, ParseIdError> {
    let raw = match s.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => {
            return Err(ParseIdError::WrongPrefix {
                expected: prefix,
                found: found.to_string(),
            });
        }
        None => s,
    };
    Ulid::from_string(raw).map_err(|e| ParseIdError::Malformed {
        kind,
        details: e.to_string(),
    })
}

/// Generates a ULID-backed id newtype.
///
/// Ids display as `<prefix>_<ulid>` but serialize as the bare ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_ulid(s, $prefix, stringify!($name)).map(Self)
            }
        }
    };
}

define_id!(
    /// The owner of workflow jobs.
    UserId => "usr"
);

define_id!(
    /// Unique identifier for a workflow and the job that wraps it.
    WorkflowId => "wf"
);

define_id!(
    /// One execution of a workflow.
    WorkflowRunId => "run"
);

define_id!(
    /// A worker agent in the pool.
    WorkerId => "wkr"
);

define_id!(SystemStatusId => "stat");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_type_prefix() {
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(WorkerId::new().to_string().starts_with("wkr_"));
        assert!(SystemStatusId::new().to_string().starts_with("stat_"));
    }

    #[test]
    fn parses_displayed_form() {
        let id = WorkflowRunId::new();
        let parsed: WorkflowRunId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parses_bare_ulid() {
        let ulid = Ulid::new();
        let id: UserId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn rejects_another_types_prefix() {
        let run = WorkflowRunId::new().to_string();
        let err = run.parse::<WorkflowId>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::WrongPrefix {
                expected: "wf",
                found: "run".to_string(),
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = "wf_nope".parse::<WorkflowId>().unwrap_err();
        assert!(matches!(err, ParseIdError::Malformed { kind: "WorkflowId", .. }));
    }

    #[test]
    fn ulids_order_by_creation() {
        let early = WorkflowId::from_ulid(Ulid::from_parts(1_000, 0));
        let late = WorkflowId::from_ulid(Ulid::from_parts(2_000, 0));
        assert!(early < late);
    }

    #[test]
    fn ids_serialize_as_bare_ulid_strings() {
        let ulid = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").expect("valid ulid");
        let id = WorkflowId::from_ulid(ulid);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"01ARZ3NDEKTSV4RRFFQ69G5FAV\"");
    }
}
