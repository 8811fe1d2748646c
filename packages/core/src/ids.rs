//! ULID-backed identifiers.
//!
//! All ids come from one process-wide monotonic generator, so comparing two
//! ids of the same kind also compares their creation order. The broker relies
//! on this for its oldest-first tie-break.

use std::sync::LazyLock;

use parking_lot::Mutex;
use ulid::{Generator, Ulid};

static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Next monotonic ULID. Falls back to a random ULID if the random component
/// overflows within a single millisecond.
pub(crate) fn next_ulid() -> Ulid {
    GENERATOR.lock().generate().unwrap_or_else(|_| Ulid::new())
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub ulid::Ulid);

        impl $name {
            pub fn new() -> Self {
                Self($crate::ids::next_ulid())
            }

            pub fn parse(s: &str) -> std::result::Result<Self, ulid::DecodeError> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use ulid_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let ids: Vec<Ulid> = (0..1000).map(|_| next_ulid()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ids_parse_where_a_result_alias_is_in_scope() {
        // pipeline.rs imports the crate's one-parameter Result
        let id = crate::pipeline::PipelineId::new();
        let parsed = crate::pipeline::PipelineId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert!(crate::pipeline::PipelineId::parse("not-a-ulid").is_err());
    }
}
