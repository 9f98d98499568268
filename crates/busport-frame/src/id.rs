//! Port and session identifiers.
//!
//! Both are opaque strings of the form `<unix-millis>-<random>`. Equality is
//! the only operation the protocol performs on them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const RANDOM_SUFFIX_LEN: usize = 12;

fn make_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis}-{}", &random[..RANDOM_SUFFIX_LEN])
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh identifier.
            pub fn generate() -> Self {
                Self(make_id())
            }

            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies one virtual port. Chosen by the connecting side.
    PortId
);

string_id!(
    /// Identifies one endpoint of a port, used to drop self-echoed frames.
    SessionId
);

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_have_millis_and_random_parts() {
        let id = PortId::generate();
        let (millis, random) = id.as_str().split_once('-').unwrap();
        assert!(millis.parse::<u128>().unwrap() > 0);
        assert_eq!(random.len(), RANDOM_SUFFIX_LEN);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_do_not_repeat() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = PortId::new("1700000000000-abc");
        assert_eq!(
            serde_json::to_value(&id).unwrap(),
            serde_json::json!("1700000000000-abc")
        );
    }
}
