//! Identifier types for the assistant message pipeline.
//!
//! Store-assigned message ids are plain integers (see [`MessageId`]). Everything
//! the client invents on its own is a UUID newtype declared here, so a local
//! placeholder can never be confused with a durable id at compile time.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.
//!
//! [`MessageId`]: crate::chat::types::MessageId

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID with good insert locality when `uuid_v7` is enabled.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        prefix = $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Textual namespace prepended by `Display`.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(uuid_time_ordered())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", Self::PREFIX, self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
                Ok(Self(Uuid::parse_str(raw)?))
            }
        }
    };
}

define_uuid_id!(
    /// Placeholder id of an optimistic entry.
    ///
    /// Rendered as `local-<uuid>`; it lives in a different namespace than the
    /// integer ids handed out by the backing store, so the two never collide.
    LocalId,
    prefix = "local-"
);

define_uuid_id!(
    /// Client-generated token sent with a message and echoed by the store on
    /// both durable messages of that exchange.
    CorrelationToken,
    prefix = ""
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_is_namespaced() {
        let id = LocalId::new();
        let text = id.to_string();
        assert!(text.starts_with("local-"));
        assert!(text.parse::<i64>().is_err());
    }

    #[test]
    fn test_local_id_parse_roundtrip() {
        let id = LocalId::new();
        let parsed: LocalId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_correlation_token_serializes_as_plain_uuid() {
        let token = CorrelationToken::new();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", token.as_uuid()));
    }
}
