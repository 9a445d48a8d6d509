use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::error::{MalformedIdSnafu, StorageError, StorageResult};

/// Shortest token accepted from any continuity signal.
pub const MIN_TOKEN_LEN: usize = 8;

// Macro keeps both identifier wrappers structurally identical, so carriage,
// parsing, and well-formedness behave the same for client and session tokens.
macro_rules! define_identity_token {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Accepts a raw token after a minimal well-formedness check.
            ///
            /// Malformed tokens are rejected, never repaired; callers treat a
            /// rejection the same as an absent continuity signal.
            pub fn parse(raw: &str) -> StorageResult<Self> {
                if raw.len() < MIN_TOKEN_LEN
                    || !raw
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
                {
                    return MalformedIdSnafu {
                        stage: "parse-identity-token",
                        kind: $kind,
                        raw: raw.to_string(),
                    }
                    .fail();
                }

                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_identity_token!(ClientId, "client-id");
define_identity_token!(SessionId, "session-id");

impl ClientId {
    /// Mints a fresh client identifier: creation time plus a random suffix,
    /// high-entropy enough that two browsers never collide.
    pub fn mint() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("user-{:x}-{}", unix_timestamp_seconds(), &suffix[..12]))
    }
}

impl SessionId {
    /// Mints a session identifier structurally derived from its owner.
    ///
    /// The embedded client prefix is a debugging affordance only; ownership is
    /// always decided by exact equality on the stored `owner_id` field.
    pub fn mint(owner: &ClientId) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}.{:x}.{}",
            owner.as_str(),
            unix_timestamp_seconds(),
            &suffix[..8]
        ))
    }
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_u64, |duration| duration.as_secs())
}
