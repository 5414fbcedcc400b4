//! Identifier types for CdEDB.
//!
//! Database entities carry integer identifiers handed out by per-family
//! sequences. Log entries use ULIDs so they sort chronologically.
//!
//! # Macro-based ID Types
//!
//! The `int_id_type!` macro reduces boilerplate for integer identifier types,
//! ensuring consistent implementation of serialization, parsing, and display traits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Macro to define an integer identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `i64` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (transparent, so the ids work as JSON map keys)
/// - `FromStr`, `Display`, `Debug`
/// - `From<i64>`, `Into<i64>`
///
/// Negative values never reach storage. The partial import uses them as
/// placeholders for entities that do not exist yet.
///
/// # Example
///
/// ```ignore
/// int_id_type!(MyId, "A custom identifier type.");
/// let id = MyId::new(3);
/// let parsed: MyId = id.to_string().parse().unwrap();
/// ```
macro_rules! int_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create a new identifier from its raw value.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Return the raw value.
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Whether this is a placeholder for an entity still to be created.
            #[must_use]
            pub const fn is_placeholder(&self) -> bool {
                self.0 < 0
            }

            /// Return the big-endian bytes used as storage key (8 bytes).
            #[must_use]
            pub const fn to_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Create an identifier from its storage key bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 8]) -> Self {
                Self(i64::from_be_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s.trim().parse::<i64>().map_err(|_| IdError::InvalidInteger)?;
                Ok(Self(value))
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

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id_type!(PersonaId, "A persona (user account) identifier.");
int_id_type!(PeriodId, "A semester period identifier.\n\nPeriods are numbered consecutively; the next period is always `id + 1`.");
int_id_type!(ExpulsPeriodId, "An ExPuls (member magazine) period identifier.");
int_id_type!(LastschriftId, "A direct-debit permit identifier.");
int_id_type!(TransactionId, "A direct-debit transaction identifier.");
int_id_type!(EventId, "An event identifier.");
int_id_type!(PartId, "An event part identifier.");
int_id_type!(TrackId, "A course track identifier.");
int_id_type!(FieldId, "A custom data field identifier.");
int_id_type!(FeeModifierId, "A fee modifier identifier.");
int_id_type!(RegistrationId, "An event registration identifier.");
int_id_type!(CourseId, "A course identifier.");
int_id_type!(LodgementId, "A lodgement identifier.");
int_id_type!(LodgementGroupId, "A lodgement group identifier.");

impl PeriodId {
    /// The period following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl ExpulsPeriodId {
    /// The ExPuls period following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// A log entry identifier using ULID for time-ordering.
///
/// Log ids are time-ordered to allow efficient range queries
/// and natural chronological sorting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogEntryId(Ulid);

impl LogEntryId {
    /// Generate a new `LogEntryId` with the current timestamp.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Return the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Return the bytes of the ULID (16 bytes).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Create a `LogEntryId` from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl FromStr for LogEntryId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for LogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogEntryId({})", self.0)
    }
}

impl fmt::Display for LogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LogEntryId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogEntryId> for String {
    fn from(id: LogEntryId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid integer id.
    #[error("invalid integer id")]
    InvalidInteger,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}
