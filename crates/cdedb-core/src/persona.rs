//! Persona records and membership rules.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::PersonaId;

/// A persona: somebody known to the organisation, member or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// The persona id.
    pub id: PersonaId,

    /// Given names.
    pub given_names: String,

    /// Family name.
    pub family_name: String,

    /// Login / mail address.
    pub username: Option<String>,

    /// Whether the persona currently is a member.
    pub is_member: bool,

    /// Trial members are not charged in their first period.
    pub trial_member: bool,

    /// Membership fee balance.
    pub balance: Decimal,

    /// Archived personas are retained for the record only.
    pub is_archived: bool,

    /// Last time the persona did something noteworthy.
    pub last_activity: DateTime<Utc>,

    /// Set when the persona was told about the upcoming archival.
    pub archival_notified_at: Option<DateTime<Utc>>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Persona {
    /// Create a new non-member persona with zero balance.
    #[must_use]
    pub fn new(
        id: PersonaId,
        given_names: impl Into<String>,
        family_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            given_names: given_names.into(),
            family_name: family_name.into(),
            username: None,
            is_member: false,
            trial_member: false,
            balance: Decimal::ZERO,
            is_archived: false,
            last_activity: now,
            archival_notified_at: None,
            created_at: now,
        }
    }

    /// Display name used in log messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.given_names, self.family_name)
    }

    /// Whether the balance pays for the next period.
    #[must_use]
    pub fn covers_fee(&self, membership_fee: Decimal) -> bool {
        self.balance >= membership_fee
    }

    /// Whether the persona has been inactive for at least `days`.
    #[must_use]
    pub fn is_inactive(&self, now: DateTime<Utc>, days: i64) -> bool {
        now - self.last_activity >= Duration::days(days)
    }
}
