//! Organisation settings that drive the finance rules.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Number of semester periods per year.
pub const DEFAULT_PERIODS_PER_YEAR: u32 = 2;

/// Default membership fee per period (24.00).
pub const DEFAULT_MEMBERSHIP_FEE: Decimal = Decimal::from_parts(2400, 0, 0, false, 2);

/// Default bank charge booked against a failed direct debit (4.50).
pub const DEFAULT_LASTSCHRIFT_FAILED_FEE: Decimal = Decimal::from_parts(450, 0, 0, false, 2);

/// Days without activity after which a persona is due for archival.
pub const DEFAULT_ARCHIVAL_INACTIVITY_DAYS: i64 = 730;

/// Finance settings of the organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdeConfig {
    /// Number of semester periods per year.
    pub periods_per_year: u32,

    /// Membership fee charged per period.
    pub membership_fee: Decimal,

    /// Bank charge for a failed direct debit, booked as negative tally.
    pub lastschrift_failed_fee: Decimal,

    /// Inactivity in days after which personas are notified and archived.
    pub archival_inactivity_days: i64,
}

impl CdeConfig {
    /// The amount collected by one direct debit: one year of membership.
    #[must_use]
    pub fn annual_fee(&self) -> Decimal {
        self.membership_fee * Decimal::from(self.periods_per_year)
    }

    /// How many periods the direct-debit skip window looks back.
    #[must_use]
    pub fn skip_window_periods(&self) -> i64 {
        3 * i64::from(self.periods_per_year)
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.periods_per_year == 0 {
            return Err(CoreError::Configuration(
                "periods_per_year must be positive".into(),
            ));
        }
        if self.membership_fee.is_sign_negative() || self.membership_fee.is_zero() {
            return Err(CoreError::Configuration(
                "membership_fee must be positive".into(),
            ));
        }
        if self.lastschrift_failed_fee.is_sign_negative() {
            return Err(CoreError::Configuration(
                "lastschrift_failed_fee must not be negative".into(),
            ));
        }
        if self.archival_inactivity_days <= 0 {
            return Err(CoreError::Configuration(
                "archival_inactivity_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CdeConfig {
    fn default() -> Self {
        Self {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            membership_fee: DEFAULT_MEMBERSHIP_FEE,
            lastschrift_failed_fee: DEFAULT_LASTSCHRIFT_FAILED_FEE,
            archival_inactivity_days: DEFAULT_ARCHIVAL_INACTIVITY_DAYS,
        }
    }
}
