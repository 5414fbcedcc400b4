//! Event fee computation.
//!
//! The fee of a registration is a pure fold over the event's parts:
//!
//! - the base fee of every part the registration is involved in,
//! - every fee modifier of such a part whose boolean field is set,
//! - the non-member surcharge once, if the persona is no member.
//!
//! The result is cached as `amount_owed` and must be recomputed whenever the
//! registration or the fee configuration of its event changes.

use rust_decimal::Decimal;

use crate::event::Event;
use crate::registration::Registration;

/// Compute the fee owed for a single registration.
#[must_use]
pub fn calculate_single_fee(event: &Event, registration: &Registration, is_member: bool) -> Decimal {
    let mut fee = Decimal::ZERO;
    let mut involved = false;

    for (part_id, part) in &event.parts {
        if !registration.status_in(*part_id).is_involved() {
            continue;
        }
        involved = true;
        fee += part.fee;
        for modifier in event.fee_modifiers_of(*part_id) {
            let triggered = event
                .fields
                .get(&modifier.field_id)
                .is_some_and(|field| registration.flag(&field.field_name));
            if triggered {
                fee += modifier.amount;
            }
        }
    }

    if involved && !is_member {
        fee += event.nonmember_surcharge;
    }
    fee
}
