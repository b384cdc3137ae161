// Slot status resolution
// Pure functions of (now, today, date, availability, the user's bookings, horizon policy).
// Nothing here is cached; the booking window is recomputed on every call.

use std::ops::RangeInclusive;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::availability::HourAvailabilityMap;
use crate::config::{BookingPolicy, OperatingHours};
use crate::models::{Booking, Resource, ResourceId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Yours,
    Unavailable,
    Past,
    Disabled,
}

/// Dates that can be booked, as local calendar dates.
pub fn booking_window(today: NaiveDate, policy: &BookingPolicy) -> RangeInclusive<NaiveDate> {
    today..=today + Duration::days(policy.horizon_days)
}

pub fn is_bookable(date: NaiveDate, today: NaiveDate, policy: &BookingPolicy) -> bool {
    let days_ahead = (date - today).num_days();
    (0..=policy.horizon_days).contains(&days_ahead)
}

pub fn bookable_dates(today: NaiveDate, policy: &BookingPolicy) -> Vec<NaiveDate> {
    booking_window(today, policy)
        .start()
        .iter_days()
        .take(policy.horizon_days as usize + 1)
        .collect()
}

/// `[date hour:00, date hour+1:00)` in UTC.
pub fn slot_interval(date: NaiveDate, hour: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let start = midnight + Duration::hours(hour as i64);
    (start, start + Duration::hours(1))
}

/// Everything slot resolution depends on for one date.
#[derive(Debug, Clone, Copy)]
pub struct SlotContext<'a> {
    pub date: NaiveDate,
    pub now: DateTime<Utc>,
    pub bookable: bool,
    pub availability: &'a HourAvailabilityMap,
    /// The current user's bookings, from their ledger.
    pub bookings: &'a [Booking],
    /// When set, bookings owned by anyone else are ignored.
    pub user_id: Option<&'a UserId>,
}

impl<'a> SlotContext<'a> {
    pub fn new(
        date: NaiveDate,
        now: DateTime<Utc>,
        today: NaiveDate,
        policy: &BookingPolicy,
        availability: &'a HourAvailabilityMap,
        bookings: &'a [Booking],
    ) -> Self {
        Self {
            date,
            now,
            bookable: is_bookable(date, today, policy),
            availability,
            bookings,
            user_id: None,
        }
    }

    pub fn for_user(mut self, user_id: &'a UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    fn owns_overlapping(&self, resource_id: &ResourceId, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.bookings.iter().any(|booking| {
            booking.is_active()
                && &booking.resource_id == resource_id
                && self.user_id.map_or(true, |user| &booking.user_id == user)
                && booking.overlaps(start, end)
        })
    }
}

/// Status of one resource/hour, first match wins:
/// past, disabled, yours, available, unavailable.
pub fn resolve_slot_status(resource_id: &ResourceId, hour: u32, ctx: &SlotContext<'_>) -> SlotStatus {
    let (start, end) = slot_interval(ctx.date, hour);

    if end <= ctx.now {
        return SlotStatus::Past;
    }
    if !ctx.bookable {
        return SlotStatus::Disabled;
    }
    // checked before availability so a slot is never both free and yours
    if ctx.owns_overlapping(resource_id, start, end) {
        return SlotStatus::Yours;
    }
    if ctx.availability.is_available(resource_id, hour) {
        return SlotStatus::Available;
    }
    SlotStatus::Unavailable
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardRow {
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub statuses: Vec<SlotStatus>,
}

/// Resolved statuses for every active resource of a type across the operating window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotBoard {
    pub date: NaiveDate,
    pub hours: Vec<u32>,
    pub rows: Vec<BoardRow>,
}

impl SlotBoard {
    pub fn resolve(resources: &[Resource], hours: &OperatingHours, ctx: &SlotContext<'_>) -> Self {
        let hours: Vec<u32> = hours.hours().collect();

        let rows = resources
            .iter()
            .filter(|resource| resource.is_active)
            .map(|resource| BoardRow {
                resource_id: resource.id.clone(),
                resource_name: resource.name.clone(),
                statuses: hours
                    .iter()
                    .map(|hour| resolve_slot_status(&resource.id, *hour, ctx))
                    .collect(),
            })
            .collect();

        Self {
            date: ctx.date,
            hours,
            rows,
        }
    }

    pub fn status(&self, resource_id: &ResourceId, hour: u32) -> Option<SlotStatus> {
        let column = self.hours.iter().position(|h| *h == hour)?;
        self.rows
            .iter()
            .find(|row| &row.resource_id == resource_id)
            .map(|row| row.statuses[column])
    }

    pub fn count(&self, status: SlotStatus) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.statuses.iter())
            .filter(|s| **s == status)
            .count()
    }

    pub fn available_per_resource(&self) -> Vec<(ResourceId, usize)> {
        self.rows
            .iter()
            .map(|row| {
                let free = row
                    .statuses
                    .iter()
                    .filter(|s| **s == SlotStatus::Available)
                    .count();
                (row.resource_id.clone(), free)
            })
            .collect()
    }
}
