// Booking and cancellation flows.
// A flow only touches local caches after the remote authority accepted it.
// Submissions are never deduplicated here.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::availability::AvailabilityCache;
use crate::bus::{InvalidationBus, Topic};
use crate::client::BookingApi;
use crate::config::OperatingHours;
use crate::error::ApiError;
use crate::ledger::BookingLedger;
use crate::models::{Booking, BookingId, CreateBookingRequest, ResourceId, ResourceType, UserId};
use crate::resolver::slot_interval;

/// One hour-long slot of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookingSlot {
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub date: NaiveDate,
    pub hour: u32,
}

impl BookingSlot {
    pub fn new(
        resource_id: ResourceId,
        resource_type: ResourceType,
        date: NaiveDate,
        hour: u32,
    ) -> Self {
        Self {
            resource_id,
            resource_type,
            date,
            hour,
        }
    }
}

#[derive(Clone)]
pub struct TransactionFlows {
    api: BookingApi,
    ledger: BookingLedger,
    availability: AvailabilityCache,
    bus: InvalidationBus,
    hours: OperatingHours,
}

impl TransactionFlows {
    pub fn new(
        api: BookingApi,
        ledger: BookingLedger,
        availability: AvailabilityCache,
        bus: InvalidationBus,
        hours: OperatingHours,
    ) -> Self {
        Self {
            api,
            ledger,
            availability,
            bus,
            hours,
        }
    }

    /// Book `[hour:00, hour+1:00)` UTC on the slot's date.
    ///
    /// On success the user's ledger and every cached date of the resource type
    /// are revalidated and the catalog is told to refresh. On failure the
    /// server's error is returned and nothing local changes.
    pub async fn create_booking(
        &self,
        slot: &BookingSlot,
        user_id: &UserId,
    ) -> Result<Booking, ApiError> {
        if !self.hours.contains(slot.hour) {
            return Err(ApiError::InvalidSlot(format!(
                "hour {} is outside operating hours {}-{}",
                slot.hour,
                self.hours.start_time(),
                self.hours.end_time()
            )));
        }

        let (start_utc, end_utc) = slot_interval(slot.date, slot.hour);
        let request = CreateBookingRequest {
            resource_id: slot.resource_id.clone(),
            user_id: user_id.clone(),
            start_utc,
            end_utc,
        };

        let booking = match self.api.create_booking(&request).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!(
                    resource = %slot.resource_id,
                    date = %slot.date,
                    hour = slot.hour,
                    error = %e,
                    "booking rejected"
                );
                return Err(e);
            }
        };

        info!(
            booking = %booking.id,
            resource = %slot.resource_id,
            date = %slot.date,
            hour = slot.hour,
            "booking created"
        );

        self.ledger.invalidate_user(user_id);
        self.availability.invalidate_type(slot.resource_type);
        self.bus.publish(Topic::Bookings(user_id.clone()));
        self.bus.publish(Topic::Availability(Some(slot.resource_type)));
        self.bus.publish(Topic::Resources(slot.resource_type));

        Ok(booking)
    }

    /// Cancel a booking. The resource type is not known here, so availability
    /// is revalidated for every type.
    pub async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        user_id: &UserId,
    ) -> Result<Option<Booking>, ApiError> {
        let cancelled = match self.api.cancel_booking(booking_id, user_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(booking = %booking_id, error = %e, "cancellation rejected");
                return Err(e);
            }
        };

        info!(booking = %booking_id, "booking cancelled");

        self.ledger.invalidate_user(user_id);
        self.availability.invalidate_all();
        self.bus.publish(Topic::Bookings(user_id.clone()));
        self.bus.publish(Topic::Availability(None));

        Ok(cancelled)
    }
}
