// Data model exchanged with the remote authority.
// Everything here is owned by the server; the client only caches it.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
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

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(ResourceId);
string_id!(UserId);
string_id!(BookingId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Room,
    Desk,
    ParkingSpot,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Room,
        ResourceType::Desk,
        ResourceType::ParkingSpot,
    ];

    /// Name used in query strings and topic names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Room => "Room",
            ResourceType::Desk => "Desk",
            ResourceType::ParkingSpot => "ParkingSpot",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource type '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub resource_id: ResourceId,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    /// Half-open overlap with `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_utc < end && self.end_utc > start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default = "first_page")]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: u32,
}

fn first_page() -> u32 {
    1
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Available,
    Booked,
}

/// A single server-reported slot. Boundaries are either "HH:MM" or full timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlot {
    pub start_time: String,
    pub end_time: String,
    pub status: SlotState,
    #[serde(default)]
    pub is_user_booking: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAvailability {
    pub resource_id: ResourceId,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub slots: Vec<AvailabilitySlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub resources: Vec<ResourceAvailability>,
}

// Auth payloads

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

// Booking payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_booking_wire_format() {
        let json = r#"{
            "id": "b-1",
            "userId": "u-1",
            "resourceId": "room-a",
            "startUtc": "2026-10-17T10:00:00Z",
            "endUtc": "2026-10-17T11:00:00Z",
            "status": "Active",
            "createdAt": "2026-10-16T08:12:00Z"
        }"#;

        let booking: Booking = serde_json::from_str(json).unwrap();
        assert_eq!(booking.resource_id, ResourceId::new("room-a"));
        assert!(booking.is_active());
        assert!(booking.cancelled_at.is_none());
    }

    #[test]
    fn test_resource_defaults() {
        let json = r#"{"id": "desk-7", "name": "Desk 7", "type": "Desk"}"#;
        let resource: Resource = serde_json::from_str(json).unwrap();
        assert_eq!(resource.resource_type, ResourceType::Desk);
        assert!(resource.is_active);
        assert_eq!(resource.capacity, 0);
    }

    #[test]
    fn test_half_open_overlap() {
        let booking = Booking {
            id: BookingId::new("b"),
            user_id: UserId::new("u"),
            resource_id: ResourceId::new("r"),
            start_utc: Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap(),
            end_utc: Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap(),
            status: BookingStatus::Active,
            created_at: Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap(),
            cancelled_at: None,
        };

        let at = |h| Utc.with_ymd_and_hms(2026, 10, 17, h, 0, 0).unwrap();
        assert!(booking.overlaps(at(10), at(11)));
        assert!(!booking.overlaps(at(11), at(12)));
        assert!(!booking.overlaps(at(9), at(10)));
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("parkingspot".parse::<ResourceType>(), Ok(ResourceType::ParkingSpot));
        assert!("boat".parse::<ResourceType>().is_err());
    }
}
