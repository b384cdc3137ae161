// Availability cache
// Reduces slot-granularity availability into hour -> free resource ids, per (type, date).
// The map is rebuilt from scratch on every fetch and never patched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use futures::FutureExt;
use tracing::warn;

use crate::cache::{Cached, Fetcher, KeyedCache};
use crate::client::BookingApi;
use crate::config::{CacheConfig, OperatingHours, RetryConfig};
use crate::error::ApiError;
use crate::models::{AvailabilityResponse, AvailabilitySlot, ResourceId, ResourceType, SlotState};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvailabilityKey {
    pub resource_type: ResourceType,
    pub date: NaiveDate,
}

impl AvailabilityKey {
    pub fn new(resource_type: ResourceType, date: NaiveDate) -> Self {
        Self {
            resource_type,
            date,
        }
    }
}

/// Hour of day -> resources free for that whole hour. Absent means unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourAvailabilityMap {
    hours: BTreeMap<u32, BTreeSet<ResourceId>>,
}

impl HourAvailabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hour: u32, resource_id: ResourceId) {
        self.hours.entry(hour).or_default().insert(resource_id);
    }

    pub fn is_available(&self, resource_id: &ResourceId, hour: u32) -> bool {
        self.hours
            .get(&hour)
            .map_or(false, |free| free.contains(resource_id))
    }

    pub fn free_at(&self, hour: u32) -> impl Iterator<Item = &ResourceId> {
        self.hours.get(&hour).into_iter().flatten()
    }

    pub fn hours(&self) -> impl Iterator<Item = u32> + '_ {
        self.hours.keys().copied()
    }

    /// Number of free hours for a resource.
    pub fn free_hours(&self, resource_id: &ResourceId) -> usize {
        self.hours
            .values()
            .filter(|free| free.contains(resource_id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }
}

/// Minutes since midnight of a slot boundary. Accepts "HH:MM", "HH:MM:SS",
/// RFC 3339 timestamps (read in UTC) and naive ISO timestamps.
pub fn parse_slot_boundary(raw: &str) -> Option<u32> {
    let raw = raw.trim();

    let time = NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc).time())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|ts| ts.time())
        })?;

    Some(time.hour() * 60 + time.minute())
}

/// Whole hours `[h:00, h+1:00)` contained in the slot. A slot ending at
/// midnight (or wrapping past it) runs to the end of the day; a zero-length
/// slot covers nothing.
pub fn slot_hours(slot: &AvailabilitySlot) -> Option<std::ops::Range<u32>> {
    let start = parse_slot_boundary(&slot.start_time)?;
    let mut end = parse_slot_boundary(&slot.end_time)?;
    if end == start {
        return Some(start / 60..start / 60);
    }
    if end < start {
        end = 24 * 60;
    }

    let first = (start + 59) / 60;
    let last = end / 60;
    Some(first..last.max(first))
}

pub fn reduce_availability(
    response: &AvailabilityResponse,
    hours: &OperatingHours,
) -> HourAvailabilityMap {
    let mut map = HourAvailabilityMap::new();

    for resource in &response.resources {
        for slot in &resource.slots {
            if slot.status != SlotState::Available {
                continue;
            }

            let Some(covered) = slot_hours(slot) else {
                warn!(
                    resource = %resource.resource_id,
                    start = %slot.start_time,
                    end = %slot.end_time,
                    "skipping slot with unreadable boundaries"
                );
                continue;
            };

            for hour in covered.filter(|h| hours.contains(*h)) {
                map.insert(hour, resource.resource_id.clone());
            }
        }
    }

    map
}

#[derive(Clone)]
pub struct AvailabilityCache {
    cache: KeyedCache<AvailabilityKey, HourAvailabilityMap>,
}

impl AvailabilityCache {
    pub fn new(
        api: BookingApi,
        hours: OperatingHours,
        config: CacheConfig,
        retry: RetryConfig,
    ) -> Self {
        let fetcher: Fetcher<AvailabilityKey, HourAvailabilityMap> =
            Arc::new(move |key: AvailabilityKey| {
                let api = api.clone();
                async move {
                    let response = api
                        .availability(key.resource_type, key.date, &hours)
                        .await?;
                    Ok(reduce_availability(&response, &hours))
                }
                .boxed()
            });

        Self {
            cache: KeyedCache::new("availability", config, retry, fetcher),
        }
    }

    pub async fn fetch(
        &self,
        resource_type: ResourceType,
        date: NaiveDate,
    ) -> Result<HourAvailabilityMap, ApiError> {
        self.cache.get(&AvailabilityKey::new(resource_type, date)).await
    }

    pub fn read(&self, key: &AvailabilityKey) -> Option<Cached<HourAvailabilityMap>> {
        self.cache.read(key)
    }

    pub fn peek(&self, key: &AvailabilityKey) -> Option<Cached<HourAvailabilityMap>> {
        self.cache.peek(key)
    }

    pub async fn revalidate(&self, key: &AvailabilityKey) -> Result<HourAvailabilityMap, ApiError> {
        self.cache.revalidate(key).await
    }

    pub fn revalidate_in_background(&self, key: &AvailabilityKey) {
        self.cache.revalidate_in_background(key)
    }

    /// Every cached date of one resource type.
    pub fn invalidate_type(&self, resource_type: ResourceType) -> usize {
        self.cache.invalidate(|key| key.resource_type == resource_type)
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate(|_| true)
    }

    pub fn abandon(&self, key: &AvailabilityKey) -> usize {
        self.cache.abandon(|k| k == key)
    }

    pub fn cache(&self) -> &KeyedCache<AvailabilityKey, HourAvailabilityMap> {
        &self.cache
    }
}
