// Booking ledger cache, one entry per (user, page). Holds active and historical bookings.

use std::sync::Arc;

use futures::FutureExt;

use crate::cache::{Cached, Fetcher, KeyedCache};
use crate::client::BookingApi;
use crate::config::{CacheConfig, RetryConfig};
use crate::error::ApiError;
use crate::models::{Booking, Page, UserId};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub user_id: UserId,
    pub page_number: u32,
    pub page_size: u32,
}

impl LedgerKey {
    pub fn new(user_id: UserId, page_number: u32, page_size: u32) -> Self {
        Self {
            user_id,
            page_number,
            page_size,
        }
    }

    pub fn first_page(user_id: UserId) -> Self {
        Self::new(user_id, 1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Clone)]
pub struct BookingLedger {
    cache: KeyedCache<LedgerKey, Page<Booking>>,
}

impl BookingLedger {
    pub fn new(api: BookingApi, config: CacheConfig, retry: RetryConfig) -> Self {
        let fetcher: Fetcher<LedgerKey, Page<Booking>> = Arc::new(move |key: LedgerKey| {
            let api = api.clone();
            async move {
                api.user_bookings(&key.user_id, key.page_number, key.page_size)
                    .await
            }
            .boxed()
        });

        Self {
            cache: KeyedCache::new("ledger", config, retry, fetcher),
        }
    }

    pub async fn page(
        &self,
        user_id: &UserId,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, ApiError> {
        self.cache
            .get(&LedgerKey::new(user_id.clone(), page_number, page_size))
            .await
    }

    /// Every booking of the user, walking all pages.
    pub async fn bookings(&self, user_id: &UserId) -> Result<Vec<Booking>, ApiError> {
        self.walk(user_id, false).await
    }

    /// Like [`BookingLedger::bookings`], but pages already in the cache are
    /// served as they are; stale ones revalidate in the background.
    pub async fn cached_bookings(&self, user_id: &UserId) -> Result<Vec<Booking>, ApiError> {
        self.walk(user_id, true).await
    }

    async fn walk(&self, user_id: &UserId, allow_stale: bool) -> Result<Vec<Booking>, ApiError> {
        let mut bookings = Vec::new();
        let mut page_number = 1;

        loop {
            let key = LedgerKey::new(user_id.clone(), page_number, DEFAULT_PAGE_SIZE);
            let page = match allow_stale.then(|| self.cache.read(&key)).flatten() {
                Some(cached) => cached.value,
                None => self.cache.get(&key).await?,
            };
            let fetched = page.items.len();
            bookings.extend(page.items);

            if fetched == 0 || bookings.len() as u64 >= page.total_count {
                break;
            }
            page_number += 1;
        }

        Ok(bookings)
    }

    pub async fn active_bookings(&self, user_id: &UserId) -> Result<Vec<Booking>, ApiError> {
        let mut bookings = self.bookings(user_id).await?;
        bookings.retain(Booking::is_active);
        Ok(bookings)
    }

    pub fn read(&self, key: &LedgerKey) -> Option<Cached<Page<Booking>>> {
        self.cache.read(key)
    }

    /// Every page cached for the user.
    pub fn invalidate_user(&self, user_id: &UserId) -> usize {
        self.cache.invalidate(|key| &key.user_id == user_id)
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate(|_| true)
    }

    pub fn cache(&self) -> &KeyedCache<LedgerKey, Page<Booking>> {
        &self.cache
    }
}
