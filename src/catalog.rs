// Resource catalog cache, one entry per (type, page).

use std::sync::Arc;

use futures::FutureExt;

use crate::cache::{Cached, Fetcher, KeyedCache};
use crate::client::BookingApi;
use crate::config::{CacheConfig, RetryConfig};
use crate::error::ApiError;
use crate::models::{Page, Resource, ResourceType};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogKey {
    pub resource_type: ResourceType,
    pub page_number: u32,
    pub page_size: u32,
}

impl CatalogKey {
    pub fn new(resource_type: ResourceType, page_number: u32, page_size: u32) -> Self {
        Self {
            resource_type,
            page_number,
            page_size,
        }
    }
}

#[derive(Clone)]
pub struct ResourceCatalog {
    cache: KeyedCache<CatalogKey, Page<Resource>>,
}

impl ResourceCatalog {
    pub fn new(api: BookingApi, config: CacheConfig, retry: RetryConfig) -> Self {
        let fetcher: Fetcher<CatalogKey, Page<Resource>> = Arc::new(move |key: CatalogKey| {
            let api = api.clone();
            async move {
                api.resources(key.resource_type, key.page_number, key.page_size)
                    .await
            }
            .boxed()
        });

        Self {
            cache: KeyedCache::new("catalog", config, retry, fetcher),
        }
    }

    pub async fn page(
        &self,
        resource_type: ResourceType,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page<Resource>, ApiError> {
        self.cache
            .get(&CatalogKey::new(resource_type, page_number, page_size))
            .await
    }

    pub fn read(&self, key: &CatalogKey) -> Option<Cached<Page<Resource>>> {
        self.cache.read(key)
    }

    /// Every resource of a type, walking pages until the reported total is reached.
    pub async fn all_of_type(&self, resource_type: ResourceType) -> Result<Vec<Resource>, ApiError> {
        let mut resources = Vec::new();
        let mut page_number = 1;

        loop {
            let page = self
                .page(resource_type, page_number, DEFAULT_PAGE_SIZE)
                .await?;
            let fetched = page.items.len();
            resources.extend(page.items);

            if fetched == 0 || resources.len() as u64 >= page.total_count {
                break;
            }
            page_number += 1;
        }

        Ok(resources)
    }

    pub fn invalidate_type(&self, resource_type: ResourceType) -> usize {
        self.cache.invalidate(|key| key.resource_type == resource_type)
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate(|_| true)
    }

    pub fn cache(&self) -> &KeyedCache<CatalogKey, Page<Resource>> {
        &self.cache
    }
}
