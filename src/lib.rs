// Client-side booking engine: session handling, cached catalog/ledger/availability,
// slot status resolution, real-time sync and booking transactions.

pub mod availability;
pub mod bus;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod resolver;
pub mod session;
pub mod sse;
pub mod sync;
pub mod transactions;
pub mod transport;

#[cfg(test)]
mod mock_server;

// Re-export key types for convenience
pub use availability::{AvailabilityCache, AvailabilityKey, HourAvailabilityMap};
pub use bus::{InvalidationBus, Topic};
pub use cache::{CacheStatsReport, KeyedCache};
pub use catalog::{CatalogKey, ResourceCatalog};
pub use client::{AuthenticatedClient, BookingApi};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{BookingPolicy, CacheConfig, ClientConfig, OperatingHours, RetryConfig, SyncConfig};
pub use engine::BookingEngine;
pub use error::{ApiError, ErrorKind, ProblemDetails};
pub use ledger::{BookingLedger, LedgerKey};
pub use resolver::{resolve_slot_status, SlotBoard, SlotContext, SlotStatus};
pub use session::{FileSessionStorage, MemorySessionStorage, Session, SessionStorage};
pub use sse::{NotificationSource, SseNotificationSource};
pub use sync::{SyncChannel, SyncState, Visibility};
pub use transactions::{BookingSlot, TransactionFlows};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
