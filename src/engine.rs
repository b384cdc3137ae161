// Booking engine facade
// Owns the caches, the invalidation bus, the sync channel and the transaction flows
// for one signed-in client.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::availability::{AvailabilityCache, AvailabilityKey, HourAvailabilityMap};
use crate::bus::{InvalidationBus, Topic};
use crate::catalog::ResourceCatalog;
use crate::client::{AuthenticatedClient, BookingApi};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::ledger::BookingLedger;
use crate::models::{Booking, BookingId, LoginRequest, ResourceType, SignupRequest, UserId, UserProfile};
use crate::resolver::{is_bookable, SlotBoard, SlotContext};
use crate::session::{Session, SessionStorage};
use crate::sse::{NotificationSource, SseNotificationSource};
use crate::sync::{SyncChannel, Visibility};
use crate::transactions::{BookingSlot, TransactionFlows};
use crate::transport::{HttpTransport, Transport};

pub struct BookingEngine {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    api: BookingApi,
    catalog: ResourceCatalog,
    ledger: BookingLedger,
    availability: AvailabilityCache,
    bus: InvalidationBus,
    flows: TransactionFlows,
    sync: SyncChannel,
    listener: JoinHandle<()>,
}

impl BookingEngine {
    /// Wire an engine over the given seams. Must be called inside a tokio runtime.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        notifications: Arc<dyn NotificationSource>,
        session: Arc<Session>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let api = BookingApi::new(Arc::new(AuthenticatedClient::new(transport, session)));
        let cache_config = config.cache_config.clone();
        let retry = config.retry_config.clone();

        let catalog = ResourceCatalog::new(api.clone(), cache_config.clone(), retry.clone());
        let ledger = BookingLedger::new(api.clone(), cache_config.clone(), retry.clone());
        let availability = AvailabilityCache::new(
            api.clone(),
            config.operating_hours,
            cache_config,
            retry,
        );
        let bus = InvalidationBus::default();
        let flows = TransactionFlows::new(
            api.clone(),
            ledger.clone(),
            availability.clone(),
            bus.clone(),
            config.operating_hours,
        );
        let sync = SyncChannel::new(
            availability.clone(),
            notifications,
            config.sync_config.clone(),
            Visibility::default(),
        );
        let listener = spawn_catalog_listener(&bus, catalog.clone());

        Self {
            config,
            clock,
            api,
            catalog,
            ledger,
            availability,
            bus,
            flows,
            sync,
            listener,
        }
    }

    /// Engine over HTTP and server-sent events, restoring any persisted session.
    pub fn connect(config: ClientConfig, storage: impl SessionStorage) -> Result<Self, ApiError> {
        let session = Arc::new(Session::new(storage));
        if session.restore()? {
            info!("resumed persisted session");
        }

        let transport = Arc::new(HttpTransport::new(&config)?);
        let notifications = Arc::new(SseNotificationSource::new(&config, session.clone())?);
        Ok(Self::new(
            config,
            transport,
            notifications,
            session,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        self.api.session()
    }

    pub fn api(&self) -> &BookingApi {
        &self.api
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &BookingLedger {
        &self.ledger
    }

    pub fn availability(&self) -> &AvailabilityCache {
        &self.availability
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn sync(&self) -> &SyncChannel {
        &self.sync
    }

    pub fn visibility(&self) -> &Visibility {
        self.sync.visibility()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<UserProfile>, ApiError> {
        self.api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.sync.reset_booking_count();
        Ok(self.session().user())
    }

    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Option<UserProfile>, ApiError> {
        self.api
            .signup(&SignupRequest {
                email: email.to_string(),
                password: password.to_string(),
                name: name.to_string(),
            })
            .await?;
        self.sync.reset_booking_count();
        Ok(self.session().user())
    }

    /// Stops syncing, drops every cached value and clears the session.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.sync.stop();
        self.sync.reset_booking_count();
        self.catalog.cache().clear();
        self.ledger.cache().clear();
        self.availability.cache().clear();
        self.api.logout()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn is_bookable(&self, date: NaiveDate) -> bool {
        is_bookable(date, self.clock.today(), &self.config.booking_policy)
    }

    fn require_user(&self) -> Result<UserId, ApiError> {
        self.session().user_id().ok_or(ApiError::SessionExpired)
    }

    /// The signed-in user's bookings, served stale-while-revalidate. Every
    /// read feeds the sync channel's booking-count guard.
    pub async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let user_id = self.require_user()?;
        let bookings = self.ledger.cached_bookings(&user_id).await?;
        self.sync.observe_booking_count(bookings.len());
        Ok(bookings)
    }

    async fn availability_map(
        &self,
        resource_type: ResourceType,
        date: NaiveDate,
    ) -> Result<HourAvailabilityMap, ApiError> {
        let key = AvailabilityKey::new(resource_type, date);
        match self.availability.read(&key) {
            Some(cached) => Ok(cached.value),
            None => self.availability.fetch(resource_type, date).await,
        }
    }

    /// Resolve every active resource of a type for every operating hour of `date`.
    pub async fn board(
        &self,
        resource_type: ResourceType,
        date: NaiveDate,
    ) -> Result<SlotBoard, ApiError> {
        let user_id = self.require_user()?;
        let resources = self.catalog.all_of_type(resource_type).await?;
        let availability = self.availability_map(resource_type, date).await?;
        let bookings = self.my_bookings().await?;

        let ctx = SlotContext::new(
            date,
            self.clock.now(),
            self.clock.today(),
            &self.config.booking_policy,
            &availability,
            &bookings,
        )
        .for_user(&user_id);

        Ok(SlotBoard::resolve(&resources, &self.config.operating_hours, &ctx))
    }

    /// Enter the sync scope for a type and date. Outside the scope (no
    /// resources of the type, or a date that cannot be booked) syncing stops
    /// and `false` is returned.
    pub async fn watch(&self, resource_type: ResourceType, date: NaiveDate) -> Result<bool, ApiError> {
        if !self.is_bookable(date) {
            debug!(%date, "date outside booking window, not syncing");
            self.sync.stop();
            return Ok(false);
        }

        let resources = self.catalog.all_of_type(resource_type).await?;
        if resources.is_empty() {
            debug!(%resource_type, "no resources, not syncing");
            self.sync.stop();
            return Ok(false);
        }

        self.sync.start(AvailabilityKey::new(resource_type, date));
        Ok(true)
    }

    pub fn unwatch(&self) {
        self.sync.stop();
    }

    /// Book one slot for the signed-in user. A conflict means the cached
    /// availability was wrong, so it is revalidated before the error is returned.
    pub async fn book(&self, slot: &BookingSlot) -> Result<Booking, ApiError> {
        let user_id = self.require_user()?;
        let result = self.flows.create_booking(slot, &user_id).await;

        if let Err(e) = &result {
            if e.is_conflict() {
                self.availability.invalidate_type(slot.resource_type);
            }
        }
        result
    }

    pub async fn cancel(&self, booking_id: &BookingId) -> Result<Option<Booking>, ApiError> {
        let user_id = self.require_user()?;
        self.flows.cancel_booking(booking_id, &user_id).await
    }
}

impl Drop for BookingEngine {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Catalog entries depend on `resources:<Type>` topics.
fn spawn_catalog_listener(bus: &InvalidationBus, catalog: ResourceCatalog) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        while let Some(topic) = subscription.next().await {
            if let Topic::Resources(resource_type) = topic {
                let invalidated = catalog.invalidate_type(resource_type);
                debug!(%resource_type, invalidated, "catalog refresh");
            }
        }
    })
}
