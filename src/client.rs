// Authenticated request client and the typed endpoint surface built on it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::OperatingHours;
use crate::error::ApiError;
use crate::models::{
    AuthResponse, AvailabilityResponse, Booking, BookingId, CancelBookingRequest,
    CreateBookingRequest, LoginRequest, Page, RefreshRequest, Resource, ResourceType,
    SignupRequest, UserId,
};
use crate::session::{Session, SessionCredentials};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Wraps a [`Transport`], attaching the session's bearer token and renewing it
/// once when the remote authority rejects it.
pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    // serializes renewals so concurrent 401s share one refresh call
    renewal: AsyncMutex<()>,
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        Self {
            transport,
            session,
            renewal: AsyncMutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Send `request` with the current access token.
    ///
    /// On a 401 the refresh token is exchanged exactly once and the request is
    /// retried exactly once. If renewal is impossible or fails, the session is
    /// cleared and [`ApiError::SessionExpired`] is returned; redirecting to
    /// sign-in is up to the caller.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.session.access_token();
        let response = self.transport.execute(&request, token.as_deref()).await?;

        if !response.is_unauthorized() {
            return response.into_result();
        }

        debug!(path = %request.path, "access token rejected, renewing");
        let renewed = self.renew(token.as_deref()).await?;

        let retried = self.transport.execute(&request, Some(&renewed)).await?;
        if retried.is_unauthorized() {
            warn!(path = %request.path, "renewed token rejected");
            self.expire();
            return Err(ApiError::SessionExpired);
        }

        retried.into_result()
    }

    /// Send without credentials and without renewal, for the auth endpoints.
    pub async fn send_anonymous(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.transport.execute(&request, None).await?.into_result()
    }

    async fn renew(&self, rejected: Option<&str>) -> Result<String, ApiError> {
        let _guard = self.renewal.lock().await;

        // someone else renewed while we waited for the lock
        if let Some(current) = self.session.access_token() {
            if rejected != Some(current.as_str()) {
                return Ok(current);
            }
        }

        let Some(refresh_token) = self.session.refresh_token() else {
            info!("no refresh token, session expired");
            self.expire();
            return Err(ApiError::SessionExpired);
        };

        let request = ApiRequest::post("/auth/refresh").json(&RefreshRequest {
            refresh_token: refresh_token.clone(),
        })?;
        let auth = match self.transport.execute(&request, None).await {
            Ok(response) if response.is_success() => response.decode::<AuthResponse>(),
            Ok(response) => Err(response
                .into_result()
                .err()
                .unwrap_or(ApiError::SessionExpired)),
            Err(e) => Err(e),
        };

        let auth = match auth {
            Ok(auth) => auth,
            Err(e) => {
                warn!(error = %e, "token renewal failed");
                self.expire();
                return Err(ApiError::SessionExpired);
            }
        };

        match self
            .session
            .renew(&refresh_token, auth.access_token.clone(), Some(auth.refresh_token))
        {
            Ok(()) => {}
            Err(ApiError::SessionExpired) => {
                info!("session ended during renewal, dropping renewed token");
                return Err(ApiError::SessionExpired);
            }
            Err(e) => {
                // the renewal counts as not having happened
                warn!(error = %e, "could not persist renewed session");
                self.expire();
                return Err(ApiError::SessionExpired);
            }
        }

        info!("access token renewed");
        Ok(auth.access_token)
    }

    fn expire(&self) {
        // clear() already logs storage failures
        let _ = self.session.clear();
    }
}

/// Typed access to every endpoint of the remote authority.
#[derive(Clone)]
pub struct BookingApi {
    client: Arc<AuthenticatedClient>,
}

impl BookingApi {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.client.session()
    }

    pub async fn signup(&self, request: &SignupRequest) -> Result<AuthResponse, ApiError> {
        let response = self
            .client
            .send_anonymous(ApiRequest::post("/auth/signup").json(request)?)
            .await?;
        let auth: AuthResponse = response.decode()?;
        self.store_session(&auth)?;
        info!(email = %request.email, "signed up");
        Ok(auth)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let response = self
            .client
            .send_anonymous(ApiRequest::post("/auth/login").json(request)?)
            .await?;
        let auth: AuthResponse = response.decode()?;
        self.store_session(&auth)?;
        info!(email = %request.email, "signed in");
        Ok(auth)
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        info!("signing out");
        self.session().clear()
    }

    fn store_session(&self, auth: &AuthResponse) -> Result<(), ApiError> {
        self.session().replace(SessionCredentials {
            access_token: auth.access_token.clone(),
            refresh_token: Some(auth.refresh_token.clone()),
            user: auth.user.clone(),
        })
    }

    pub async fn resources(
        &self,
        resource_type: ResourceType,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page<Resource>, ApiError> {
        let request = ApiRequest::get("/resources")
            .query("type", resource_type)
            .query("pageNumber", page_number)
            .query("pageSize", page_size);

        self.client.send(request).await?.decode()
    }

    /// Coarse availability: resources of a type free for the whole interval.
    pub async fn available_resources(
        &self,
        resource_type: ResourceType,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<Vec<Resource>, ApiError> {
        let request = ApiRequest::get("/resources/available")
            .query("type", resource_type)
            .query("startUtc", start_utc.to_rfc3339())
            .query("endUtc", end_utc.to_rfc3339());

        self.client.send(request).await?.decode()
    }

    /// Slot-granularity availability of every resource of a type on `date`.
    pub async fn availability(
        &self,
        resource_type: ResourceType,
        date: NaiveDate,
        hours: &OperatingHours,
    ) -> Result<AvailabilityResponse, ApiError> {
        let request = ApiRequest::get("/resources/availability")
            .query("type", resource_type)
            .query("date", date.format("%Y-%m-%d"))
            .query("startTime", hours.start_time())
            .query("endTime", hours.end_time())
            .query("slotDuration", hours.slot_minutes);

        self.client.send(request).await?.decode()
    }

    pub async fn create_booking(
        &self,
        request: &CreateBookingRequest,
    ) -> Result<Booking, ApiError> {
        let request = ApiRequest::post("/bookings").json(request)?;
        self.client.send(request).await?.decode()
    }

    pub async fn booking(&self, booking_id: &BookingId) -> Result<Booking, ApiError> {
        let request = ApiRequest::get(format!("/bookings/{}", booking_id));
        self.client.send(request).await?.decode()
    }

    pub async fn user_bookings(
        &self,
        user_id: &UserId,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, ApiError> {
        let request = ApiRequest::get(format!("/bookings/user/{}", user_id))
            .query("pageNumber", page_number)
            .query("pageSize", page_size);

        self.client.send(request).await?.decode()
    }

    /// Returns the updated booking when the server sends one back.
    pub async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        user_id: &UserId,
    ) -> Result<Option<Booking>, ApiError> {
        let request = ApiRequest::delete(format!("/bookings/{}/cancel", booking_id)).json(
            &CancelBookingRequest {
                user_id: user_id.clone(),
            },
        )?;

        let response = self.client.send(request).await?;
        if response.body.is_empty() {
            return Ok(None);
        }
        match response.decode() {
            Ok(booking) => Ok(Some(booking)),
            Err(e) => {
                // the cancellation itself went through
                warn!(booking = %booking_id, error = %e, "unreadable cancellation response");
                Ok(None)
            }
        }
    }
}
