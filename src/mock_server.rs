// In-memory remote authority for tests.
// Serves every endpoint the client uses, counts calls per "METHOD /path" and
// can push notifications to subscribers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::models::{
    AuthResponse, AvailabilityResponse, AvailabilitySlot, Booking, BookingId, BookingStatus,
    CancelBookingRequest, CreateBookingRequest, LoginRequest, Page, RefreshRequest, Resource,
    ResourceAvailability, ResourceId, ResourceType, SignupRequest, SlotState, UserId, UserProfile,
};
use crate::sse::{NotificationSource, NotificationStream};
use crate::transport::{ApiRequest, ApiResponse, Transport};

struct MockUser {
    profile: UserProfile,
    password: String,
}

#[derive(Default)]
struct MockState {
    calls: HashMap<String, usize>,
    resources: Vec<Resource>,
    bookings: Vec<Booking>,
    users: Vec<MockUser>,
    expired_tokens: HashSet<String>,
    issued_tokens: HashSet<String>,
    refresh_tokens: HashSet<String>,
    require_auth: bool,
    timestamp_slots: bool,
    next_id: u64,
    delay_ms: u64,
    fail_next: usize,
    streams_refused: bool,
    subscribers: Vec<mpsc::UnboundedSender<Result<(), ApiError>>>,
    stream_opens: usize,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn issue_tokens(&mut self, user: Option<UserProfile>) -> AuthResponse {
        let n = self.next_id();
        let access_token = format!("access-{}", n);
        let refresh_token = format!("refresh-{}", n);
        self.issued_tokens.insert(access_token.clone());
        self.refresh_tokens.insert(refresh_token.clone());
        AuthResponse {
            access_token,
            refresh_token,
            user,
        }
    }

    fn conflicts(&self, resource_id: &ResourceId, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.bookings
            .iter()
            .any(|b| b.is_active() && &b.resource_id == resource_id && b.overlaps(start, end))
    }
}

pub struct MockServer {
    state: Mutex<MockState>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn add_resource(&self, id: &str, name: &str, resource_type: ResourceType) {
        self.state.lock().resources.push(Resource {
            id: ResourceId::new(id),
            name: name.to_string(),
            resource_type,
            location: "HQ".to_string(),
            capacity: 4,
            is_active: true,
        });
    }

    pub fn add_user(&self, id: &str, email: &str, password: &str) {
        self.state.lock().users.push(MockUser {
            profile: UserProfile {
                id: UserId::new(id),
                email: email.to_string(),
                name: email.split('@').next().unwrap_or(email).to_string(),
            },
            password: password.to_string(),
        });
    }

    /// Requests carrying this token get a 401.
    pub fn expire_token(&self, token: &str) {
        let mut state = self.state.lock();
        state.issued_tokens.remove(token);
        state.expired_tokens.insert(token.to_string());
    }

    pub fn accept_token(&self, token: &str) {
        let mut state = self.state.lock();
        state.expired_tokens.remove(token);
        state.issued_tokens.insert(token.to_string());
    }

    pub fn accept_refresh_token(&self, token: &str) {
        self.state.lock().refresh_tokens.insert(token.to_string());
    }

    /// Reject requests without a token issued by this server.
    pub fn set_require_auth(&self, require: bool) {
        self.state.lock().require_auth = require;
    }

    /// Report slot boundaries as RFC 3339 timestamps instead of "HH:MM".
    pub fn set_timestamp_slots(&self, enabled: bool) {
        self.state.lock().timestamp_slots = enabled;
    }

    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.state.lock().delay_ms = delay_ms;
    }

    /// The next `count` requests fail at the transport level.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    pub fn calls(&self, route: &str) -> usize {
        self.state.lock().calls.get(route).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.state.lock().bookings.clone()
    }

    /// Books directly, as another client would.
    pub fn book_as(
        &self,
        user_id: &str,
        resource_id: &str,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> BookingId {
        let mut state = self.state.lock();
        let id = BookingId::new(format!("b-{}", state.next_id()));
        state.bookings.push(Booking {
            id: id.clone(),
            user_id: UserId::new(user_id),
            resource_id: ResourceId::new(resource_id),
            start_utc,
            end_utc,
            status: BookingStatus::Active,
            created_at: Utc::now(),
            cancelled_at: None,
        });
        id
    }

    // Notifications

    pub fn set_streams_available(&self, available: bool) {
        self.state.lock().streams_refused = !available;
    }

    /// Pushes one notification to every open stream. Returns how many received it.
    pub fn notify(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| tx.send(Ok(())).is_ok());
        state.subscribers.len()
    }

    /// Fails every open stream.
    pub fn break_streams(&self) {
        let mut state = self.state.lock();
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(Err(ApiError::StreamError("connection reset".to_string())));
        }
    }

    pub fn open_streams(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    pub fn stream_opens(&self) -> usize {
        self.state.lock().stream_opens
    }

    fn handle(&self, request: &ApiRequest, bearer: Option<&str>) -> ApiResponse {
        let mut state = self.state.lock();
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

        match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["auth", "login"]) => {
                let Ok(login) = body::<LoginRequest>(request) else {
                    return problem(400, "Bad Request", "Invalid login payload");
                };
                let profile = state
                    .users
                    .iter()
                    .find(|u| u.profile.email == login.email && u.password == login.password)
                    .map(|u| u.profile.clone());
                match profile {
                    Some(profile) => ApiResponse::json(200, &state.issue_tokens(Some(profile))),
                    None => problem(401, "Unauthorized", "Invalid email or password"),
                }
            }
            ("POST", ["auth", "signup"]) => {
                let Ok(signup) = body::<SignupRequest>(request) else {
                    return problem(400, "Bad Request", "Invalid signup payload");
                };
                if state.users.iter().any(|u| u.profile.email == signup.email) {
                    return problem(409, "Conflict", "Email already registered");
                }
                let profile = UserProfile {
                    id: UserId::new(format!("u-{}", state.next_id())),
                    email: signup.email,
                    name: signup.name,
                };
                state.users.push(MockUser {
                    profile: profile.clone(),
                    password: signup.password,
                });
                ApiResponse::json(201, &state.issue_tokens(Some(profile)))
            }
            ("POST", ["auth", "refresh"]) => {
                let Ok(refresh) = body::<RefreshRequest>(request) else {
                    return problem(400, "Bad Request", "Invalid refresh payload");
                };
                if !state.refresh_tokens.remove(&refresh.refresh_token) {
                    return problem(401, "Unauthorized", "Refresh token rejected");
                }
                ApiResponse::json(200, &state.issue_tokens(None))
            }
            _ => {
                if let Some(rejection) = authorize(&state, bearer) {
                    return rejection;
                }
                route_authorized(&mut state, &segments, request)
            }
        }
    }
}

fn authorize(state: &MockState, bearer: Option<&str>) -> Option<ApiResponse> {
    let rejected = match bearer {
        Some(token) if state.expired_tokens.contains(token) => true,
        Some(token) => state.require_auth && !state.issued_tokens.contains(token),
        None => state.require_auth,
    };
    rejected.then(|| problem(401, "Unauthorized", "Access token expired"))
}

fn route_authorized(
    state: &mut MockState,
    segments: &[&str],
    request: &ApiRequest,
) -> ApiResponse {
    match (request.method.as_str(), segments) {
        ("GET", ["resources"]) => {
            let resource_type = request.query_value("type").and_then(|t| t.parse().ok());
            let page_number = query_u32(request, "pageNumber", 1).max(1);
            let page_size = query_u32(request, "pageSize", 20).max(1);

            let matching: Vec<Resource> = state
                .resources
                .iter()
                .filter(|r| resource_type.map_or(true, |t| r.resource_type == t))
                .cloned()
                .collect();
            let items = matching
                .iter()
                .skip(((page_number - 1) * page_size) as usize)
                .take(page_size as usize)
                .cloned()
                .collect();

            ApiResponse::json(
                200,
                &Page {
                    items,
                    total_count: matching.len() as u64,
                    page_number,
                    page_size,
                },
            )
        }
        ("GET", ["resources", "available"]) => {
            let resource_type: Option<ResourceType> =
                request.query_value("type").and_then(|t| t.parse().ok());
            let start = request.query_value("startUtc").and_then(parse_instant);
            let end = request.query_value("endUtc").and_then(parse_instant);
            let (Some(start), Some(end)) = (start, end) else {
                return problem(400, "Bad Request", "startUtc and endUtc are required");
            };

            let free: Vec<Resource> = state
                .resources
                .iter()
                .filter(|r| r.is_active && resource_type.map_or(true, |t| r.resource_type == t))
                .filter(|r| !state.conflicts(&r.id, start, end))
                .cloned()
                .collect();
            ApiResponse::json(200, &free)
        }
        ("GET", ["resources", "availability"]) => availability(state, request),
        ("POST", ["bookings"]) => {
            let Ok(create) = body::<CreateBookingRequest>(request) else {
                return problem(400, "Bad Request", "Invalid booking payload");
            };
            if create.end_utc <= create.start_utc {
                return problem(400, "Bad Request", "End time must be after start time");
            }
            if !state.resources.iter().any(|r| r.id == create.resource_id) {
                return problem(
                    404,
                    "Not Found",
                    &format!("Resource {} not found", create.resource_id),
                );
            }
            if state.conflicts(&create.resource_id, create.start_utc, create.end_utc) {
                return problem(
                    409,
                    "Conflict",
                    "Resource is already booked for the requested time",
                );
            }

            let booking = Booking {
                id: BookingId::new(format!("b-{}", state.next_id())),
                user_id: create.user_id,
                resource_id: create.resource_id,
                start_utc: create.start_utc,
                end_utc: create.end_utc,
                status: BookingStatus::Active,
                created_at: Utc::now(),
                cancelled_at: None,
            };
            state.bookings.push(booking.clone());
            ApiResponse::json(201, &booking)
        }
        ("GET", ["bookings", "user", user_id]) => {
            let page_number = query_u32(request, "pageNumber", 1).max(1);
            let page_size = query_u32(request, "pageSize", 20).max(1);
            let owned: Vec<Booking> = state
                .bookings
                .iter()
                .filter(|b| b.user_id.as_str() == *user_id)
                .cloned()
                .collect();
            let items = owned
                .iter()
                .skip(((page_number - 1) * page_size) as usize)
                .take(page_size as usize)
                .cloned()
                .collect();

            ApiResponse::json(
                200,
                &Page {
                    items,
                    total_count: owned.len() as u64,
                    page_number,
                    page_size,
                },
            )
        }
        ("GET", ["bookings", booking_id]) => {
            match state.bookings.iter().find(|b| b.id.as_str() == *booking_id) {
                Some(booking) => ApiResponse::json(200, booking),
                None => problem(404, "Not Found", &format!("Booking {} not found", booking_id)),
            }
        }
        ("DELETE", ["bookings", booking_id, "cancel"]) => {
            let Ok(cancel) = body::<CancelBookingRequest>(request) else {
                return problem(400, "Bad Request", "Invalid cancellation payload");
            };
            let Some(booking) = state
                .bookings
                .iter_mut()
                .find(|b| b.id.as_str() == *booking_id)
            else {
                return problem(404, "Not Found", &format!("Booking {} not found", booking_id));
            };
            if booking.user_id != cancel.user_id {
                return problem(403, "Forbidden", "Booking belongs to another user");
            }
            if !booking.is_active() {
                return problem(400, "Bad Request", "Booking is already cancelled");
            }

            booking.status = BookingStatus::Cancelled;
            booking.cancelled_at = Some(Utc::now());
            ApiResponse::json(200, &*booking)
        }
        _ => problem(404, "Not Found", &format!("No route for {} {}", request.method, request.path)),
    }
}

fn availability(state: &MockState, request: &ApiRequest) -> ApiResponse {
    let resource_type: Option<ResourceType> =
        request.query_value("type").and_then(|t| t.parse().ok());
    let date = request
        .query_value("date")
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    let start = request
        .query_value("startTime")
        .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok());
    let end = request
        .query_value("endTime")
        .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok());
    let slot_minutes = i64::from(query_u32(request, "slotDuration", 60).max(1));

    let (Some(resource_type), Some(date), Some(start), Some(end)) =
        (resource_type, date, start, end)
    else {
        return problem(400, "Bad Request", "type, date, startTime and endTime are required");
    };

    let day_end = date.and_time(end).and_utc();
    let resources = state
        .resources
        .iter()
        .filter(|r| r.is_active && r.resource_type == resource_type)
        .map(|resource| {
            let mut slots = Vec::new();
            let mut slot_start = date.and_time(start).and_utc();
            while slot_start < day_end {
                let slot_end = slot_start + chrono::Duration::minutes(slot_minutes);
                let status = if state.conflicts(&resource.id, slot_start, slot_end) {
                    SlotState::Booked
                } else {
                    SlotState::Available
                };
                let (start_time, end_time) = if state.timestamp_slots {
                    (slot_start.to_rfc3339(), slot_end.to_rfc3339())
                } else {
                    (
                        slot_start.format("%H:%M").to_string(),
                        slot_end.format("%H:%M").to_string(),
                    )
                };
                slots.push(AvailabilitySlot {
                    start_time,
                    end_time,
                    status,
                    is_user_booking: None,
                });
                slot_start = slot_end;
            }

            ResourceAvailability {
                resource_id: resource.id.clone(),
                resource_name: Some(resource.name.clone()),
                slots,
            }
        })
        .collect();

    ApiResponse::json(
        200,
        &AvailabilityResponse {
            date: Some(date),
            resources,
        },
    )
}

fn problem(status: u16, title: &str, detail: &str) -> ApiResponse {
    ApiResponse::json(
        status,
        &json!({ "title": title, "status": status, "detail": detail }),
    )
}

fn body<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiError> {
    let value = request.body.clone().unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(value)?)
}

fn query_u32(request: &ApiRequest, key: &str, default: u32) -> u32 {
    request
        .query_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl Transport for MockServer {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let delay_ms = {
            let mut state = self.state.lock();
            *state
                .calls
                .entry(format!("{} {}", request.method, request.path))
                .or_default() += 1;
            state.delay_ms
        };

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        {
            let mut state = self.state.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(ApiError::NetworkError("connection refused".to_string()));
            }
        }

        Ok(self.handle(request, bearer))
    }
}

#[async_trait]
impl NotificationSource for MockServer {
    async fn open(&self) -> Result<NotificationStream, ApiError> {
        let mut state = self.state.lock();
        state.stream_opens += 1;
        if state.streams_refused {
            return Err(ApiError::StreamError(
                "subscription refused with status 503".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);

        let notifications = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(notifications.boxed())
    }
}
