//! API client for the appointment server.

use std::time::Duration;

use rand::Rng;
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentDateMap, User};
use crate::utils::PatchOperation;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default server address for local development
pub const DEFAULT_BASE_URL: &str = "http://localhost:3030";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound of the random jitter added to each backoff.
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct AppointmentResponse {
    appointment: Appointment,
}

#[derive(Debug, Deserialize)]
struct UserAppointmentsResponse {
    appointments: Vec<Appointment>,
}

#[derive(Debug, Serialize)]
struct UserPatchBody<'a> {
    patch: &'a [PatchOperation],
}

#[derive(Debug, Serialize)]
struct AppointmentPatchBody<'a> {
    data: &'a [PatchOperation],
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// API client for the appointment server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::Unauthorized)?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn parse<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, ApiError> {
        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
    }

    /// Send the request built by `build`, retrying rate-limited responses.
    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let body = response.text().await?;
                    return Self::parse(url, &body);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<T, ApiError> {
        let headers = Self::auth_headers(token)?;
        self.send(url, || {
            self.client
                .get(url)
                .headers(headers.clone())
                .query(query)
        })
        .await
    }

    async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<T, ApiError> {
        let headers = Self::auth_headers(token)?;
        self.send(url, || self.client.patch(url).headers(headers.clone()).json(body))
            .await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T, ApiError> {
        self.send(url, || self.client.post(url).json(body)).await
    }

    // ===== User =====

    /// Fetch the server's copy of `user`. Signed out (`None`) resolves to `None`.
    pub async fn fetch_user(&self, user: Option<&User>) -> Result<Option<User>, ApiError> {
        let Some(user) = user else {
            return Ok(None);
        };
        let url = self.url(&format!("user/{}", user.id));
        debug!(user_id = user.id, "Fetching user");
        let response: UserResponse = self.get(&url, &[], user.token.as_deref()).await?;
        Ok(Some(response.user.with_token_from(user)))
    }

    /// Send a JSON patch for `original` and return the server's canonical user.
    pub async fn patch_user(&self, original: &User, patch: &[PatchOperation]) -> Result<User, ApiError> {
        let url = self.url(&format!("user/{}", original.id));
        debug!(user_id = original.id, ops = patch.len(), "Patching user");
        let response: UserResponse = self
            .patch(&url, &UserPatchBody { patch }, original.token.as_deref())
            .await?;
        Ok(response.user.with_token_from(original))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let url = self.url("signin");
        let response: UserResponse = self.post(&url, &Credentials { email, password }).await?;
        Ok(response.user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let url = self.url("user");
        let response: UserResponse = self.post(&url, &Credentials { email, password }).await?;
        Ok(response.user)
    }

    // ===== Appointments =====

    pub async fn fetch_appointments(&self, year: i32, month: u32) -> Result<AppointmentDateMap, ApiError> {
        let url = self.url("appointments");
        debug!(year, month, "Fetching appointments");
        self.get(
            &url,
            &[("year", year.to_string()), ("month", month.to_string())],
            None,
        )
        .await
    }

    pub async fn fetch_user_appointments(&self, user: &User) -> Result<Vec<Appointment>, ApiError> {
        let url = self.url(&format!("user/{}/appointments", user.id));
        let response: UserAppointmentsResponse =
            self.get(&url, &[], user.token.as_deref()).await?;
        Ok(response.appointments)
    }

    pub async fn patch_appointment(
        &self,
        appointment_id: i64,
        data: &[PatchOperation],
        token: Option<&str>,
    ) -> Result<Appointment, ApiError> {
        let url = self.url(&format!("appointment/{}", appointment_id));
        debug!(appointment_id, ops = data.len(), "Patching appointment");
        let response: AppointmentResponse = self
            .patch(&url, &AppointmentPatchBody { data }, token)
            .await?;
        Ok(response.appointment)
    }
}

// ============================================================================
// Tests
// ============================================================================
