//! Application wiring: one cache, one client, one storage, shared by every hook.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::api::{ApiClient, ErrorKind};
use crate::cache::{CacheEvent, QueryCache};
use crate::config::Config;
use crate::context::AppContext;
use crate::hooks::{
    AppointmentMutations, AppointmentsHook, AuthHook, PatchUser, UserAppointmentsHook, UserHook,
};
use crate::notify::{Notifier, ToastStatus};
use crate::storage::{FileUserStorage, UserStorage};

/// Shown when a background read is rejected for an expired session
const SESSION_EXPIRED: &str = "Session expired. Please log in again.";

pub struct App {
    pub config: Config,
    pub ctx: AppContext,
    pub user: UserHook,
    error_reporter: Option<JoinHandle<()>>,
}

impl App {
    /// Build the app from the saved config and the on-disk user.
    pub fn new(notifier: Arc<dyn Notifier>) -> Result<Self> {
        debug!("App::new() starting");
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        let data_dir = config.data_dir().unwrap_or_else(|_| PathBuf::from("./data"));
        debug!(?data_dir, "Data directory configured");

        let storage = Arc::new(FileUserStorage::new(data_dir));
        Self::from_parts(config, storage, notifier)
    }

    pub fn from_parts(
        config: Config,
        storage: Arc<dyn UserStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let api = ApiClient::new(config.api_base_url())?;
        debug!(base_url = api.base_url(), "API client configured");
        let cache = QueryCache::new(config.cache_config());
        let ctx = AppContext::new(cache, api, storage, notifier);

        let error_reporter = report_fetch_errors(&ctx);
        let user = UserHook::new(ctx.clone());

        Ok(Self {
            config,
            ctx,
            user,
            error_reporter,
        })
    }

    pub fn auth(&self) -> AuthHook {
        AuthHook::new(self.ctx.clone())
    }

    pub fn patch_user(&self) -> PatchUser {
        PatchUser::new(self.ctx.clone())
    }

    pub fn appointments(&self, today: NaiveDate) -> AppointmentsHook {
        AppointmentsHook::new(self.ctx.clone(), today)
    }

    pub fn appointment_mutations(&self) -> AppointmentMutations {
        AppointmentMutations::new(self.ctx.clone())
    }

    pub fn user_appointments(&self) -> UserAppointmentsHook {
        UserAppointmentsHook::new(self.ctx.clone())
    }

    /// Remember `email` as the last one used to sign in.
    pub fn remember_email(&mut self, email: &str) {
        if self.config.last_email.as_deref() == Some(email) {
            return;
        }
        self.config.last_email = Some(email.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(handle) = self.error_reporter.take() {
            handle.abort();
        }
    }
}

/// Turn failed background fetches into notifications.
///
/// Auth failures sign the user out; cancellations are never reported.
pub fn report_fetch_errors(ctx: &AppContext) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let mut events = ctx.cache.subscribe();
    let ctx = ctx.clone();
    Some(runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(CacheEvent::FetchFailed { key, error: e }) => match e.kind() {
                    ErrorKind::Cancelled => {}
                    ErrorKind::Auth => {
                        warn!(key = %key, "Session rejected; signing out");
                        ctx.clear_user();
                        ctx.notify(SESSION_EXPIRED, ToastStatus::Error);
                    }
                    ErrorKind::Transport | ErrorKind::Validation => {
                        error!(key = %key, error = %e, "Background fetch failed");
                        ctx.notify(e.to_string(), ToastStatus::Error);
                    }
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }))
}
