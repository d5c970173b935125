//! Shared handles every hook works through.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::cache::{query_keys, QueryCache, QueryData, QueryFilter, QueryKey};
use crate::models::User;
use crate::notify::{Notifier, Toast, ToastStatus};
use crate::storage::UserStorage;

/// Cache, transport, persistence and notification sink, bundled for the hooks.
///
/// Cloning is cheap; all clones share the same cache.
#[derive(Clone)]
pub struct AppContext {
    pub cache: QueryCache,
    pub api: ApiClient,
    pub storage: Arc<dyn UserStorage>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppContext {
    pub fn new(
        cache: QueryCache,
        api: ApiClient,
        storage: Arc<dyn UserStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ctx = Self {
            cache,
            api,
            storage,
            notifier,
        };
        ctx.register_fetchers();
        ctx
    }

    /// The signed-in user as currently cached.
    pub fn current_user(&self) -> Option<User> {
        self.cache
            .get_data(&QueryKey::User)
            .and_then(QueryData::into_user)
    }

    /// Make `user` the signed-in user in both the cache and durable storage.
    pub fn update_user(&self, user: User) {
        if let Err(e) = self.storage.save(&user) {
            warn!(error = %e, "Failed to persist user");
        }
        self.cache.write(&QueryKey::User, QueryData::User(Some(user)));
    }

    /// Forget the signed-in user and everything that depended on them.
    pub fn clear_user(&self) {
        debug!("Clearing user");
        self.cache.cancel(&QueryFilter::Exact(QueryKey::User));
        self.cache.write(&QueryKey::User, QueryData::User(None));
        self.cache.remove(&QueryFilter::Entity(query_keys::APPOINTMENTS));
        self.cache.remove(&QueryFilter::Entity(query_keys::USER_APPOINTMENTS));
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear stored user");
        }
    }

    /// Seed the user entry from durable storage unless the cache already has one.
    pub fn seed_user_from_storage(&self) {
        if self.cache.get_data(&QueryKey::User).is_some() {
            return;
        }
        match self.storage.load() {
            Ok(Some(user)) => {
                debug!(user_id = user.id, "Seeding user from storage");
                self.cache.write(&QueryKey::User, QueryData::User(Some(user)));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Stored user unreadable; starting signed out"),
        }
    }

    pub fn notify(&self, title: impl Into<String>, status: ToastStatus) {
        self.notifier.notify(Toast::new(title, status));
    }

    fn register_fetchers(&self) {
        let api = self.api.clone();
        let cache = self.cache.downgrade();
        self.cache.register(query_keys::USER, move |_key: QueryKey| {
            let api = api.clone();
            let user = cache
                .upgrade()
                .and_then(|c| c.get_data(&QueryKey::User))
                .and_then(QueryData::into_user);
            async move {
                let user = api.fetch_user(user.as_ref()).await?;
                Ok::<_, ApiError>(QueryData::User(user))
            }
        });

        let api = self.api.clone();
        self.cache.register(query_keys::APPOINTMENTS, move |key: QueryKey| {
            let api = api.clone();
            async move {
                let QueryKey::Appointments { year, month } = key else {
                    return Err(unexpected_key(&key));
                };
                let map = api.fetch_appointments(year, month).await?;
                Ok::<_, ApiError>(QueryData::Appointments(map))
            }
        });

        let api = self.api.clone();
        let cache = self.cache.downgrade();
        self.cache.register(query_keys::USER_APPOINTMENTS, move |key: QueryKey| {
            let api = api.clone();
            let user = cache
                .upgrade()
                .and_then(|c| c.get_data(&QueryKey::User))
                .and_then(QueryData::into_user);
            async move {
                let QueryKey::UserAppointments { user_id } = key else {
                    return Err(unexpected_key(&key));
                };
                match user {
                    Some(user) if user.id == user_id => {
                        let list = api.fetch_user_appointments(&user).await?;
                        Ok(QueryData::UserAppointments(list))
                    }
                    _ => Ok::<_, ApiError>(QueryData::UserAppointments(Vec::new())),
                }
            }
        });
    }
}

fn unexpected_key(key: &QueryKey) -> ApiError {
    ApiError::InvalidResponse(format!("no fetcher for key {}", key))
}
