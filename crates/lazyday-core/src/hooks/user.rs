use crate::cache::{CacheEntry, QueryData, QueryKey, QueryObserver};
use crate::context::AppContext;
use crate::models::User;

/// Keeps the signed-in user observed and offers the update/clear operations.
pub struct UserHook {
    ctx: AppContext,
    observer: QueryObserver,
}

impl UserHook {
    /// Seeds the user entry from durable storage, then starts observing it.
    pub fn new(ctx: AppContext) -> Self {
        ctx.seed_user_from_storage();
        let observer = ctx.cache.observe(QueryKey::User);
        Self { ctx, observer }
    }

    pub fn user(&self) -> Option<User> {
        self.observer.data().and_then(QueryData::into_user)
    }

    pub fn entry(&self) -> CacheEntry<QueryData> {
        self.observer.entry()
    }

    pub fn update_user(&self, user: User) {
        self.ctx.update_user(user);
    }

    pub fn clear_user(&self) {
        self.ctx.clear_user();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, QueryStatus};
    use crate::models::AppointmentDateMap;
    use crate::storage::UserStorage;
    use crate::test_support::{user, wait_for, Harness};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_seeds_from_storage_before_any_request() {
        let h = Harness::new().await;
        h.storage.save(&user(1, "Stored")).unwrap();

        let hook = UserHook::new(h.ctx.clone());
        assert_eq!(hook.user(), Some(user(1, "Stored")));
        assert_eq!(hook.entry().status, QueryStatus::Success);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_signed_out_start_makes_no_request() {
        let h = Harness::new().await;
        let hook = UserHook::new(h.ctx.clone());
        h.ctx.cache.fetch(&QueryKey::User).await;

        assert!(hook.user().is_none());
        assert!(h.server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_user_writes_cache_and_storage_together() {
        let h = Harness::new().await;
        let hook = UserHook::new(h.ctx.clone());

        hook.update_user(user(2, "Kim"));
        assert_eq!(hook.user(), Some(user(2, "Kim")));
        assert_eq!(h.storage.load().unwrap(), Some(user(2, "Kim")));
    }

    #[tokio::test]
    async fn test_clear_user_drops_user_scoped_entries() {
        let h = Harness::new().await;
        let hook = UserHook::new(h.ctx.clone());
        hook.update_user(user(2, "Kim"));
        h.ctx.cache.write(
            &QueryKey::appointments(2024, 3),
            QueryData::Appointments(AppointmentDateMap::new()),
        );
        h.ctx.cache.write(
            &QueryKey::UserAppointments { user_id: 2 },
            QueryData::UserAppointments(vec![]),
        );

        hook.clear_user();
        assert!(hook.user().is_none());
        assert!(h.storage.load().unwrap().is_none());
        assert!(h.ctx.cache.get_data(&QueryKey::appointments(2024, 3)).is_none());
        assert!(h.ctx.cache.get_data(&QueryKey::UserAppointments { user_id: 2 }).is_none());
    }

    #[tokio::test]
    async fn test_stale_user_is_refetched_with_bearer_token() {
        let h = Harness::with_config(CacheConfig {
            stale_time: Duration::ZERO,
            ..CacheConfig::default()
        })
        .await;
        h.server.route(
            "GET",
            "/user/1",
            200,
            json!({"user": {"id": 1, "email": "user1@example.com", "name": "Fresh"}}),
        );
        h.storage.save(&user(1, "Stored")).unwrap();

        let hook = UserHook::new(h.ctx.clone());
        wait_for(|| hook.user().and_then(|u| u.name) == Some("Fresh".to_string())).await;

        let request = &h.server.requests()[0];
        assert_eq!(request.header("authorization"), Some("Bearer token-1"));
        // The server copy carries no token; the held one survives
        assert_eq!(hook.user().unwrap().token.as_deref(), Some("token-1"));
    }
}
