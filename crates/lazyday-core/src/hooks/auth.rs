use tracing::{info, warn};

use crate::api::ApiError;
use crate::context::AppContext;
use crate::models::User;
use crate::notify::ToastStatus;

/// Sign in, sign up and sign out.
pub struct AuthHook {
    ctx: AppContext,
}

impl AuthHook {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Option<User> {
        let result = self.ctx.api.sign_in(email, password).await;
        self.finish(result)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Option<User> {
        let result = self.ctx.api.sign_up(email, password).await;
        self.finish(result)
    }

    pub fn sign_out(&self) {
        info!("Signing out");
        self.ctx.clear_user();
        self.ctx.notify("Logged out!", ToastStatus::Info);
    }

    fn finish(&self, result: Result<User, ApiError>) -> Option<User> {
        match result {
            Ok(user) => {
                info!(user_id = user.id, "Signed in");
                // A different account must not inherit the previous one's entries
                if self.ctx.current_user().is_some_and(|u| u.id != user.id) {
                    self.ctx.clear_user();
                }
                self.ctx.update_user(user.clone());
                self.ctx
                    .notify(format!("Logged in as {}", user.email), ToastStatus::Info);
                Some(user)
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                warn!(error = %e, "Authentication failed");
                self.ctx.notify(e.to_string(), ToastStatus::Error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UserStorage;
    use crate::test_support::{user, Harness};
    use serde_json::json;

    #[tokio::test]
    async fn test_sign_in_stores_user() {
        let h = Harness::new().await;
        h.server.route(
            "POST",
            "/signin",
            200,
            json!({"user": {"id": 1, "email": "user1@example.com", "name": "Ann", "token": "token-1"}}),
        );

        let signed_in = AuthHook::new(h.ctx.clone())
            .sign_in("user1@example.com", "secret")
            .await;

        assert_eq!(signed_in, Some(user(1, "Ann")));
        assert_eq!(h.ctx.current_user(), Some(user(1, "Ann")));
        assert_eq!(h.storage.load().unwrap(), Some(user(1, "Ann")));
        assert_eq!(
            h.server.requests()[0].json(),
            json!({"email": "user1@example.com", "password": "secret"})
        );
        assert_eq!(h.notifier.toasts()[0].title, "Logged in as user1@example.com");
    }

    #[tokio::test]
    async fn test_bad_credentials_notify_error() {
        let h = Harness::new().await;
        h.server.route("POST", "/signin", 401, json!({}));

        let signed_in = AuthHook::new(h.ctx.clone()).sign_in("a@b.c", "wrong").await;

        assert!(signed_in.is_none());
        assert!(h.ctx.current_user().is_none());
        assert_eq!(h.notifier.statuses(), vec![ToastStatus::Error]);
    }

    #[tokio::test]
    async fn test_sign_up_posts_to_user() {
        let h = Harness::new().await;
        h.server.route(
            "POST",
            "/user",
            201,
            json!({"user": {"id": 4, "email": "user4@example.com", "name": "New", "token": "token-4"}}),
        );

        let created = AuthHook::new(h.ctx.clone())
            .sign_up("user4@example.com", "secret")
            .await;
        assert_eq!(created, Some(user(4, "New")));
        assert_eq!(h.server.count("POST", "/user"), 1);
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let h = Harness::new().await;
        h.ctx.update_user(user(1, "Ann"));

        AuthHook::new(h.ctx.clone()).sign_out();

        assert!(h.ctx.current_user().is_none());
        assert!(h.storage.load().unwrap().is_none());
        assert_eq!(h.notifier.toasts()[0].title, "Logged out!");
    }
}
