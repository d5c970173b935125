//! Optimistic profile updates.
//!
//! A mutation moves through `Idle -> Mutating -> {Committed, RolledBack} -> Idle`.
//! Each transition has a named handler so the ordering is explicit:
//!
//! 1. `on_mutate` cancels in-flight user reads, snapshots the cached user and
//!    writes the new one before any request is sent.
//! 2. The PATCH carries only the JSON Patch diff between the two.
//! 3. `on_success` replaces the optimistic value with the server's copy.
//! 4. `on_error` restores the snapshot, or logs out on an auth failure.
//! 5. `on_settled` invalidates the user entry so it is refetched.

use std::sync::{Mutex, PoisonError};

use futures::future::{AbortHandle, Abortable};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ErrorKind};
use crate::cache::{QueryFilter, QueryKey};
use crate::context::AppContext;
use crate::models::User;
use crate::notify::ToastStatus;
use crate::utils::{diff, PatchOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Idle,
    Mutating,
    Committed,
    RolledBack,
}

/// How a call to [`PatchUser::mutate`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// The server accepted the update; holds its canonical user
    Committed(User),
    /// The request failed and the previous user was restored
    RolledBack,
    /// Nothing to do: no new user, or nobody signed in
    Skipped,
    /// The update was malformed and never applied
    Rejected,
    /// Aborted through [`PatchUser::cancel`]
    Cancelled,
    /// The session was rejected and the user was signed out
    SignedOut,
}

/// State carried from `on_mutate` to the settle handlers.
struct MutationContext {
    previous_user: Option<User>,
}

pub struct PatchUser {
    ctx: AppContext,
    state: Mutex<PatchState>,
    abort: Mutex<Option<AbortHandle>>,
}

impl PatchUser {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            state: Mutex::new(PatchState::Idle),
            abort: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PatchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_mutating(&self) -> bool {
        self.state() == PatchState::Mutating
    }

    /// Abort the running request. The optimistic value stays until refetched.
    pub fn cancel(&self) {
        if let Some(handle) = self.abort_slot().take() {
            debug!("Cancelling user patch");
            handle.abort();
        }
    }

    /// Apply `new_user` optimistically and send the difference to the server.
    pub async fn mutate(&self, new_user: Option<User>) -> PatchOutcome {
        let Some(new_user) = new_user else {
            debug!("No user to patch");
            return PatchOutcome::Skipped;
        };
        let Some(current) = self.ctx.current_user() else {
            debug!("Signed out; skipping user patch");
            return PatchOutcome::Skipped;
        };

        let patch = match patch_for(&current, &new_user) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "Rejected user update");
                self.ctx.notify(e.to_string(), ToastStatus::Error);
                return PatchOutcome::Rejected;
            }
        };

        let _guard = self.ctx.cache.begin_mutation();
        let context = self.on_mutate(new_user);

        let (handle, registration) = AbortHandle::new_pair();
        *self.abort_slot() = Some(handle);
        let result = Abortable::new(self.ctx.api.patch_user(&current, &patch), registration)
            .await
            .unwrap_or(Err(ApiError::Cancelled));
        self.abort_slot().take();

        let outcome = match result {
            Ok(user) => self.on_success(user),
            Err(e) => self.on_error(e, context),
        };
        self.on_settled();
        outcome
    }

    fn on_mutate(&self, new_user: User) -> MutationContext {
        self.ctx.cache.cancel(&QueryFilter::Exact(QueryKey::User));
        let previous_user = self.ctx.current_user();
        self.ctx.update_user(new_user);
        self.set_state(PatchState::Mutating);
        MutationContext { previous_user }
    }

    fn on_success(&self, user: User) -> PatchOutcome {
        if self.ctx.current_user().is_some() {
            self.ctx.update_user(user.clone());
        } else {
            debug!("Signed out during patch; dropping server copy");
        }
        self.ctx.notify("User updated!", ToastStatus::Success);
        self.set_state(PatchState::Committed);
        info!(user_id = user.id, "User update committed");
        PatchOutcome::Committed(user)
    }

    fn on_error(&self, error: ApiError, context: MutationContext) -> PatchOutcome {
        match error.kind() {
            ErrorKind::Cancelled => {
                debug!("User patch cancelled");
                PatchOutcome::Cancelled
            }
            ErrorKind::Auth => {
                warn!("Session rejected during user update");
                self.ctx.clear_user();
                self.ctx.notify(error.to_string(), ToastStatus::Error);
                PatchOutcome::SignedOut
            }
            ErrorKind::Transport | ErrorKind::Validation => {
                warn!(error = %error, "User update failed");
                // A logout while the request was out leaves nothing to restore
                let snapshot = self
                    .ctx
                    .current_user()
                    .and(context.previous_user);
                self.rollback(snapshot);
                PatchOutcome::RolledBack
            }
        }
    }

    fn on_settled(&self) {
        self.ctx.cache.invalidate(&QueryFilter::Exact(QueryKey::User));
        self.set_state(PatchState::Idle);
    }

    /// Restore `previous_user`. Without a snapshot nothing is written or
    /// notified; returns whether a rollback happened.
    pub fn rollback(&self, previous_user: Option<User>) -> bool {
        let Some(previous_user) = previous_user else {
            debug!("No snapshot; nothing to roll back");
            return false;
        };
        self.ctx.update_user(previous_user);
        self.ctx
            .notify("Update failed; restoring previous value", ToastStatus::Warning);
        self.set_state(PatchState::RolledBack);
        true
    }

    fn set_state(&self, state: PatchState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn abort_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.abort.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// JSON Patch from `old` to `new`, ignoring the session token.
fn patch_for(old: &User, new: &User) -> Result<Vec<PatchOperation>, ApiError> {
    if old.id != new.id {
        return Err(ApiError::Validation("Cannot change the user id".to_string()));
    }
    Ok(diff(&profile_value(old)?, &profile_value(new)?))
}

fn profile_value(user: &User) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(user)
        .map_err(|e| ApiError::Validation(format!("Unserializable user: {}", e)))?;
    if let Value::Object(map) = &mut value {
        map.remove("token");
    }
    Ok(value)
}
