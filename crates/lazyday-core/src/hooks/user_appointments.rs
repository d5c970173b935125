use tracing::debug;

use crate::cache::{QueryData, QueryKey, QueryObserver};
use crate::context::AppContext;
use crate::models::{Appointment, UserId};

/// The signed-in user's own bookings.
///
/// Follows whoever is signed in: the observed key changes with the user id,
/// and nothing is observed while signed out.
pub struct UserAppointmentsHook {
    ctx: AppContext,
    observer: Option<QueryObserver>,
}

impl UserAppointmentsHook {
    pub fn new(ctx: AppContext) -> Self {
        let mut hook = Self {
            ctx,
            observer: None,
        };
        hook.follow_user();
        hook
    }

    pub fn appointments(&mut self) -> Vec<Appointment> {
        self.follow_user();
        self.observer
            .as_ref()
            .and_then(|o| o.data())
            .and_then(QueryData::into_user_appointments)
            .unwrap_or_default()
    }

    fn follow_user(&mut self) {
        let user_id = self.ctx.current_user().map(|u| u.id);
        if observed_user(&self.observer) == user_id {
            return;
        }
        debug!(user_id, "User appointments now follow a different user");
        self.observer = user_id.map(|user_id| {
            self.ctx
                .cache
                .observe(QueryKey::UserAppointments { user_id })
        });
    }
}

fn observed_user(observer: &Option<QueryObserver>) -> Option<UserId> {
    match observer.as_ref().map(|o| o.key()) {
        Some(QueryKey::UserAppointments { user_id }) => Some(*user_id),
        _ => None,
    }
}
