use serde_json::json;
use tracing::{info, warn};

use crate::api::{ApiError, ErrorKind};
use crate::cache::{query_keys, QueryFilter};
use crate::context::AppContext;
use crate::models::{Appointment, User};
use crate::notify::ToastStatus;
use crate::utils::json_patch;

/// Reserve and cancel appointments.
///
/// Both patch the appointment's `userId` and, on success, invalidate every
/// month and every user-appointments list so the calendar catches up.
pub struct AppointmentMutations {
    ctx: AppContext,
}

impl AppointmentMutations {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Book `appointment` for `user`. Returns the server's copy on success.
    pub async fn reserve(&self, appointment: &Appointment, user: &User) -> Option<Appointment> {
        let patch = [json_patch::replace("/userId", json!(user.id))];
        let _guard = self.ctx.cache.begin_mutation();
        let result = self
            .ctx
            .api
            .patch_appointment(appointment.id, &patch, user.token.as_deref())
            .await;
        self.settle(result, "You have reserved the appointment!", ToastStatus::Success)
    }

    /// Release the current user's booking of `appointment`.
    pub async fn cancel(&self, appointment: &Appointment) -> Option<Appointment> {
        let patch = [json_patch::remove("/userId")];
        let token = self.ctx.current_user().and_then(|u| u.token);
        let _guard = self.ctx.cache.begin_mutation();
        let result = self
            .ctx
            .api
            .patch_appointment(appointment.id, &patch, token.as_deref())
            .await;
        self.settle(result, "You have canceled the appointment!", ToastStatus::Info)
    }

    fn settle(
        &self,
        result: Result<Appointment, ApiError>,
        title: &str,
        status: ToastStatus,
    ) -> Option<Appointment> {
        match result {
            Ok(appointment) => {
                info!(appointment_id = appointment.id, "{}", title);
                self.ctx
                    .cache
                    .invalidate(&QueryFilter::Entity(query_keys::APPOINTMENTS));
                self.ctx
                    .cache
                    .invalidate(&QueryFilter::Entity(query_keys::USER_APPOINTMENTS));
                self.ctx.notify(title, status);
                Some(appointment)
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::Cancelled => {}
                    ErrorKind::Auth => {
                        warn!("Session rejected during appointment update");
                        self.ctx.clear_user();
                        self.ctx.notify(e.to_string(), ToastStatus::Error);
                    }
                    ErrorKind::Transport | ErrorKind::Validation => {
                        warn!(error = %e, "Appointment update failed");
                        self.ctx.notify(e.to_string(), ToastStatus::Error);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{QueryData, QueryKey};
    use crate::models::AppointmentDateMap;
    use crate::test_support::{user, Harness};
    use chrono::{TimeZone, Utc};

    fn slot(id: i64, user_id: Option<i64>) -> Appointment {
        Appointment {
            id,
            date_time: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
            treatment_name: "Facial".to_string(),
            user_id,
        }
    }

    fn seed_months(h: &Harness) {
        h.ctx.cache.write(
            &QueryKey::appointments(2024, 3),
            QueryData::Appointments(AppointmentDateMap::new()),
        );
        h.ctx.cache.write(
            &QueryKey::UserAppointments { user_id: 1 },
            QueryData::UserAppointments(vec![]),
        );
    }

    #[tokio::test]
    async fn test_reserve_patches_user_id_and_invalidates() {
        let h = Harness::new().await;
        h.ctx.update_user(user(1, "Ann"));
        seed_months(&h);
        h.server.route(
            "PATCH",
            "/appointment/7",
            200,
            json!({"appointment": {"id": 7, "dateTime": "2024-03-04T09:00:00Z", "treatmentName": "Facial", "userId": 1}}),
        );

        let booked = AppointmentMutations::new(h.ctx.clone())
            .reserve(&slot(7, None), &user(1, "Ann"))
            .await;

        assert_eq!(booked, Some(slot(7, Some(1))));
        let request = &h.server.requests()[0];
        assert_eq!(
            request.json(),
            json!({"data": [{"op": "replace", "path": "/userId", "value": 1}]})
        );
        assert_eq!(request.header("authorization"), Some("Bearer token-1"));
        assert!(h.ctx.cache.peek(&QueryKey::appointments(2024, 3)).is_invalidated);
        assert!(h.ctx.cache.peek(&QueryKey::UserAppointments { user_id: 1 }).is_invalidated);
        assert_eq!(h.notifier.statuses(), vec![ToastStatus::Success]);
        assert_eq!(h.ctx.cache.is_mutating(), 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_user_id() {
        let h = Harness::new().await;
        h.ctx.update_user(user(1, "Ann"));
        h.server.route(
            "PATCH",
            "/appointment/7",
            200,
            json!({"appointment": {"id": 7, "dateTime": "2024-03-04T09:00:00Z", "treatmentName": "Facial"}}),
        );

        let released = AppointmentMutations::new(h.ctx.clone())
            .cancel(&slot(7, Some(1)))
            .await;

        assert_eq!(released, Some(slot(7, None)));
        assert_eq!(
            h.server.requests()[0].json(),
            json!({"data": [{"op": "remove", "path": "/userId"}]})
        );
        assert_eq!(h.notifier.toasts()[0].title, "You have canceled the appointment!");
        assert_eq!(h.notifier.statuses(), vec![ToastStatus::Info]);
    }

    #[tokio::test]
    async fn test_failure_notifies_without_invalidating() {
        let h = Harness::new().await;
        h.ctx.update_user(user(1, "Ann"));
        seed_months(&h);
        h.server.route("PATCH", "/appointment/7", 500, json!({"message": "down"}));

        let result = AppointmentMutations::new(h.ctx.clone())
            .reserve(&slot(7, None), &user(1, "Ann"))
            .await;

        assert!(result.is_none());
        assert!(!h.ctx.cache.peek(&QueryKey::appointments(2024, 3)).is_invalidated);
        assert_eq!(h.notifier.statuses(), vec![ToastStatus::Error]);
    }

    #[tokio::test]
    async fn test_rejected_session_signs_out() {
        let h = Harness::new().await;
        h.ctx.update_user(user(1, "Ann"));
        h.server.route("PATCH", "/appointment/7", 401, json!({}));

        let result = AppointmentMutations::new(h.ctx.clone())
            .cancel(&slot(7, Some(1)))
            .await;

        assert!(result.is_none());
        assert!(h.ctx.current_user().is_none());
        assert_eq!(h.notifier.statuses(), vec![ToastStatus::Error]);
    }
}
