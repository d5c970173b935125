use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Appointment {
    pub id: i64,
    #[serde(rename = "dateTime")]
    pub date_time: DateTime<Utc>,
    #[serde(rename = "treatmentName", default)]
    pub treatment_name: String,
    /// `None` means the slot is open
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl Appointment {
    pub fn is_open(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_booked_by(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }
}

/// Appointments of one month keyed by day of month.
pub type AppointmentDateMap = BTreeMap<u32, Vec<Appointment>>;

/// Project a month of appointments down to the ones the user may book or has booked.
///
/// Open slots and the user's own bookings are kept; bookings held by anyone
/// else are dropped. Days stay present even when nothing is left in them.
pub fn available_appointments(
    appointments: &AppointmentDateMap,
    user_id: Option<UserId>,
) -> AppointmentDateMap {
    appointments
        .iter()
        .map(|(day, list)| {
            let kept = list
                .iter()
                .filter(|a| a.is_open() || user_id.is_some_and(|id| a.is_booked_by(id)))
                .cloned()
                .collect();
            (*day, kept)
        })
        .collect()
}
