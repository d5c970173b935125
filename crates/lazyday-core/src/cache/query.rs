//! Keys and values of the application's query cache.

use std::fmt;

use crate::models::{Appointment, AppointmentDateMap, User, UserId};

use super::key::{CacheKey, KeyFilter};
use super::store::{CacheStore, Observer};

/// Entity names, used to register fetchers and to filter keys.
pub mod query_keys {
    pub const USER: &str = "user";
    pub const APPOINTMENTS: &str = "appointments";
    pub const USER_APPOINTMENTS: &str = "user-appointments";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The signed-in user
    User,
    /// All appointments of one calendar month
    Appointments { year: i32, month: u32 },
    /// Appointments booked by one user
    UserAppointments { user_id: UserId },
}

impl QueryKey {
    pub fn appointments(year: i32, month: u32) -> Self {
        QueryKey::Appointments { year, month }
    }
}

impl CacheKey for QueryKey {
    fn entity(&self) -> &'static str {
        match self {
            QueryKey::User => query_keys::USER,
            QueryKey::Appointments { .. } => query_keys::APPOINTMENTS,
            QueryKey::UserAppointments { .. } => query_keys::USER_APPOINTMENTS,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::User => write!(f, "{}", query_keys::USER),
            QueryKey::Appointments { year, month } => {
                write!(f, "{}/{}/{}", query_keys::APPOINTMENTS, year, month)
            }
            QueryKey::UserAppointments { user_id } => {
                write!(f, "{}/{}", query_keys::USER_APPOINTMENTS, user_id)
            }
        }
    }
}

/// Everything the application caches.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    /// `None` once signed out
    User(Option<User>),
    Appointments(AppointmentDateMap),
    UserAppointments(Vec<Appointment>),
}

impl QueryData {
    pub fn into_user(self) -> Option<User> {
        match self {
            QueryData::User(user) => user,
            _ => None,
        }
    }

    pub fn into_appointments(self) -> Option<AppointmentDateMap> {
        match self {
            QueryData::Appointments(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_user_appointments(self) -> Option<Vec<Appointment>> {
        match self {
            QueryData::UserAppointments(list) => Some(list),
            _ => None,
        }
    }
}

pub type QueryCache = CacheStore<QueryKey, QueryData>;
pub type QueryObserver = Observer<QueryKey, QueryData>;
pub type QueryFilter = KeyFilter<QueryKey>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_requests_build_equal_keys() {
        assert_eq!(QueryKey::appointments(2024, 3), QueryKey::Appointments { year: 2024, month: 3 });
        assert_ne!(QueryKey::appointments(2024, 3), QueryKey::appointments(2024, 4));
    }

    #[test]
    fn test_key_display_and_entity() {
        assert_eq!(QueryKey::User.to_string(), "user");
        assert_eq!(QueryKey::appointments(2024, 3).to_string(), "appointments/2024/3");
        assert_eq!(
            QueryKey::UserAppointments { user_id: 9 }.to_string(),
            "user-appointments/9"
        );
        assert_eq!(QueryKey::appointments(2024, 3).entity(), query_keys::APPOINTMENTS);
    }

    #[test]
    fn test_entity_filter_spans_months() {
        let filter = QueryFilter::Entity(query_keys::APPOINTMENTS);
        assert!(filter.matches(&QueryKey::appointments(2024, 3)));
        assert!(filter.matches(&QueryKey::appointments(2025, 1)));
        assert!(!filter.matches(&QueryKey::User));
    }

    #[test]
    fn test_data_accessors() {
        assert!(QueryData::User(None).into_user().is_none());
        assert!(QueryData::Appointments(AppointmentDateMap::new()).into_user().is_none());
        assert_eq!(
            QueryData::Appointments(AppointmentDateMap::new()).into_appointments(),
            Some(AppointmentDateMap::new())
        );
        assert_eq!(QueryData::UserAppointments(vec![]).into_user_appointments(), Some(vec![]));
    }
}
