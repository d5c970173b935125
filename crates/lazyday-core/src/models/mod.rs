//! Data models for the appointment calendar.
//!
//! - `User`: the signed-in identity, mirrored into local storage and the cache
//! - `Appointment`, `AppointmentDateMap`: bookable slots grouped by day of month
//! - `MonthYear`: derived view of a calendar month used for navigation

pub mod appointment;
pub mod month_year;
pub mod user;

pub use appointment::{available_appointments, Appointment, AppointmentDateMap};
pub use month_year::MonthYear;
pub use user::{User, UserId};
