//! Synchronized entity hooks.
//!
//! Each hook binds cache keys to the fetch and mutation logic of one entity:
//!
//! - `UserHook`: the signed-in user, seeded from durable storage
//! - `PatchUser`: optimistic profile updates with rollback
//! - `AppointmentsHook`: one calendar month, filtered, with next-month prefetch
//! - `AppointmentMutations`: reserve and cancel appointments
//! - `UserAppointmentsHook`: the signed-in user's own bookings
//! - `AuthHook`: sign in, sign up and sign out
//!
//! Hooks turn transport errors into notifications; none of them return
//! errors to their caller.

pub mod appointment_mutations;
pub mod appointments;
pub mod auth;
pub mod patch_user;
pub mod user;
pub mod user_appointments;

pub use appointment_mutations::AppointmentMutations;
pub use appointments::AppointmentsHook;
pub use auth::AuthHook;
pub use patch_user::{PatchOutcome, PatchState, PatchUser};
pub use user::UserHook;
pub use user_appointments::UserAppointmentsHook;
