//! Calendar month hook.
//!
//! The hook observes exactly one `Appointments { year, month }` key at a
//! time. Navigating observes the new month before the guard on the old one
//! is dropped, so the old entry starts its eviction countdown only once the
//! new one is registered. Whenever the active month changes, at construction
//! or on navigation, the following month is prefetched once; reading the
//! appointments never prefetches.

use chrono::NaiveDate;
use tokio::runtime::Handle;
use tracing::debug;

use crate::cache::{CacheEntry, QueryData, QueryKey, QueryObserver};
use crate::context::AppContext;
use crate::models::{available_appointments, AppointmentDateMap, MonthYear};

/// One month of the calendar, kept observed and filtered for the current user.
pub struct AppointmentsHook {
    ctx: AppContext,
    /// The real-world month; navigation never goes before it
    current: MonthYear,
    month_year: MonthYear,
    show_all: bool,
    observer: QueryObserver,
}

impl AppointmentsHook {
    pub fn new(ctx: AppContext, today: NaiveDate) -> Self {
        let current = MonthYear::containing(today);
        let observer = ctx.cache.observe(key_for(&current));
        let hook = Self {
            ctx,
            month_year: current.clone(),
            current,
            show_all: false,
            observer,
        };
        hook.prefetch_next();
        hook
    }

    /// Appointments of the active month, day by day.
    ///
    /// Unless `show_all` is set, bookings held by other users are hidden.
    pub fn appointments(&self) -> AppointmentDateMap {
        let data = self
            .observer
            .data()
            .and_then(QueryData::into_appointments)
            .unwrap_or_default();
        if self.show_all {
            data
        } else {
            let user_id = self.ctx.current_user().map(|u| u.id);
            available_appointments(&data, user_id)
        }
    }

    pub fn entry(&self) -> CacheEntry<QueryData> {
        self.observer.entry()
    }

    pub fn month_year(&self) -> &MonthYear {
        &self.month_year
    }

    pub fn can_go_back(&self) -> bool {
        self.month_year.start_date > self.current.start_date
    }

    /// Move `increment` months. Returns `false` when that would land before
    /// the current month.
    pub fn update_month_year(&mut self, increment: i32) -> bool {
        let target = self.month_year.offset(increment);
        if target.start_date < self.current.start_date {
            debug!(target = %target, "Refusing to navigate into the past");
            return false;
        }
        debug!(from = %self.month_year, to = %target, "Navigating");
        self.observer = self.ctx.cache.observe(key_for(&target));
        self.month_year = target;
        self.prefetch_next();
        true
    }

    pub fn show_all(&self) -> bool {
        self.show_all
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.show_all = show_all;
    }

    pub fn toggle_show_all(&mut self) {
        self.show_all = !self.show_all;
    }

    fn prefetch_next(&self) {
        let key = key_for(&self.month_year.next());
        let Ok(runtime) = Handle::try_current() else {
            debug!(key = %key, "No runtime; skipping prefetch");
            return;
        };
        let cache = self.ctx.cache.clone();
        runtime.spawn(async move {
            cache.prefetch(&key).await;
        });
    }
}

fn key_for(month_year: &MonthYear) -> QueryKey {
    QueryKey::appointments(month_year.year, month_year.month)
}
