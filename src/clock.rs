// Wall-clock access, injectable so slot resolution can be tested at fixed instants.

use chrono::{DateTime, Local, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Today's local calendar date.
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug)]
pub struct FixedClock {
    state: Mutex<(DateTime<Utc>, NaiveDate)>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, today: NaiveDate) -> Self {
        Self {
            state: Mutex::new((now, today)),
        }
    }

    /// Uses the UTC date of `now` as "today".
    pub fn at(now: DateTime<Utc>) -> Self {
        Self::new(now, now.date_naive())
    }

    pub fn set(&self, now: DateTime<Utc>, today: NaiveDate) {
        *self.state.lock() = (now, today);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().0
    }

    fn today(&self) -> NaiveDate {
        self.state.lock().1
    }
}
