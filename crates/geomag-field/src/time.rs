//! Time values, solar geometry and the coefficient update cache
//!
//! Times are carried internally as Modified Julian Date (UTC). Adapters
//! accept chrono timestamps, year/day/second triples and the legacy
//! composite `yyyydddsssss.fff` encoding.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{MagFieldError, Result};

/// MJD of the Unix epoch (1970-01-01T00:00:00Z)
pub const MJD_UNIX_EPOCH: f64 = 40587.0;
const SECONDS_PER_DAY: f64 = 86400.0;
/// Composite time values at or above this are treated as `yyyydddsssss.fff`
const COMPOSITE_THRESHOLD: f64 = 1.0e8;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeValue {
    pub mjd: f64,
}

impl TimeValue {
    pub fn from_mjd(mjd: f64) -> Self {
        Self { mjd }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9;
        Self {
            mjd: MJD_UNIX_EPOCH + secs / SECONDS_PER_DAY,
        }
    }

    /// Year, day of year (1-based) and seconds of day.
    pub fn from_ydsec(year: i32, day_of_year: u32, seconds: f64) -> Result<Self> {
        let date = NaiveDate::from_yo_opt(year, day_of_year).ok_or_else(|| {
            MagFieldError::BadInputCoordinate(format!("invalid date {}/{}", year, day_of_year))
        })?;
        if !(0.0..=SECONDS_PER_DAY).contains(&seconds) {
            return Err(MagFieldError::BadInputCoordinate(format!(
                "seconds of day {} outside [0, 86400]",
                seconds
            )));
        }
        let epoch = unix_epoch_date()?;
        let days = (date - epoch).num_days() as f64;
        Ok(Self {
            mjd: MJD_UNIX_EPOCH + days + seconds / SECONDS_PER_DAY,
        })
    }

    /// Legacy composite encoding: `year * 1e8 + doy * 1e5 + seconds`.
    pub fn from_composite(value: f64) -> Result<Self> {
        let year = (value / 1.0e8).floor();
        let rest = value - year * 1.0e8;
        let doy = (rest / 1.0e5).floor();
        let seconds = rest - doy * 1.0e5;
        Self::from_ydsec(year as i32, doy as u32, seconds)
    }

    /// MJD or composite, decided by magnitude.
    pub fn from_raw(value: f64) -> Result<Self> {
        if value >= COMPOSITE_THRESHOLD {
            Self::from_composite(value)
        } else if value.is_finite() {
            Ok(Self::from_mjd(value))
        } else {
            Err(MagFieldError::BadInputCoordinate(format!("time {}", value)))
        }
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        let secs = (self.mjd - MJD_UNIX_EPOCH) * SECONDS_PER_DAY;
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1.0e9).round().min(999_999_999.0) as u32;
        DateTime::<Utc>::from_timestamp(whole as i64, nanos)
            .ok_or_else(|| MagFieldError::OutOfRange(format!("MJD {} not representable", self.mjd)))
    }

    /// (year, day of year, seconds of day)
    pub fn ydsec(&self) -> Result<(i32, u32, f64)> {
        let epoch = unix_epoch_date()?;
        let day_offset = (self.mjd - MJD_UNIX_EPOCH).floor();
        let date = epoch
            .checked_add_signed(Duration::days(day_offset as i64))
            .ok_or_else(|| MagFieldError::OutOfRange(format!("MJD {}", self.mjd)))?;
        let seconds = (self.mjd - MJD_UNIX_EPOCH - day_offset) * SECONDS_PER_DAY;
        Ok((date.year(), date.ordinal(), seconds))
    }

    pub fn to_composite(&self) -> Result<f64> {
        let (year, doy, seconds) = self.ydsec()?;
        Ok(f64::from(year) * 1.0e8 + f64::from(doy) * 1.0e5 + seconds)
    }

    pub fn decimal_year(&self) -> Result<f64> {
        let (year, doy, seconds) = self.ydsec()?;
        let days_in_year = if NaiveDate::from_yo_opt(year, 366).is_some() {
            366.0
        } else {
            365.0
        };
        Ok(f64::from(year) + (f64::from(doy) - 1.0 + seconds / SECONDS_PER_DAY) / days_in_year)
    }

    /// Seconds since 00:00 UTC of the same day.
    pub fn seconds_of_day(&self) -> f64 {
        (self.mjd - self.mjd.floor()) * SECONDS_PER_DAY
    }

    pub fn add_days(&self, days: f64) -> Self {
        Self {
            mjd: self.mjd + days,
        }
    }

    /// Absolute difference in days.
    pub fn days_between(&self, other: &TimeValue) -> f64 {
        (self.mjd - other.mjd).abs()
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

fn unix_epoch_date() -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| MagFieldError::NotInitialized("calendar epoch".into()))
}

// ============================================================================
// Solar geometry
// ============================================================================

/// Sun direction and sidereal angle, all angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarGeometry {
    /// Greenwich mean sidereal time
    pub gst: f64,
    /// Ecliptic longitude of the Sun
    pub longitude: f64,
    pub right_ascension: f64,
    pub declination: f64,
    /// Obliquity of the ecliptic
    pub obliquity: f64,
}

impl SolarGeometry {
    /// Low-precision solar ephemeris (about 0.01 degree), valid 1901-2099.
    pub fn at(time: &TimeValue) -> Self {
        let rad = PI / 180.0;
        let fday = time.seconds_of_day() / SECONDS_PER_DAY;
        let dj = time.mjd - 15019.5;
        let t = dj / 36525.0;

        let vl = (279.696678 + 0.9856473354 * dj).rem_euclid(360.0);
        let gst = (279.690983 + 0.9856473354 * dj + 360.0 * fday + 180.0).rem_euclid(360.0) * rad;
        let g = (358.475845 + 0.985600267 * dj).rem_euclid(360.0) * rad;
        let longitude = ((vl + (1.91946 - 0.004789 * t) * g.sin() + 0.020094 * (2.0 * g).sin())
            * rad)
            .rem_euclid(2.0 * PI);

        let obliquity = (23.45229 - 0.0130125 * t) * rad;
        let sob = obliquity.sin();
        let slp = longitude - 9.924e-5;
        let sind = sob * slp.sin();
        let cosd = (1.0 - sind * sind).sqrt();
        let sc = sind / cosd;
        let declination = sc.atan();
        let right_ascension = PI - (obliquity.cos() / sob * sc).atan2(-slp.cos() / cosd);

        Self {
            gst,
            longitude,
            right_ascension,
            declination,
            obliquity,
        }
    }
}

// ============================================================================
// Update cache
// ============================================================================

/// Update rates in days; zero freezes the quantity at its first value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateRates {
    pub main_field_days: f64,
    /// Defaults to the main-field rate when unset.
    pub rotation_days: Option<f64>,
}

impl Default for UpdateRates {
    fn default() -> Self {
        Self {
            main_field_days: 1.0,
            rotation_days: None,
        }
    }
}

impl UpdateRates {
    pub fn rotation(&self) -> f64 {
        self.rotation_days.unwrap_or(self.main_field_days)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub main_field: bool,
    pub rotation: bool,
}

impl UpdatePlan {
    pub fn any(&self) -> bool {
        self.main_field || self.rotation
    }
}

/// Tracks when main-field coefficients and frame rotations were last computed.
#[derive(Debug, Clone, Default)]
pub struct TimeCache {
    pub rates: UpdateRates,
    main_time: Option<TimeValue>,
    rotation_time: Option<TimeValue>,
}

impl TimeCache {
    pub fn new(rates: UpdateRates) -> Self {
        Self {
            rates,
            ..Default::default()
        }
    }

    pub fn main_time(&self) -> Option<TimeValue> {
        self.main_time
    }

    pub fn rotation_time(&self) -> Option<TimeValue> {
        self.rotation_time
    }

    pub fn is_initialized(&self) -> bool {
        self.main_time.is_some() && self.rotation_time.is_some()
    }

    fn due(last: Option<TimeValue>, time: &TimeValue, rate: f64) -> bool {
        match last {
            None => true,
            Some(last) => rate > 0.0 && last.days_between(time) >= rate,
        }
    }

    /// Decide what a regular `update_time` call has to recompute.
    pub fn plan(&self, time: &TimeValue, main_only: bool) -> UpdatePlan {
        let main_field = Self::due(self.main_time, time, self.rates.main_field_days);
        let rotation = main_field
            || (!main_only && Self::due(self.rotation_time, time, self.rates.rotation()));
        UpdatePlan {
            main_field,
            rotation,
        }
    }

    /// Rotation refresh regardless of rate, main field optionally rate-checked.
    pub fn plan_forced_rotation(&self, time: &TimeValue, check_main: bool) -> UpdatePlan {
        UpdatePlan {
            main_field: check_main && Self::due(self.main_time, time, self.rates.main_field_days),
            rotation: true,
        }
    }

    pub fn plan_forced(&self) -> UpdatePlan {
        UpdatePlan {
            main_field: true,
            rotation: true,
        }
    }

    pub fn commit(&mut self, time: TimeValue, plan: UpdatePlan) {
        if plan.main_field {
            self.main_time = Some(time);
        }
        if plan.rotation {
            self.rotation_time = Some(time);
        }
    }
}
