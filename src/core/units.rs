use chrono::{Datelike, NaiveDate};
use thiserror::Error;

pub const SLOTS_PER_DAY: usize = 48;
pub const MINUTES_PER_SLOT: u32 = 30;
pub const MINUTES_PER_HOUR: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const MONTHS_PER_QUARTER: u32 = 3;

/// UK mains gas emission factor, kg CO2 per kWh
pub const GAS_KG_CO2_PER_KWH: f64 = 0.210;
/// Used for electricity days with no half-hourly grid intensity data, kg CO2 per kWh
pub const ELECTRICITY_FALLBACK_KG_CO2_PER_KWH: f64 = 0.233;

/// Slot index (0..48) for a time of day. 00:00-00:30 is slot 0.
pub fn slot_for_time(hour: u32, minute: u32) -> Result<usize, InvalidTimeOfDayError> {
    if hour >= HOURS_PER_DAY || minute >= MINUTES_PER_HOUR {
        return Err(InvalidTimeOfDayError { hour, minute });
    }
    Ok(((hour * MINUTES_PER_HOUR + minute) / MINUTES_PER_SLOT) as usize)
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let first = first_of_month(date.year(), date.month());
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    (first_of_month(next_year, next_month) - first).num_days() as u32
}

pub fn days_in_quarter(date: NaiveDate) -> u32 {
    let quarter_start_month = (date.month0() / MONTHS_PER_QUARTER) * MONTHS_PER_QUARTER + 1;
    (0..MONTHS_PER_QUARTER)
        .map(|offset| days_in_month(first_of_month(date.year(), quarter_start_month + offset)))
        .sum()
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // the first of any month between 1 and 12 always exists
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Error)]
#[error("{hour:02}:{minute:02} is not a valid time of day")]
pub struct InvalidTimeOfDayError {
    hour: u32,
    minute: u32,
}
