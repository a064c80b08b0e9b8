use crate::core::meter::FuelType;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Request was considered invalid due to error: {0}")]
    InvalidRequest(#[from] anyhow::Error),
    #[error("Error identified during aggregation: {0}")]
    FailureInAggregation(#[from] AggregationError),
    #[error("Error during output: {0}")]
    ErrorInOutput(OutputError),
}

/// Errors raised by the aggregation core. None of these are retried; the caller decides whether
/// a failure skips a fuel type or aborts the school.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("Reading dated {reading_date} was stored under the key {key_date}")]
    DateMismatch {
        key_date: NaiveDate,
        reading_date: NaiveDate,
    },
    #[error("No {fuel_type} tariff could be resolved for meter '{meter_id}' on {date}, even from the area defaults")]
    MissingTariffData {
        meter_id: String,
        fuel_type: FuelType,
        date: NaiveDate,
    },
    #[error("Unsupported standing charge billing period '{0}'")]
    UnsupportedRateUnit(String),
    #[error("No valid combined date range for {fuel_type} meters: {reason}")]
    NoValidDateRange { fuel_type: FuelType, reason: String },
    #[error("Solar sub-meter missing from meter '{meter_id}': {reason}")]
    MissingSolarSubMeter { meter_id: String, reason: String },
    #[error("Inconsistent aggregation state: {0}")]
    InconsistentAggregationState(String),
    #[error("Meter '{meter_id}' has no data between {start} and {end}")]
    NotEnoughData {
        meter_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("Half hour slot index {0} is out of range")]
    InvalidSlot(usize),
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct OutputError {
    error: anyhow::Error,
}

impl OutputError {
    pub fn new(error: anyhow::Error) -> Self {
        Self { error }
    }
}
