use crate::core::amr::vectors::{total_x48, X48};
use crate::core::units::SLOTS_PER_DAY;
use crate::errors::AggregationError;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Where a day of readings came from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, strum::Display)]
pub enum SourceTag {
    #[serde(rename = "ORIG")]
    #[strum(serialize = "ORIG")]
    Original,
    #[serde(rename = "SUBS")]
    #[strum(serialize = "SUBS")]
    Substituted,
    /// Sentinel marking a day inside a long gap in the data.
    #[serde(rename = "LGAP")]
    #[strum(serialize = "LGAP")]
    LongGap,
    #[serde(rename = "AGGR")]
    #[strum(serialize = "AGGR")]
    Aggregated,
    #[serde(rename = "CALC")]
    #[strum(serialize = "CALC")]
    Calculated,
    #[serde(rename = "SIGN")]
    #[strum(serialize = "SIGN")]
    SignCorrected,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DayReading {
    pub date: NaiveDate,
    pub slots: X48,
    pub source_tag: SourceTag,
    pub substituted_from_date: Option<NaiveDate>,
}

impl DayReading {
    pub fn new(date: NaiveDate, slots: X48, source_tag: SourceTag) -> Self {
        Self {
            date,
            slots,
            source_tag,
            substituted_from_date: None,
        }
    }

    pub fn substituted(date: NaiveDate, slots: X48, substituted_from_date: NaiveDate) -> Self {
        Self {
            date,
            slots,
            source_tag: SourceTag::Substituted,
            substituted_from_date: Some(substituted_from_date),
        }
    }
}

/// Per-date cache of day totals. Only the owning series invalidates entries, through its own
/// mutation methods, and a cloned series starts with an empty cache.
#[derive(Debug, Default)]
struct DayTotalCache {
    totals: RwLock<HashMap<NaiveDate, f64>>,
}

impl DayTotalCache {
    fn get(&self, date: &NaiveDate) -> Option<f64> {
        self.totals.read().get(date).copied()
    }

    fn insert(&self, date: NaiveDate, total: f64) {
        self.totals.write().insert(date, total);
    }

    fn invalidate(&self, date: &NaiveDate) {
        self.totals.write().remove(date);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.totals.read().len()
    }
}

impl Clone for DayTotalCache {
    fn clone(&self) -> Self {
        Default::default()
    }
}

/// Half-hourly readings for one meter, keyed by date.
///
/// `min_date`/`max_date` are the observed range and only move when readings are inserted or
/// removed. The effective `start_date`/`end_date` default to the observed range and can be
/// narrowed by [`HalfHourSeries::long_gap_boundary`]; everything downstream of ingestion only
/// sees readings inside the effective range.
#[derive(Clone, Debug, Default)]
pub struct HalfHourSeries {
    readings: BTreeMap<NaiveDate, DayReading>,
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
    start_date_override: Option<NaiveDate>,
    end_date_override: Option<NaiveDate>,
    total_cache: DayTotalCache,
}

impl HalfHourSeries {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_readings(
        readings: impl IntoIterator<Item = DayReading>,
    ) -> Result<Self, AggregationError> {
        let mut series = Self::new();
        for reading in readings {
            series.insert(reading.date, reading)?;
        }
        Ok(series)
    }

    /// Store a day of readings under `date`, replacing any existing day.
    pub fn insert(&mut self, date: NaiveDate, reading: DayReading) -> Result<(), AggregationError> {
        if reading.date != date {
            return Err(AggregationError::DateMismatch {
                key_date: date,
                reading_date: reading.date,
            });
        }
        self.min_date = Some(self.min_date.map_or(date, |min| min.min(date)));
        self.max_date = Some(self.max_date.map_or(date, |max| max.max(date)));
        self.total_cache.invalidate(&date);
        self.readings.insert(date, reading);

        Ok(())
    }

    /// Convenience for derived series, where the reading date always matches its key.
    pub fn insert_slots(&mut self, date: NaiveDate, slots: X48, source_tag: SourceTag) {
        self.min_date = Some(self.min_date.map_or(date, |min| min.min(date)));
        self.max_date = Some(self.max_date.map_or(date, |max| max.max(date)));
        self.total_cache.invalidate(&date);
        self.readings
            .insert(date, DayReading::new(date, slots, source_tag));
    }

    pub fn remove(&mut self, date: &NaiveDate) -> Option<DayReading> {
        let removed = self.readings.remove(date);
        if removed.is_some() {
            self.total_cache.invalidate(date);
            self.min_date = self.readings.keys().next().copied();
            self.max_date = self.readings.keys().next_back().copied();
        }
        removed
    }

    pub fn min_date(&self) -> Option<NaiveDate> {
        self.min_date
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.max_date
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date_override.or(self.min_date)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date_override.or(self.max_date)
    }

    fn in_effective_range(&self, date: &NaiveDate) -> bool {
        match (self.start_date(), self.end_date()) {
            (Some(start), Some(end)) => start <= *date && *date <= end,
            _ => false,
        }
    }

    pub fn has_date(&self, date: &NaiveDate) -> bool {
        self.in_effective_range(date) && self.readings.contains_key(date)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn reading(&self, date: &NaiveDate) -> Option<&DayReading> {
        if !self.in_effective_range(date) {
            return None;
        }
        self.readings.get(date)
    }

    pub fn slots(&self, date: &NaiveDate) -> Option<&X48> {
        self.reading(date).map(|reading| &reading.slots)
    }

    pub fn slot(&self, date: &NaiveDate, slot_index: usize) -> Option<f64> {
        self.slots(date)
            .and_then(|slots| slots.get(slot_index).copied())
    }

    pub fn set_slot(
        &mut self,
        date: &NaiveDate,
        slot_index: usize,
        value: f64,
    ) -> Result<(), AggregationError> {
        if slot_index >= SLOTS_PER_DAY {
            return Err(AggregationError::InvalidSlot(slot_index));
        }
        let reading = self.readings.get_mut(date).ok_or_else(|| {
            AggregationError::InconsistentAggregationState(format!(
                "no reading on {date} to update"
            ))
        })?;
        reading.slots[slot_index] = value;
        self.total_cache.invalidate(date);

        Ok(())
    }

    /// Sum of the day's slots, computed on first request and cached until the day is rewritten.
    pub fn day_total(&self, date: &NaiveDate) -> Option<f64> {
        let slots = self.slots(date)?;
        if let Some(total) = self.total_cache.get(date) {
            return Some(total);
        }
        let total = total_x48(slots);
        self.total_cache.insert(*date, total);
        Some(total)
    }

    /// Total over the stored days in `[start, end]`; days with no readings contribute nothing.
    pub fn range_total(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        self.iter()
            .filter(|(date, _)| start <= **date && **date <= end)
            .filter_map(|(date, _)| self.day_total(date))
            .sum()
    }

    /// Readings inside the effective range, in date order.
    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DayReading)> + '_ {
        self.start_date()
            .zip(self.end_date())
            .filter(|(start, end)| start <= end)
            .into_iter()
            .flat_map(move |(start, end)| self.readings.range(start..=end))
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.iter().map(|(date, _)| *date)
    }

    /// Dates inside the observed range with no readings. Used for data quality reporting only.
    pub fn missing_dates(&self) -> Vec<NaiveDate> {
        let (Some(min_date), Some(max_date)) = (self.min_date, self.max_date) else {
            return vec![];
        };
        min_date
            .iter_days()
            .take_while(|date| *date <= max_date)
            .filter(|date| !self.readings.contains_key(date))
            .collect()
    }

    /// Narrow the effective range around days tagged as long gaps.
    ///
    /// The start moves to the day after the latest long gap day that precedes the last real
    /// reading. Long gap days trailing the last real reading pull the end back to the day before
    /// the first of them.
    pub fn long_gap_boundary(&mut self) {
        let gap_dates = self
            .readings
            .values()
            .filter(|reading| reading.source_tag == SourceTag::LongGap)
            .map(|reading| reading.date)
            .collect::<Vec<_>>();
        if gap_dates.is_empty() {
            return;
        }
        let Some(last_real_date) = self
            .readings
            .values()
            .rev()
            .find(|reading| reading.source_tag != SourceTag::LongGap)
            .map(|reading| reading.date)
        else {
            debug!("series contains only long gap days, leaving its range unchanged");
            return;
        };

        if let Some(last_leading_gap) = gap_dates
            .iter()
            .filter(|date| **date < last_real_date)
            .max()
        {
            self.start_date_override = last_leading_gap.succ_opt();
        }
        if let Some(first_trailing_gap) = gap_dates
            .iter()
            .filter(|date| **date > last_real_date)
            .min()
        {
            self.end_date_override = first_trailing_gap.pred_opt();
        }
        debug!(
            start_date = ?self.start_date(),
            end_date = ?self.end_date(),
            "applied long gap boundary"
        );
    }
}
