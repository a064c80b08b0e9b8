use crate::core::amr::vectors::{add_x48, total_x48, X48, ZERO_X48};
use crate::core::units::SLOTS_PER_DAY;
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::collections::BTreeMap;

pub const FLAT_RATE: &str = "flat_rate";
pub const DAYTIME_RATE: &str = "daytime_rate";
pub const NIGHTTIME_RATE: &str = "nighttime_rate";

/// One day of costs, broken down by energy rate (per half hour) and standing charge (per day).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayCost {
    pub rates_x48: IndexMap<String, X48>,
    pub standing_charges: IndexMap<String, f64>,
}

impl DayCost {
    pub fn energy_x48(&self) -> X48 {
        self.rates_x48
            .values()
            .fold(ZERO_X48, |total, rate| add_x48(&total, rate))
    }

    /// Energy costs per half hour with the day's standing charges spread evenly across slots.
    pub fn total_x48(&self) -> X48 {
        let standing_per_slot = self.standing_charges_total() / SLOTS_PER_DAY as f64;
        self.energy_x48().map(|cost| cost + standing_per_slot)
    }

    pub fn standing_charges_total(&self) -> f64 {
        self.standing_charges.values().sum()
    }

    pub fn total(&self) -> f64 {
        total_x48(&self.energy_x48()) + self.standing_charges_total()
    }

    /// Combine two days component by component, keeping components found in only one of them.
    pub fn add(&self, other: &DayCost) -> DayCost {
        let mut combined = self.clone();
        for (name, rate) in &other.rates_x48 {
            combined
                .rates_x48
                .entry(name.clone())
                .and_modify(|existing| *existing = add_x48(existing, rate))
                .or_insert(*rate);
        }
        for (name, charge) in &other.standing_charges {
            *combined
                .standing_charges
                .entry(name.clone())
                .or_insert(0.) += charge;
        }
        combined
    }
}

/// Costs for every costed day of a meter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CostSeries {
    days: BTreeMap<NaiveDate, DayCost>,
}

impl CostSeries {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, date: NaiveDate, day_cost: DayCost) {
        self.days.insert(date, day_cost);
    }

    pub fn day(&self, date: &NaiveDate) -> Option<&DayCost> {
        self.days.get(date)
    }

    pub fn day_total(&self, date: &NaiveDate) -> Option<f64> {
        self.day(date).map(DayCost::total)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn range_total(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        self.days
            .range(start..=end.max(start))
            .map(|(_, day)| day.total())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Per-date sum of several series. A date is costed from whichever series have it.
    pub fn sum<'a>(series: impl IntoIterator<Item = &'a CostSeries>) -> CostSeries {
        let mut summed = CostSeries::new();
        for cost_series in series {
            for (date, day_cost) in &cost_series.days {
                let combined = match summed.days.get(date) {
                    Some(existing) => existing.add(day_cost),
                    None => day_cost.clone(),
                };
                summed.days.insert(*date, combined);
            }
        }
        summed
    }

    /// Drop every day outside `[start, end]`.
    pub fn restricted_to(mut self, start: NaiveDate, end: NaiveDate) -> CostSeries {
        self.days.retain(|date, _| start <= *date && *date <= end);
        self
    }
}
