use crate::core::units::{slot_for_time, SLOTS_PER_DAY};
use crate::errors::AggregationError;
use anyhow::bail;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One dated tariff. A meter holds these as an ordered list, least specific first.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TariffDefinition {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rate: EnergyRate,
    #[serde(default)]
    pub standing_charges: Vec<StandingCharge>,
}

impl TariffDefinition {
    pub fn flat(start_date: NaiveDate, end_date: NaiveDate, per_kwh: f64) -> Self {
        Self {
            start_date,
            end_date,
            rate: EnergyRate::Flat { per_kwh },
            standing_charges: vec![],
        }
    }

    pub fn differential(
        start_date: NaiveDate,
        end_date: NaiveDate,
        day_window: DayWindow,
        day_rate: f64,
        night_rate: f64,
    ) -> Self {
        Self {
            start_date,
            end_date,
            rate: EnergyRate::Differential {
                day_window,
                day_rate,
                night_rate,
            },
            standing_charges: vec![],
        }
    }

    pub fn with_standing_charge(mut self, standing_charge: StandingCharge) -> Self {
        self.standing_charges.push(standing_charge);
        self
    }

    /// Inclusive at both ends.
    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.start_date <= *date && *date <= self.end_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        !(self.end_date < start || self.start_date > end)
    }

    pub fn is_differential(&self) -> bool {
        matches!(self.rate, EnergyRate::Differential { .. })
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.end_date < self.start_date {
            bail!(
                "Tariff ends ({}) before it starts ({})",
                self.end_date,
                self.start_date
            );
        }
        if let EnergyRate::Differential { day_window, .. } = &self.rate {
            if day_window.from_slot >= SLOTS_PER_DAY || day_window.to_slot > SLOTS_PER_DAY {
                bail!(
                    "Differential tariff day window {}..{} is outside the {SLOTS_PER_DAY} half hours of a day",
                    day_window.from_slot,
                    day_window.to_slot
                );
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnergyRate {
    Flat {
        per_kwh: f64,
    },
    Differential {
        day_window: DayWindow,
        day_rate: f64,
        night_rate: f64,
    },
}

/// Half-open slot window `[from_slot, to_slot)` charged at the day rate. Wraps across midnight
/// when `to_slot < from_slot`.
///
/// Deserializes from either slot indices or `"HH:MM"` times of day.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "DayWindowInput")]
pub struct DayWindow {
    pub from_slot: usize,
    pub to_slot: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DayWindowInput {
    Slots { from_slot: usize, to_slot: usize },
    Times { day_start: String, day_end: String },
}

impl TryFrom<DayWindowInput> for DayWindow {
    type Error = anyhow::Error;

    fn try_from(value: DayWindowInput) -> Result<Self, Self::Error> {
        match value {
            DayWindowInput::Slots { from_slot, to_slot } => Ok(Self { from_slot, to_slot }),
            DayWindowInput::Times { day_start, day_end } => Ok(Self {
                from_slot: parse_slot(&day_start)?,
                to_slot: parse_slot(&day_end)?,
            }),
        }
    }
}

fn parse_slot(time_of_day: &str) -> anyhow::Result<usize> {
    let Some((hour, minute)) = time_of_day.split_once(':') else {
        bail!("Expected a time of day as HH:MM, got '{time_of_day}'");
    };
    Ok(slot_for_time(hour.parse()?, minute.parse()?)?)
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StandingCharge {
    pub kind: String,
    pub billing_period: BillingPeriod,
    pub rate: f64,
}

impl StandingCharge {
    pub fn new(kind: &str, billing_period: BillingPeriod, rate: f64) -> Self {
        Self {
            kind: kind.to_string(),
            billing_period,
            rate,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum BillingPeriod {
    Day,
    Month,
    Quarter,
    Kwh,
}

impl FromStr for BillingPeriod {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "kwh" => Ok(Self::Kwh),
            other => Err(AggregationError::UnsupportedRateUnit(other.to_string())),
        }
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = AggregationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingPeriod> for String {
    fn from(value: BillingPeriod) -> Self {
        value.to_string()
    }
}

impl Display for BillingPeriod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let unit = match self {
            BillingPeriod::Day => "day",
            BillingPeriod::Month => "month",
            BillingPeriod::Quarter => "quarter",
            BillingPeriod::Kwh => "kwh",
        };
        write!(f, "{unit}")
    }
}

/// Which of a meter's two price schedules a cost series is built from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TariffKind {
    /// Energy rates only, used to compare consumption in money terms.
    Economic,
    /// The contracted tariff including standing charges, used to reproduce bills.
    Accounting,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostSchedules {
    #[serde(default)]
    pub economic: Vec<TariffDefinition>,
    #[serde(default)]
    pub accounting: Vec<TariffDefinition>,
}

impl CostSchedules {
    pub fn schedule(&self, kind: TariffKind) -> &[TariffDefinition] {
        match kind {
            TariffKind::Economic => &self.economic,
            TariffKind::Accounting => &self.accounting,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.economic.is_empty() && self.accounting.is_empty()
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        self.economic
            .iter()
            .chain(self.accounting.iter())
            .try_for_each(TariffDefinition::validate)
    }
}
