use crate::core::amr::vectors::{multiply_x48, scale_x48, window_weights_x48, X48};
use crate::core::meter::{FuelType, Meter};
use crate::core::tariffs::costs::{
    CostSeries, DayCost, DAYTIME_RATE, FLAT_RATE, NIGHTTIME_RATE,
};
use crate::core::tariffs::tariff_definition::{
    BillingPeriod, CostSchedules, EnergyRate, TariffDefinition, TariffKind,
};
use crate::core::units::{days_in_month, days_in_quarter};
use crate::errors::AggregationError;
use chrono::NaiveDate;
use indexmap::{indexmap, IndexMap};
use tracing::debug;

/// Energy cost of one day, before standing charges.
#[derive(Clone, Debug, PartialEq)]
pub enum EnergyCost {
    Flat(X48),
    DayNight { day: X48, night: X48 },
}

impl EnergyCost {
    fn into_rates(self) -> IndexMap<String, X48> {
        match self {
            EnergyCost::Flat(cost) => indexmap! { FLAT_RATE.to_string() => cost },
            EnergyCost::DayNight { day, night } => indexmap! {
                DAYTIME_RATE.to_string() => day,
                NIGHTTIME_RATE.to_string() => night,
            },
        }
    }
}

/// Resolves which tariff prices each day of a meter, falling back to the area defaults for the
/// meter's fuel when the meter has no tariff of its own for that day.
#[derive(Clone, Debug, Default)]
pub struct TariffResolver {
    default_schedules: IndexMap<FuelType, CostSchedules>,
}

impl TariffResolver {
    pub fn new(default_schedules: IndexMap<FuelType, CostSchedules>) -> Self {
        Self { default_schedules }
    }

    /// The last definition in `schedule` whose date range contains `date`.
    ///
    /// Resolution is by position, not by how narrow the date range is: callers store a meter's
    /// definitions from least to most specific so that the most specific match comes last.
    pub fn resolve<'a>(
        schedule: &'a [TariffDefinition],
        date: &NaiveDate,
    ) -> Option<&'a TariffDefinition> {
        schedule.iter().rev().find(|tariff| tariff.contains(date))
    }

    pub fn resolve_for_meter<'a>(
        &'a self,
        meter: &'a Meter,
        kind: TariffKind,
        date: &NaiveDate,
    ) -> Result<&'a TariffDefinition, AggregationError> {
        Self::resolve(meter.cost_schedules().schedule(kind), date)
            .or_else(|| {
                self.default_schedules
                    .get(&meter.fuel_type().tariff_fuel())
                    .and_then(|defaults| Self::resolve(defaults.schedule(kind), date))
            })
            .ok_or_else(|| AggregationError::MissingTariffData {
                meter_id: meter.id().to_string(),
                fuel_type: meter.fuel_type(),
                date: *date,
            })
    }

    pub fn cost_vector(tariff: &TariffDefinition, kwh_x48: &X48) -> EnergyCost {
        match &tariff.rate {
            EnergyRate::Flat { per_kwh } => EnergyCost::Flat(scale_x48(kwh_x48, *per_kwh)),
            EnergyRate::Differential {
                day_window,
                day_rate,
                night_rate,
            } => {
                let day_weights = window_weights_x48(day_window.from_slot, day_window.to_slot);
                let night_weights = day_weights.map(|weight| 1.0 - weight);
                EnergyCost::DayNight {
                    day: multiply_x48(&scale_x48(&day_weights, *day_rate), kwh_x48),
                    night: multiply_x48(&scale_x48(&night_weights, *night_rate), kwh_x48),
                }
            }
        }
    }

    /// Every standing charge of `tariff` as a daily amount for `date`.
    ///
    /// Per-kWh charges use the period's total consumption and are not prorated within the day.
    pub fn standing_charge(
        date: &NaiveDate,
        tariff: &TariffDefinition,
        period_total_kwh: f64,
    ) -> IndexMap<String, f64> {
        tariff
            .standing_charges
            .iter()
            .map(|charge| {
                let daily = match charge.billing_period {
                    BillingPeriod::Day => charge.rate,
                    BillingPeriod::Month => charge.rate / days_in_month(*date) as f64,
                    BillingPeriod::Quarter => charge.rate / days_in_quarter(*date) as f64,
                    BillingPeriod::Kwh => charge.rate * period_total_kwh,
                };
                (charge.kind.clone(), daily)
            })
            .collect()
    }

    /// Whether any of `meters` has a day/night tariff overlapping `[start, end]`.
    pub fn any_differential(meters: &[Meter], start: NaiveDate, end: NaiveDate) -> bool {
        meters.iter().any(|meter| {
            let schedules = meter.cost_schedules();
            schedules
                .economic
                .iter()
                .chain(schedules.accounting.iter())
                .any(|tariff| tariff.is_differential() && tariff.overlaps(start, end))
        })
    }

    /// Cost every effective-range day of `meter` from the schedule of the given kind.
    ///
    /// Economic costs carry the energy rate only; accounting costs add standing charges.
    pub fn cost_series(
        &self,
        meter: &Meter,
        kind: TariffKind,
    ) -> Result<CostSeries, AggregationError> {
        let mut costs = CostSeries::new();
        for (date, reading) in meter.series().iter() {
            let tariff = self.resolve_for_meter(meter, kind, date)?;
            let standing_charges = match kind {
                TariffKind::Economic => Default::default(),
                TariffKind::Accounting => {
                    let day_kwh = meter.series().day_total(date).unwrap_or_default();
                    Self::standing_charge(date, tariff, day_kwh)
                }
            };
            costs.insert(
                *date,
                DayCost {
                    rates_x48: Self::cost_vector(tariff, &reading.slots).into_rates(),
                    standing_charges,
                },
            );
        }
        debug!(meter = meter.id(), %kind, days = costs.dates().count(), "built cost series");

        Ok(costs)
    }
}
