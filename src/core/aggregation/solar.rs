use crate::core::amr::half_hour_series::{HalfHourSeries, SourceTag};
use crate::core::amr::vectors::{min_x48, scale_x48, subtract_x48, X48, ZERO_X48};
use crate::core::meter::{FuelType, Meter, SubMeterType};
use crate::core::units::SLOTS_PER_DAY;
use crate::errors::AggregationError;
use crate::statistics::histogram;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Best-effort data quality correction, open to revision: an export series is taken to already
/// be negative (the stored convention) only when large negative half hours outnumber large
/// positive ones by at least this factor. Anything else is negated.
pub const NEGATIVE_EXPORT_DOMINANCE_RATIO: usize = 10;

/// Half hours within this many kWh of zero are ignored by the export sign check.
pub const LARGE_EXPORT_KWH: f64 = 0.1;

const INVARIANT_REL_TOL: f64 = 1e-9;
const INVARIANT_ABS_TOL: f64 = 1e-9;

/// A simulated solar PV array attached to a mains electricity meter.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SolarPvInstallation {
    #[validate(minimum = 0.)]
    pub kwp: f64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl SolarPvInstallation {
    pub fn is_installed_on(&self, date: &NaiveDate) -> bool {
        self.start_date.map_or(true, |start| start <= *date)
            && self.end_date.map_or(true, |end| *date <= end)
    }
}

/// The per-slot split of one day of solar production.
struct SolarDay {
    mains_net: X48,
    production: X48,
    self_consumed: X48,
    /// Stored negative.
    export: X48,
    original_mains: X48,
    true_consumption: X48,
}

impl SolarDay {
    fn check_balances(&self, meter_id: &str, date: &NaiveDate) -> Result<(), AggregationError> {
        for slot in 0..SLOTS_PER_DAY {
            let exported = -self.export[slot];
            let production_balances = is_close!(
                self.self_consumed[slot] + exported,
                self.production[slot],
                rel_tol = INVARIANT_REL_TOL,
                abs_tol = INVARIANT_ABS_TOL
            );
            let consumption_balances = is_close!(
                self.mains_net[slot] + self.self_consumed[slot],
                self.true_consumption[slot],
                rel_tol = INVARIANT_REL_TOL,
                abs_tol = INVARIANT_ABS_TOL
            );
            if !(production_balances && consumption_balances) {
                return Err(AggregationError::InconsistentAggregationState(format!(
                    "solar split for meter '{meter_id}' does not balance on {date} at slot {slot}"
                )));
            }
        }
        Ok(())
    }
}

/// Splits a mains electricity meter into mains net of solar, self consumption, export and the
/// original mains, from either a simulated array or metered generation and export.
#[derive(Clone, Debug, Default)]
pub struct SolarDisaggregator {
    yield_per_kwp: Arc<HalfHourSeries>,
}

impl SolarDisaggregator {
    /// `yield_per_kwp` is the regional output in kWh per installed kWp for each half hour.
    pub fn new(yield_per_kwp: Arc<HalfHourSeries>) -> Self {
        Self { yield_per_kwp }
    }

    /// Run whichever disaggregation the single electricity meter supports. A meter with neither
    /// metered solar sub-meters nor a simulated installation is returned unchanged.
    pub fn disaggregate(&self, mut meters: Vec<Meter>) -> Result<Meter, AggregationError> {
        if meters.len() != 1 {
            return Err(AggregationError::InconsistentAggregationState(format!(
                "solar disaggregation needs exactly one electricity meter, found {}",
                meters.len()
            )));
        }
        let meter = meters.remove(0);
        if meter.fuel_type() != FuelType::Electricity {
            return Err(AggregationError::InconsistentAggregationState(format!(
                "solar disaggregation needs an electricity meter, '{}' is {}",
                meter.id(),
                meter.fuel_type()
            )));
        }

        let has_metered_solar = meter.sub_meter(SubMeterType::Generation).is_some()
            || meter.sub_meter(SubMeterType::Export).is_some();
        if has_metered_solar {
            Self::metered(meter)
        } else if meter.solar_pv().is_some() {
            self.simulated(meter)
        } else {
            debug!(meter = meter.id(), "no solar to disaggregate");
            Ok(meter)
        }
    }

    /// Synthesise the array's output from its capacity and the regional yield, then split it
    /// into self consumption and export against the meter's own mains readings.
    pub fn simulated(&self, meter: Meter) -> Result<Meter, AggregationError> {
        let Some(installation) = meter.solar_pv().cloned() else {
            return Err(AggregationError::MissingSolarSubMeter {
                meter_id: meter.id().to_string(),
                reason: "no solar PV installation to simulate".into(),
            });
        };

        let mut days = vec![];
        for (date, reading) in meter.series().iter() {
            let production = match self.yield_per_kwp.slots(date) {
                Some(yield_x48) if installation.is_installed_on(date) => {
                    scale_x48(yield_x48, installation.kwp)
                }
                _ => ZERO_X48,
            };
            let original_mains = reading.slots;
            let self_consumed = min_x48(&production, &original_mains);
            let exported = subtract_x48(&production, &self_consumed);
            let day = SolarDay {
                mains_net: subtract_x48(&original_mains, &self_consumed),
                production,
                self_consumed,
                export: scale_x48(&exported, -1.),
                original_mains,
                true_consumption: original_mains,
            };
            day.check_balances(meter.id(), date)?;
            days.push((*date, day));
        }
        info!(
            meter = meter.id(),
            kwp = installation.kwp,
            days = days.len(),
            "disaggregated simulated solar"
        );

        Ok(Self::rebuild(meter, days, SourceTag::Calculated, true))
    }

    /// Split metered generation and export sub-meters against the mains readings, which are
    /// already net of solar.
    pub fn metered(mut meter: Meter) -> Result<Meter, AggregationError> {
        let missing = |meter: &Meter, reason: &str| AggregationError::MissingSolarSubMeter {
            meter_id: meter.id().to_string(),
            reason: reason.to_string(),
        };
        let solar_sub_meters = meter
            .sub_meters()
            .keys()
            .filter(|sub_meter_type| {
                matches!(sub_meter_type, SubMeterType::Generation | SubMeterType::Export)
            })
            .count();
        if solar_sub_meters != 2 {
            return Err(missing(
                &meter,
                "metered solar needs both a generation and an export sub-meter",
            ));
        }
        let (Some(generation), Some(export)) = (
            meter.take_sub_meter(SubMeterType::Generation),
            meter.take_sub_meter(SubMeterType::Export),
        ) else {
            return Err(missing(&meter, "solar sub-meters could not be detached"));
        };
        if generation.series().is_empty() || export.series().is_empty() {
            return Err(missing(&meter, "solar sub-meter has no readings"));
        }

        let export_series = Self::with_negative_export(export.series());
        let mut days = vec![];
        for (date, reading) in meter.series().iter() {
            let production = generation.series().slots(date).copied().unwrap_or(ZERO_X48);
            let export = export_series.slots(date).copied().unwrap_or(ZERO_X48);
            let mains = reading.slots;
            let exported = scale_x48(&export, -1.);
            let self_consumed = subtract_x48(&production, &exported);
            let day = SolarDay {
                mains_net: mains,
                production,
                self_consumed,
                export,
                original_mains: mains,
                true_consumption: std::array::from_fn(|i| {
                    mains[i] + production[i] - exported[i]
                }),
            };
            day.check_balances(meter.id(), date)?;
            days.push((*date, day));
        }
        info!(meter = meter.id(), days = days.len(), "disaggregated metered solar");

        // metered mains is already net of solar, so the meter's own series and costs stand
        Ok(Self::rebuild(meter, days, SourceTag::Calculated, false))
    }

    /// Whether an export series already uses the negative convention, judged from how many of
    /// its half hours sit well below zero against how many sit well above.
    pub fn export_is_negative(series: &HalfHourSeries) -> bool {
        let counts = histogram(
            series.iter().flat_map(|(_, reading)| reading.slots),
            &[-LARGE_EXPORT_KWH, LARGE_EXPORT_KWH],
        );
        let (large_negative, large_positive) = (counts[0], counts[2]);
        large_negative > NEGATIVE_EXPORT_DOMINANCE_RATIO * large_positive
    }

    /// The export series in the negative convention, negating every day if needed.
    pub fn with_negative_export(series: &HalfHourSeries) -> HalfHourSeries {
        if Self::export_is_negative(series) {
            return series.clone();
        }
        warn!("export series appears to be positive, negating it");
        let mut negated = HalfHourSeries::new();
        for (date, reading) in series.iter() {
            negated.insert_slots(*date, scale_x48(&reading.slots, -1.), SourceTag::SignCorrected);
        }
        negated
    }

    /// Attach the split as sub-meters. The top-level series is replaced by mains net of solar
    /// only when `replace_mains` is set, which drops anything derived from the old series.
    fn rebuild(
        meter: Meter,
        days: Vec<(NaiveDate, SolarDay)>,
        source_tag: SourceTag,
        replace_mains: bool,
    ) -> Meter {
        let mut mains_net = HalfHourSeries::new();
        let mut generation = HalfHourSeries::new();
        let mut self_consume = HalfHourSeries::new();
        let mut export = HalfHourSeries::new();
        let mut original_mains = HalfHourSeries::new();
        for (date, day) in days {
            mains_net.insert_slots(date, day.mains_net, source_tag);
            generation.insert_slots(date, day.production, source_tag);
            self_consume.insert_slots(date, day.self_consumed, source_tag);
            export.insert_slots(date, day.export, source_tag);
            original_mains.insert_slots(date, day.original_mains, source_tag);
        }

        let sub_meter = |suffix: &str, fuel_type: FuelType, series: HalfHourSeries| {
            let mut sub_meter = Meter::new(
                &format!("{}-{suffix}", meter.id()),
                &format!("{} {}", meter.name(), suffix.replace('_', " ")),
                fuel_type,
                series,
            )
            .with_cost_schedules(meter.cost_schedules().clone());
            if let Some(carbon_schedule) = meter.carbon_schedule() {
                sub_meter = sub_meter.with_carbon_schedule(carbon_schedule.clone());
            }
            sub_meter
        };
        let original_mains = sub_meter("original_mains", FuelType::Electricity, original_mains);
        let generation = sub_meter("generation", FuelType::SolarPv, generation);
        let self_consume = sub_meter("self_consume", FuelType::SolarPv, self_consume);
        let export = sub_meter("export", FuelType::ExportedSolarPv, export);

        let meter = if replace_mains {
            meter.with_series(mains_net)
        } else {
            meter
        };
        meter
            .with_sub_meter(SubMeterType::OriginalMains, original_mains)
            .with_sub_meter(SubMeterType::Generation, generation)
            .with_sub_meter(SubMeterType::SelfConsume, self_consume)
            .with_sub_meter(SubMeterType::Export, export)
    }
}
