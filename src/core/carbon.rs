use crate::core::amr::half_hour_series::{HalfHourSeries, SourceTag};
use crate::core::amr::vectors::{multiply_x48, scale_x48, X48};
use crate::core::meter::FuelType;
use crate::core::units::{ELECTRICITY_FALLBACK_KG_CO2_PER_KWH, GAS_KG_CO2_PER_KWH};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

/// Emission factors applied slot by slot to produce kg CO2 alongside kWh.
#[derive(Clone, Debug)]
pub enum CarbonSchedule {
    Flat {
        kg_per_kwh: f64,
    },
    /// Grid intensity (kg/kWh) per half hour. Days missing from the series use the fallback.
    HalfHourly {
        intensity: Arc<HalfHourSeries>,
        fallback_kg_per_kwh: f64,
    },
}

impl CarbonSchedule {
    /// Emissions for one day, plus whether the fallback factor had to be used.
    fn emissions_x48(&self, date: &NaiveDate, kwh: &X48) -> (X48, bool) {
        match self {
            CarbonSchedule::Flat { kg_per_kwh } => (scale_x48(kwh, *kg_per_kwh), false),
            CarbonSchedule::HalfHourly {
                intensity,
                fallback_kg_per_kwh,
            } => match intensity.slots(date) {
                Some(intensity_x48) => (multiply_x48(kwh, intensity_x48), false),
                None => (scale_x48(kwh, *fallback_kg_per_kwh), true),
            },
        }
    }

    pub fn co2_x48(&self, date: &NaiveDate, kwh: &X48) -> X48 {
        self.emissions_x48(date, kwh).0
    }

    pub fn co2_series(&self, kwh_series: &HalfHourSeries) -> HalfHourSeries {
        let mut co2 = HalfHourSeries::new();
        let mut fallback_days = 0;
        for (date, reading) in kwh_series.iter() {
            let (emissions, used_fallback) = self.emissions_x48(date, &reading.slots);
            if used_fallback {
                fallback_days += 1;
            }
            co2.insert_slots(*date, emissions, SourceTag::Calculated);
        }
        if fallback_days > 0 {
            warn!(
                fallback_days,
                "grid carbon intensity missing for some days, used the fallback emission factor"
            );
        }
        co2
    }
}

/// School-wide emission factors from which each meter's schedule is chosen.
#[derive(Clone, Debug)]
pub struct CarbonIntensities {
    pub gas_kg_per_kwh: f64,
    pub electricity_fallback_kg_per_kwh: f64,
    pub grid_intensity: Arc<HalfHourSeries>,
}

impl Default for CarbonIntensities {
    fn default() -> Self {
        Self {
            gas_kg_per_kwh: GAS_KG_CO2_PER_KWH,
            electricity_fallback_kg_per_kwh: ELECTRICITY_FALLBACK_KG_CO2_PER_KWH,
            grid_intensity: Default::default(),
        }
    }
}

impl CarbonIntensities {
    pub fn schedule_for(&self, fuel_type: FuelType) -> CarbonSchedule {
        match fuel_type {
            FuelType::Gas => CarbonSchedule::Flat {
                kg_per_kwh: self.gas_kg_per_kwh,
            },
            FuelType::Electricity
            | FuelType::StorageHeater
            | FuelType::SolarPv
            | FuelType::ExportedSolarPv => CarbonSchedule::HalfHourly {
                intensity: self.grid_intensity.clone(),
                fallback_kg_per_kwh: self.electricity_fallback_kg_per_kwh,
            },
        }
    }
}
