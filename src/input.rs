use crate::core::aggregation::pipeline::AggregateDataService;
use crate::core::aggregation::solar::{SolarDisaggregator, SolarPvInstallation};
use crate::core::amr::half_hour_series::{DayReading, HalfHourSeries, SourceTag};
use crate::core::amr::vectors::X48;
use crate::core::carbon::CarbonIntensities;
use crate::core::meter::{AggregationRule, FuelType, Meter};
use crate::core::tariffs::tariff_definition::CostSchedules;
use crate::core::tariffs::tariff_resolver::TariffResolver;
use crate::core::units::{ELECTRICITY_FALLBACK_KG_CO2_PER_KWH, GAS_KG_CO2_PER_KWH};
use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_valid::Validate;
use std::io::{BufReader, Read};
use std::sync::Arc;

pub fn ingest_for_processing(json: impl Read) -> Result<SchoolInput, anyhow::Error> {
    SchoolInput::init_with_json(json)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SchoolInput {
    #[validate]
    pub school: SchoolDetails,
    #[serde(default)]
    pub default_tariffs: IndexMap<FuelType, CostSchedules>,
    #[serde(default)]
    #[validate]
    pub carbon: CarbonInput,
    #[serde(default)]
    #[validate]
    pub solar_yield: Vec<YieldDay>,
    #[validate]
    pub meters: Vec<MeterInput>,
    #[serde(default)]
    pub options: RunOptions,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SchoolDetails {
    pub name: String,
    #[validate(minimum = 0.)]
    pub floor_area: Option<f64>,
    pub pupils: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CarbonInput {
    #[validate(minimum = 0.)]
    pub gas_kg_per_kwh: Option<f64>,
    #[validate(minimum = 0.)]
    pub electricity_fallback_kg_per_kwh: Option<f64>,
    #[serde(default)]
    #[validate]
    pub grid_intensity: Vec<IntensityDay>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IntensityDay {
    pub date: NaiveDate,
    #[validate(min_items = 48)]
    #[validate(max_items = 48)]
    pub kg_per_kwh: Vec<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct YieldDay {
    pub date: NaiveDate,
    #[validate(min_items = 48)]
    #[validate(max_items = 48)]
    pub kwh_per_kwp: Vec<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MeterInput {
    pub id: String,
    pub name: String,
    pub fuel_type: FuelType,
    #[validate(minimum = 0.)]
    pub floor_area: Option<f64>,
    pub pupil_count: Option<u32>,
    #[serde(default)]
    pub aggregation_rules: Vec<AggregationRule>,
    #[validate]
    pub readings: Vec<ReadingInput>,
    #[serde(default)]
    pub tariffs: CostSchedules,
    #[validate]
    pub solar_pv: Option<SolarPvInstallation>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReadingInput {
    pub date: NaiveDate,
    #[validate(min_items = 48)]
    #[validate(max_items = 48)]
    pub kwh: Vec<f64>,
    #[serde(default = "default_source_tag")]
    pub source_tag: SourceTag,
    pub substituted_from_date: Option<NaiveDate>,
}

fn default_source_tag() -> SourceTag {
    SourceTag::Original
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    /// Aggregate a fuel type's only meter as a copy, keeping the original as a component.
    #[serde(default)]
    pub copy_single_meter: bool,
}

impl SchoolInput {
    pub fn init_with_json(json: impl Read) -> Result<Self, anyhow::Error> {
        let reader = BufReader::new(json);

        let input: SchoolInput = serde_json::from_reader(reader)?;
        input
            .validate()
            .map_err(|errors| anyhow!("School input failed validation: {errors}"))?;
        input.check_tariffs()?;

        Ok(input)
    }

    fn check_tariffs(&self) -> anyhow::Result<()> {
        for (fuel_type, schedules) in &self.default_tariffs {
            schedules
                .validate()
                .map_err(|error| anyhow!("Default {fuel_type} tariff is invalid: {error}"))?;
        }
        for meter in &self.meters {
            meter
                .tariffs
                .validate()
                .map_err(|error| anyhow!("Tariff for meter '{}' is invalid: {error}", meter.id))?;
        }
        Ok(())
    }

    pub fn school_name(&self) -> &str {
        &self.school.name
    }

    pub fn carbon_intensities(&self) -> anyhow::Result<CarbonIntensities> {
        let grid_intensity = series_from_days(
            self.carbon
                .grid_intensity
                .iter()
                .map(|day| (day.date, day.kg_per_kwh.as_slice())),
        )?;
        Ok(CarbonIntensities {
            gas_kg_per_kwh: self.carbon.gas_kg_per_kwh.unwrap_or(GAS_KG_CO2_PER_KWH),
            electricity_fallback_kg_per_kwh: self
                .carbon
                .electricity_fallback_kg_per_kwh
                .unwrap_or(ELECTRICITY_FALLBACK_KG_CO2_PER_KWH),
            grid_intensity: Arc::new(grid_intensity),
        })
    }

    pub fn solar_yield(&self) -> anyhow::Result<HalfHourSeries> {
        series_from_days(
            self.solar_yield
                .iter()
                .map(|day| (day.date, day.kwh_per_kwp.as_slice())),
        )
    }

    pub fn tariff_resolver(&self) -> TariffResolver {
        TariffResolver::new(self.default_tariffs.clone())
    }

    pub fn build_meters(&self) -> anyhow::Result<Vec<Meter>> {
        let carbon = self.carbon_intensities()?;
        self.meters
            .iter()
            .map(|meter| meter.build(&carbon))
            .collect()
    }

    /// Everything needed to run this school's aggregation.
    pub fn into_service(self) -> anyhow::Result<AggregateDataService> {
        let meters = self.build_meters()?;
        let solar = SolarDisaggregator::new(Arc::new(self.solar_yield()?));

        Ok(AggregateDataService::new(
            self.school_name(),
            meters,
            self.tariff_resolver(),
            solar,
            self.options.copy_single_meter,
        ))
    }
}

impl MeterInput {
    fn build(&self, carbon: &CarbonIntensities) -> anyhow::Result<Meter> {
        let mut series = HalfHourSeries::new();
        for reading in &self.readings {
            if series.reading(&reading.date).is_some() {
                bail!(
                    "Meter '{}' has more than one reading for {}",
                    self.id,
                    reading.date
                );
            }
            let slots = to_x48(&reading.kwh)?;
            let day_reading = match reading.substituted_from_date {
                Some(from_date) => DayReading::substituted(reading.date, slots, from_date),
                None => DayReading::new(reading.date, slots, reading.source_tag),
            };
            series.insert(reading.date, day_reading)?;
        }

        Ok(Meter::new(&self.id, &self.name, self.fuel_type, series)
            .with_floor_area(self.floor_area)
            .with_pupil_count(self.pupil_count)
            .with_aggregation_rules(self.aggregation_rules.iter().copied())
            .with_cost_schedules(self.tariffs.clone())
            .with_carbon_schedule(carbon.schedule_for(self.fuel_type))
            .with_solar_pv(self.solar_pv.clone()))
    }
}

fn to_x48(values: &[f64]) -> anyhow::Result<X48> {
    <X48>::try_from(values)
        .map_err(|_| anyhow!("Expected 48 half-hourly values, got {}", values.len()))
}

fn series_from_days<'a>(
    days: impl IntoIterator<Item = (NaiveDate, &'a [f64])>,
) -> anyhow::Result<HalfHourSeries> {
    let mut series = HalfHourSeries::new();
    for (date, values) in days {
        series.insert_slots(date, to_x48(values)?, SourceTag::Original);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tariffs::tariff_definition::TariffKind;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::{json, Value};

    fn half_hours(value: f64) -> Vec<f64> {
        vec![value; 48]
    }

    #[fixture]
    fn school_json() -> Value {
        json!({
            "school": {"name": "Whiteflower Primary", "floor_area": 1200.0, "pupils": 240},
            "default_tariffs": {
                "electricity": {
                    "economic": [{
                        "start_date": "2020-01-01", "end_date": "2030-12-31",
                        "rate": {"type": "flat", "per_kwh": 0.15}
                    }],
                    "accounting": []
                }
            },
            "carbon": {
                "grid_intensity": [{"date": "2024-01-01", "kg_per_kwh": half_hours(0.2)}]
            },
            "meters": [{
                "id": "1591058886735",
                "name": "Main incomer",
                "fuel_type": "electricity",
                "aggregation_rules": ["ignore_start_date"],
                "readings": [
                    {"date": "2024-01-01", "kwh": half_hours(1.0)},
                    {"date": "2024-01-02", "kwh": half_hours(1.5), "substituted_from_date": "2023-12-26"},
                    {"date": "2024-01-03", "kwh": half_hours(0.0), "source_tag": "LGAP"}
                ],
                "tariffs": {
                    "accounting": [{
                        "start_date": "2024-01-01", "end_date": "2024-12-31",
                        "rate": {
                            "type": "differential",
                            "day_window": {"day_start": "07:00", "day_end": "00:00"},
                            "day_rate": 0.3, "night_rate": 0.1
                        },
                        "standing_charges": [{"kind": "standing_charge", "billing_period": "day", "rate": 1.0}]
                    }]
                }
            }],
            "options": {"copy_single_meter": true}
        })
    }

    fn ingest(value: &Value) -> anyhow::Result<SchoolInput> {
        ingest_for_processing(value.to_string().as_bytes())
    }

    #[rstest]
    fn should_build_meters_from_input(school_json: Value) {
        let input = ingest(&school_json).unwrap();
        assert_eq!(input.school_name(), "Whiteflower Primary");
        assert!(input.options.copy_single_meter);

        let meters = input.build_meters().unwrap();

        assert_eq!(meters.len(), 1);
        let meter = &meters[0];
        assert_eq!(meter.fuel_type(), FuelType::Electricity);
        assert!(meter
            .aggregation_rules()
            .contains(&AggregationRule::IgnoreStartDate));
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let reading = meter.series().reading(&date).unwrap();
        assert_eq!(reading.source_tag, SourceTag::Substituted);
        assert_eq!(reading.substituted_from_date, NaiveDate::from_ymd_opt(2023, 12, 26));
        assert_eq!(meter.cost_schedules().schedule(TariffKind::Accounting).len(), 1);
        assert!(meter.cost_schedules().schedule(TariffKind::Economic).is_empty());
    }

    #[rstest]
    fn should_reject_short_readings(mut school_json: Value) {
        school_json["meters"][0]["readings"][0]["kwh"] = json!([1.0, 2.0]);
        let error = ingest(&school_json).unwrap_err();
        assert!(error.to_string().contains("failed validation"));
    }

    #[rstest]
    fn should_reject_unknown_fields(mut school_json: Value) {
        school_json["meters"][0]["mpan"] = json!("1591058886735");
        assert!(ingest(&school_json).is_err());
    }

    #[rstest]
    fn should_reject_negative_capacity(mut school_json: Value) {
        school_json["meters"][0]["solar_pv"] = json!({"kwp": -4.0});
        assert!(ingest(&school_json).is_err());
    }

    #[rstest]
    fn should_reject_inverted_tariff_dates(mut school_json: Value) {
        school_json["default_tariffs"]["electricity"]["economic"][0]["end_date"] =
            json!("2019-01-01");
        let error = ingest(&school_json).unwrap_err();
        assert!(error.to_string().contains("Default electricity tariff is invalid"));
    }

    #[rstest]
    fn should_reject_duplicate_reading_dates(mut school_json: Value) {
        school_json["meters"][0]["readings"][1]["date"] = json!("2024-01-01");
        let input = ingest(&school_json).unwrap();
        assert!(input.build_meters().is_err());
    }

    #[rstest]
    fn should_default_carbon_factors(school_json: Value) {
        let carbon = ingest(&school_json).unwrap().carbon_intensities().unwrap();
        assert_eq!(carbon.gas_kg_per_kwh, GAS_KG_CO2_PER_KWH);
        assert_eq!(carbon.grid_intensity.len(), 1);
    }
}
