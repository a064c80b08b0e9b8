use crate::core::aggregation::solar::SolarPvInstallation;
use crate::core::amr::half_hour_series::HalfHourSeries;
use crate::core::amr::vectors::X48;
use crate::core::carbon::CarbonSchedule;
use crate::core::tariffs::costs::CostSeries;
use crate::core::tariffs::tariff_definition::{CostSchedules, TariffKind};
use crate::core::tariffs::tariff_resolver::TariffResolver;
use crate::errors::AggregationError;
use chrono::NaiveDate;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FuelType {
    Electricity,
    Gas,
    SolarPv,
    ExportedSolarPv,
    StorageHeater,
}

impl FuelType {
    /// The fuel whose area default tariffs apply to this meter.
    pub fn tariff_fuel(&self) -> FuelType {
        match self {
            FuelType::Gas => FuelType::Gas,
            FuelType::Electricity
            | FuelType::SolarPv
            | FuelType::ExportedSolarPv
            | FuelType::StorageHeater => FuelType::Electricity,
        }
    }
}

/// Per-meter flags that exclude a meter's own start or end date when combining date ranges.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRule {
    IgnoreStartDate,
    IgnoreEndDate,
    DeprecatedIncludeButIgnoreStartDate,
    DeprecatedIncludeButIgnoreEndDate,
}

impl AggregationRule {
    pub fn ignores_start_date(&self) -> bool {
        matches!(
            self,
            AggregationRule::IgnoreStartDate | AggregationRule::DeprecatedIncludeButIgnoreStartDate
        )
    }

    pub fn ignores_end_date(&self) -> bool {
        matches!(
            self,
            AggregationRule::IgnoreEndDate | AggregationRule::DeprecatedIncludeButIgnoreEndDate
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    Kwh,
    EconomicCost,
    AccountingCost,
    Co2,
}

/// Decompositions of a meter's own series, as produced by solar disaggregation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SubMeterType {
    OriginalMains,
    Generation,
    SelfConsume,
    Export,
}

/// A physical or synthetic meter and everything derived from its readings.
///
/// Stages take a meter by value and hand back a new one, so the sub-meter tree is never aliased.
#[derive(Clone, Debug)]
pub struct Meter {
    id: String,
    name: String,
    fuel_type: FuelType,
    floor_area: Option<f64>,
    pupil_count: Option<u32>,
    aggregation_rules: IndexSet<AggregationRule>,
    series: HalfHourSeries,
    cost_schedules: CostSchedules,
    carbon_schedule: Option<CarbonSchedule>,
    solar_pv: Option<SolarPvInstallation>,
    economic_costs: Option<CostSeries>,
    accounting_costs: Option<CostSeries>,
    co2: Option<HalfHourSeries>,
    sub_meters: IndexMap<SubMeterType, Meter>,
}

impl Meter {
    pub fn new(id: &str, name: &str, fuel_type: FuelType, series: HalfHourSeries) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            fuel_type,
            floor_area: None,
            pupil_count: None,
            aggregation_rules: Default::default(),
            series,
            cost_schedules: Default::default(),
            carbon_schedule: None,
            solar_pv: None,
            economic_costs: None,
            accounting_costs: None,
            co2: None,
            sub_meters: Default::default(),
        }
    }

    pub fn with_floor_area(mut self, floor_area: Option<f64>) -> Self {
        self.floor_area = floor_area;
        self
    }

    pub fn with_pupil_count(mut self, pupil_count: Option<u32>) -> Self {
        self.pupil_count = pupil_count;
        self
    }

    pub fn with_aggregation_rules(
        mut self,
        rules: impl IntoIterator<Item = AggregationRule>,
    ) -> Self {
        self.aggregation_rules = rules.into_iter().collect();
        self
    }

    pub fn with_cost_schedules(mut self, cost_schedules: CostSchedules) -> Self {
        self.cost_schedules = cost_schedules;
        self
    }

    pub fn with_carbon_schedule(mut self, carbon_schedule: CarbonSchedule) -> Self {
        self.carbon_schedule = Some(carbon_schedule);
        self
    }

    pub fn with_solar_pv(mut self, solar_pv: Option<SolarPvInstallation>) -> Self {
        self.solar_pv = solar_pv;
        self
    }

    pub fn with_sub_meter(mut self, sub_meter_type: SubMeterType, sub_meter: Meter) -> Self {
        self.sub_meters.insert(sub_meter_type, sub_meter);
        self
    }

    /// Replace the kWh series. Anything derived from the old series is dropped.
    pub fn with_series(mut self, series: HalfHourSeries) -> Self {
        self.series = series;
        self.economic_costs = None;
        self.accounting_costs = None;
        self.co2 = None;
        self
    }

    /// Narrow the series' effective range around any long gap. Run before aggregation.
    pub fn with_long_gap_boundary(mut self) -> Self {
        self.series.long_gap_boundary();
        self
    }

    pub(crate) fn with_derived_data(
        mut self,
        economic_costs: CostSeries,
        accounting_costs: CostSeries,
        co2: HalfHourSeries,
    ) -> Self {
        self.economic_costs = Some(economic_costs);
        self.accounting_costs = Some(accounting_costs);
        self.co2 = Some(co2);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fuel_type(&self) -> FuelType {
        self.fuel_type
    }

    pub fn floor_area(&self) -> Option<f64> {
        self.floor_area
    }

    pub fn pupil_count(&self) -> Option<u32> {
        self.pupil_count
    }

    pub fn aggregation_rules(&self) -> &IndexSet<AggregationRule> {
        &self.aggregation_rules
    }

    pub fn series(&self) -> &HalfHourSeries {
        &self.series
    }

    pub fn cost_schedules(&self) -> &CostSchedules {
        &self.cost_schedules
    }

    pub fn carbon_schedule(&self) -> Option<&CarbonSchedule> {
        self.carbon_schedule.as_ref()
    }

    pub fn solar_pv(&self) -> Option<&SolarPvInstallation> {
        self.solar_pv.as_ref()
    }

    pub fn costs(&self, kind: TariffKind) -> Option<&CostSeries> {
        match kind {
            TariffKind::Economic => self.economic_costs.as_ref(),
            TariffKind::Accounting => self.accounting_costs.as_ref(),
        }
    }

    pub fn co2(&self) -> Option<&HalfHourSeries> {
        self.co2.as_ref()
    }

    pub fn is_costed(&self) -> bool {
        self.economic_costs.is_some() && self.accounting_costs.is_some() && self.co2.is_some()
    }

    pub fn sub_meter(&self, sub_meter_type: SubMeterType) -> Option<&Meter> {
        self.sub_meters.get(&sub_meter_type)
    }

    pub fn sub_meters(&self) -> &IndexMap<SubMeterType, Meter> {
        &self.sub_meters
    }

    pub(crate) fn without_sub_meters(&self) -> Meter {
        let mut meter = self.clone();
        meter.sub_meters.clear();
        meter
    }

    pub(crate) fn take_sub_meter(&mut self, sub_meter_type: SubMeterType) -> Option<Meter> {
        self.sub_meters.shift_remove(&sub_meter_type)
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.series.start_date()
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.series.end_date()
    }

    pub fn missing_dates(&self) -> Vec<NaiveDate> {
        self.series.missing_dates()
    }

    /// Cost this meter and each of its sub-meters from their own schedules.
    pub fn with_costs_and_carbon(
        mut self,
        resolver: &TariffResolver,
    ) -> Result<Self, AggregationError> {
        let economic_costs = resolver.cost_series(&self, TariffKind::Economic)?;
        let accounting_costs = resolver.cost_series(&self, TariffKind::Accounting)?;
        let co2 = match &self.carbon_schedule {
            Some(schedule) => schedule.co2_series(&self.series),
            None => HalfHourSeries::new(),
        };
        let sub_meters = std::mem::take(&mut self.sub_meters);
        for (sub_meter_type, sub_meter) in sub_meters {
            self.sub_meters
                .insert(sub_meter_type, sub_meter.with_costs_and_carbon(resolver)?);
        }
        debug!(meter = %self.id, days = self.series.len(), "costed meter");

        Ok(self.with_derived_data(economic_costs, accounting_costs, co2))
    }

    /// Like [`Meter::with_costs_and_carbon`], but keeps costs already present on this meter or
    /// any sub-meter, such as an aggregate's summed component costs.
    pub fn with_missing_costs(
        mut self,
        resolver: &TariffResolver,
    ) -> Result<Self, AggregationError> {
        if !self.is_costed() {
            return self.with_costs_and_carbon(resolver);
        }
        let sub_meters = std::mem::take(&mut self.sub_meters);
        for (sub_meter_type, sub_meter) in sub_meters {
            self.sub_meters
                .insert(sub_meter_type, sub_meter.with_missing_costs(resolver)?);
        }
        Ok(self)
    }

    pub fn day_total(&self, data_type: DataType, date: &NaiveDate) -> Option<f64> {
        match data_type {
            DataType::Kwh => self.series.day_total(date),
            DataType::EconomicCost => self.economic_costs.as_ref()?.day_total(date),
            DataType::AccountingCost => self.accounting_costs.as_ref()?.day_total(date),
            DataType::Co2 => self.co2.as_ref()?.day_total(date),
        }
    }

    /// Half-hourly values for a day. Costs include the day's standing charges spread evenly.
    pub fn day_x48(&self, data_type: DataType, date: &NaiveDate) -> Option<X48> {
        match data_type {
            DataType::Kwh => self.series.slots(date).copied(),
            DataType::EconomicCost => Some(self.economic_costs.as_ref()?.day(date)?.total_x48()),
            DataType::AccountingCost => {
                Some(self.accounting_costs.as_ref()?.day(date)?.total_x48())
            }
            DataType::Co2 => self.co2.as_ref()?.slots(date).copied(),
        }
    }

    pub fn slot(&self, data_type: DataType, date: &NaiveDate, slot_index: usize) -> Option<f64> {
        self.day_x48(data_type, date)?.get(slot_index).copied()
    }

    /// Total over `[start, end]`, which must lie within the meter's effective date range.
    pub fn range_total(
        &self,
        data_type: DataType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<f64, AggregationError> {
        let not_enough_data = || AggregationError::NotEnoughData {
            meter_id: self.id.clone(),
            start,
            end,
        };
        let (Some(series_start), Some(series_end)) = (self.start_date(), self.end_date()) else {
            return Err(not_enough_data());
        };
        if start > end || start < series_start || end > series_end {
            return Err(not_enough_data());
        }
        let not_costed = |what: &str| {
            AggregationError::InconsistentAggregationState(format!(
                "meter '{}' has no {what} series",
                self.id
            ))
        };

        Ok(match data_type {
            DataType::Kwh => self.series.range_total(start, end),
            DataType::EconomicCost => self
                .economic_costs
                .as_ref()
                .ok_or_else(|| not_costed("economic cost"))?
                .range_total(start, end),
            DataType::AccountingCost => self
                .accounting_costs
                .as_ref()
                .ok_or_else(|| not_costed("accounting cost"))?
                .range_total(start, end),
            DataType::Co2 => self
                .co2
                .as_ref()
                .ok_or_else(|| not_costed("co2"))?
                .range_total(start, end),
        })
    }
}
