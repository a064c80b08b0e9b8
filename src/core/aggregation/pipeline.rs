use crate::core::aggregation::aggregation_engine::{Aggregated, AggregationEngine};
use crate::core::aggregation::solar::SolarDisaggregator;
use crate::core::meter::{FuelType, Meter, SubMeterType};
use crate::core::tariffs::tariff_resolver::TariffResolver;
use crate::errors::AggregationError;
use indexmap::IndexMap;
use tracing::{info, instrument, warn};

/// A stage of the school run whose failure is recorded rather than aborting the run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    SimulatedSolar,
    Electricity,
    Heat,
    StorageHeaters,
    SolarGeneration,
    SolarExport,
    MeteredSolar,
}

/// Every aggregate a school run produced, alongside what failed.
#[derive(Debug, Default)]
pub struct AggregatedSchool {
    pub name: String,
    pub electricity: Option<Meter>,
    pub heat: Option<Meter>,
    pub storage_heaters: Option<Meter>,
    pub electricity_components: Vec<Meter>,
    pub heat_components: Vec<Meter>,
    pub storage_heater_components: Vec<Meter>,
    pub failures: IndexMap<Stage, AggregationError>,
}

impl AggregatedSchool {
    /// Each aggregate followed by its components.
    pub fn meters(&self) -> impl Iterator<Item = &Meter> {
        [
            (&self.electricity, &self.electricity_components),
            (&self.heat, &self.heat_components),
            (&self.storage_heaters, &self.storage_heater_components),
        ]
        .into_iter()
        .flat_map(|(aggregate, components)| aggregate.iter().chain(components.iter()))
    }

    fn record_failure(&mut self, stage: Stage, error: AggregationError) {
        warn!(school = %self.name, %stage, %error, "stage failed, continuing without it");
        self.failures.insert(stage, error);
    }
}

/// Runs the aggregation stages for one school in order: simulated solar per meter, aggregation
/// per fuel type, then metered solar on the aggregated electricity.
#[derive(Debug)]
pub struct AggregateDataService {
    school_name: String,
    meters: Vec<Meter>,
    resolver: TariffResolver,
    solar: SolarDisaggregator,
    copy_single_meter: bool,
}

impl AggregateDataService {
    pub fn new(
        school_name: &str,
        meters: Vec<Meter>,
        resolver: TariffResolver,
        solar: SolarDisaggregator,
        copy_single_meter: bool,
    ) -> Self {
        Self {
            school_name: school_name.to_string(),
            meters,
            resolver,
            solar,
            copy_single_meter,
        }
    }

    #[instrument(skip_all)]
    pub fn aggregate_heat_and_electricity_meters(self) -> AggregatedSchool {
        let Self {
            school_name,
            meters,
            resolver,
            solar,
            copy_single_meter,
        } = self;
        let engine = AggregationEngine::new(&resolver, copy_single_meter);
        let mut school = AggregatedSchool {
            name: school_name,
            ..Default::default()
        };

        let mut by_fuel: IndexMap<FuelType, Vec<Meter>> = IndexMap::new();
        for meter in meters {
            by_fuel
                .entry(meter.fuel_type())
                .or_default()
                .push(meter.with_long_gap_boundary());
        }
        let mut take = |fuel_type: FuelType| by_fuel.shift_remove(&fuel_type).unwrap_or_default();

        let electricity = take(FuelType::Electricity)
            .into_iter()
            .map(|meter| {
                if meter.solar_pv().is_none() {
                    return meter;
                }
                match solar.simulated(meter.clone()) {
                    Ok(disaggregated) => disaggregated,
                    Err(error) => {
                        school.record_failure(Stage::SimulatedSolar, error);
                        meter
                    }
                }
            })
            .collect::<Vec<_>>();
        let generation = take(FuelType::SolarPv);
        let export = take(FuelType::ExportedSolarPv);
        let gas = take(FuelType::Gas);
        let storage_heaters = take(FuelType::StorageHeater);

        if let Some(aggregated) =
            Self::run_stage(&mut school, Stage::Electricity, &engine, electricity)
        {
            let aggregate = if generation.is_empty() && export.is_empty() {
                aggregated.aggregate
            } else {
                Self::metered_solar(
                    &mut school,
                    &engine,
                    &solar,
                    &resolver,
                    aggregated.aggregate,
                    generation,
                    export,
                )
            };
            school.electricity = Some(aggregate);
            school.electricity_components = aggregated.components;
        }
        if let Some(aggregated) = Self::run_stage(&mut school, Stage::Heat, &engine, gas) {
            school.heat = Some(aggregated.aggregate);
            school.heat_components = aggregated.components;
        }
        if let Some(aggregated) =
            Self::run_stage(&mut school, Stage::StorageHeaters, &engine, storage_heaters)
        {
            school.storage_heaters = Some(aggregated.aggregate);
            school.storage_heater_components = aggregated.components;
        }
        info!(failures = school.failures.len(), "aggregated school");

        school
    }

    fn run_stage(
        school: &mut AggregatedSchool,
        stage: Stage,
        engine: &AggregationEngine,
        meters: Vec<Meter>,
    ) -> Option<Aggregated> {
        match engine.aggregate(meters) {
            Ok(aggregated) => aggregated,
            Err(error) => {
                school.record_failure(stage, error);
                None
            }
        }
    }

    /// Attach the aggregated generation and export meters to the electricity aggregate, split
    /// them, and cost the new sub-meters. The aggregate keeps its own costs, since metered mains
    /// is already net of solar. The unsplit aggregate is kept if any step fails.
    fn metered_solar(
        school: &mut AggregatedSchool,
        engine: &AggregationEngine,
        solar: &SolarDisaggregator,
        resolver: &TariffResolver,
        electricity: Meter,
        generation: Vec<Meter>,
        export: Vec<Meter>,
    ) -> Meter {
        let generation = Self::run_stage(school, Stage::SolarGeneration, engine, generation);
        let export = Self::run_stage(school, Stage::SolarExport, engine, export);
        let mut with_solar = electricity.clone();
        for sub_meter_type in [SubMeterType::Generation, SubMeterType::Export] {
            with_solar.take_sub_meter(sub_meter_type);
        }
        for (sub_meter_type, aggregated) in [
            (SubMeterType::Generation, generation),
            (SubMeterType::Export, export),
        ] {
            if let Some(aggregated) = aggregated {
                with_solar = with_solar.with_sub_meter(sub_meter_type, aggregated.aggregate);
            }
        }

        match solar
            .disaggregate(vec![with_solar])
            .and_then(|meter| meter.with_missing_costs(resolver))
        {
            Ok(meter) => meter,
            Err(error) => {
                school.record_failure(Stage::MeteredSolar, error);
                electricity
            }
        }
    }
}
