use crate::core::amr::half_hour_series::{HalfHourSeries, SourceTag};
use crate::core::amr::vectors::sum_x48;
use crate::core::meter::{FuelType, Meter, SubMeterType};
use crate::core::tariffs::costs::CostSeries;
use crate::core::tariffs::tariff_definition::{CostSchedules, TariffKind};
use crate::core::tariffs::tariff_resolver::TariffResolver;
use crate::errors::AggregationError;
use chrono::NaiveDate;
use itertools::Itertools;
use strum::IntoEnumIterator;
use tracing::{debug, info};

/// The result of combining the meters of one fuel type.
#[derive(Clone, Debug)]
pub struct Aggregated {
    pub aggregate: Meter,
    /// The meters that were combined. Empty when a single meter was handed back as its own
    /// aggregate without copying.
    pub components: Vec<Meter>,
}

/// Combines meters of one fuel type into a single synthetic meter with kWh, costs and carbon.
#[derive(Debug)]
pub struct AggregationEngine<'a> {
    resolver: &'a TariffResolver,
    copy_single_meter: bool,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(resolver: &'a TariffResolver, copy_single_meter: bool) -> Self {
        Self {
            resolver,
            copy_single_meter,
        }
    }

    /// Latest included start date and earliest included end date across `meters`.
    ///
    /// Aggregation rules only ever exclude a meter's own boundary from this calculation; they
    /// never affect which values are combined inside the range.
    pub fn combined_date_range(
        meters: &[Meter],
    ) -> Result<(NaiveDate, NaiveDate), AggregationError> {
        let fuel_type = meters
            .first()
            .map_or(FuelType::Electricity, Meter::fuel_type);
        let no_range = |reason: String| AggregationError::NoValidDateRange { fuel_type, reason };

        let start = meters
            .iter()
            .filter(|meter| !meter.aggregation_rules().iter().any(|rule| rule.ignores_start_date()))
            .filter_map(Meter::start_date)
            .max()
            .ok_or_else(|| no_range("no meter contributes a start date".into()))?;
        let end = meters
            .iter()
            .filter(|meter| !meter.aggregation_rules().iter().any(|rule| rule.ignores_end_date()))
            .filter_map(Meter::end_date)
            .min()
            .ok_or_else(|| no_range("no meter contributes an end date".into()))?;
        if start > end {
            return Err(no_range(format!(
                "combined start {start} is after combined end {end}"
            )));
        }

        Ok((start, end))
    }

    /// Combine `meters`, which must all share a fuel type. No meters means the fuel type is
    /// absent from the school, which is not an error.
    pub fn aggregate(&self, meters: Vec<Meter>) -> Result<Option<Aggregated>, AggregationError> {
        let mut meters = meters
            .into_iter()
            .map(|meter| {
                if meter.is_costed() {
                    Ok(meter)
                } else {
                    meter.with_costs_and_carbon(self.resolver)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        match meters.len() {
            0 => Ok(None),
            1 => {
                let meter = meters.remove(0);
                debug!(meter = meter.id(), copied = self.copy_single_meter, "single meter aggregate");
                Ok(Some(if self.copy_single_meter {
                    Aggregated {
                        aggregate: meter.clone(),
                        components: vec![meter],
                    }
                } else {
                    Aggregated {
                        aggregate: meter,
                        components: vec![],
                    }
                }))
            }
            _ => {
                let aggregate = self.combine(&meters)?;
                Ok(Some(Aggregated {
                    aggregate,
                    components: meters,
                }))
            }
        }
    }

    fn combine(&self, meters: &[Meter]) -> Result<Meter, AggregationError> {
        let (start, end) = Self::combined_date_range(meters)?;
        self.combine_within(meters, start, end)
    }

    fn combine_within(
        &self,
        meters: &[Meter],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Meter, AggregationError> {
        let fuel_type = meters[0].fuel_type();

        let mut series = HalfHourSeries::new();
        for date in start.iter_days().take_while(|date| *date <= end) {
            let day_slots = meters
                .iter()
                .filter_map(|meter| meter.series().slots(&date))
                .collect::<Vec<_>>();
            if day_slots.is_empty() {
                continue;
            }
            series.insert_slots(date, sum_x48(&day_slots).into_owned(), SourceTag::Aggregated);
        }

        let mut combined = Meter::new(
            &meters.iter().map(Meter::id).join("+"),
            &meters.iter().map(Meter::name).join(" + "),
            fuel_type,
            series,
        )
        .with_floor_area(meters.iter().map(Meter::floor_area).sum())
        .with_pupil_count(meters.iter().map(Meter::pupil_count).sum())
        .with_cost_schedules(Self::shared_cost_schedules(meters));
        if let Some(carbon_schedule) = meters[0].carbon_schedule() {
            combined = combined.with_carbon_schedule(carbon_schedule.clone());
        }

        // gas is never priced on a differential tariff
        let differential =
            fuel_type != FuelType::Gas && TariffResolver::any_differential(meters, start, end);
        let costs = |kind| self.combined_costs(&combined, meters, kind, differential, start, end);
        let economic_costs = costs(TariffKind::Economic)?;
        let accounting_costs = costs(TariffKind::Accounting)?;
        let co2 = Self::summed_co2(meters, combined.series());

        for sub_meter_type in SubMeterType::iter() {
            if !meters.iter().any(|meter| meter.sub_meter(sub_meter_type).is_some()) {
                continue;
            }
            let sub_meters = meters
                .iter()
                .filter_map(|meter| match meter.sub_meter(sub_meter_type) {
                    Some(sub_meter) => Some(sub_meter.clone()),
                    // a meter with no solar split is its own original mains
                    None if sub_meter_type == SubMeterType::OriginalMains => {
                        Some(meter.without_sub_meters())
                    }
                    None => None,
                })
                .collect::<Vec<_>>();
            let sub_meter = self.combine_within(&sub_meters, start, end)?;
            combined = combined.with_sub_meter(sub_meter_type, sub_meter);
        }

        info!(
            %fuel_type,
            meters = meters.len(),
            %start,
            %end,
            differential,
            "aggregated meters"
        );

        Ok(combined.with_derived_data(economic_costs, accounting_costs, co2))
    }

    /// Costs for the combined meter. Differential components, or components whose differing
    /// schedules leave no area default to fall back on, are costed by summing their own costs.
    fn combined_costs(
        &self,
        combined: &Meter,
        meters: &[Meter],
        kind: TariffKind,
        differential: bool,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CostSeries, AggregationError> {
        if differential {
            return Ok(Self::summed_costs(meters, kind, start, end));
        }
        match self.resolver.cost_series(combined, kind) {
            Err(AggregationError::MissingTariffData { date, .. })
                if combined.cost_schedules().is_empty() =>
            {
                debug!(
                    meter = combined.id(),
                    %kind,
                    %date,
                    "no area default tariff, summing component costs"
                );
                Ok(Self::summed_costs(meters, kind, start, end))
            }
            costs => costs,
        }
    }

    /// The components' schedules if they all agree, otherwise none so the area defaults apply.
    fn shared_cost_schedules(meters: &[Meter]) -> CostSchedules {
        if meters.iter().map(Meter::cost_schedules).all_equal() {
            meters[0].cost_schedules().clone()
        } else {
            Default::default()
        }
    }

    fn summed_costs(
        meters: &[Meter],
        kind: TariffKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CostSeries {
        CostSeries::sum(meters.iter().filter_map(|meter| meter.costs(kind))).restricted_to(start, end)
    }

    fn summed_co2(meters: &[Meter], combined: &HalfHourSeries) -> HalfHourSeries {
        let mut co2 = HalfHourSeries::new();
        for date in combined.dates() {
            let day_co2 = meters
                .iter()
                .filter_map(|meter| meter.co2()?.slots(&date))
                .collect::<Vec<_>>();
            co2.insert_slots(date, sum_x48(&day_co2).into_owned(), SourceTag::Aggregated);
        }
        co2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amr::vectors::X48;
    use crate::core::carbon::CarbonIntensities;
    use crate::core::meter::AggregationRule;
    use crate::core::tariffs::tariff_definition::TariffDefinition;
    use crate::core::units::SLOTS_PER_DAY;
    use approx::assert_relative_eq;
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn flat_schedules() -> CostSchedules {
        let tariff = TariffDefinition::flat(date(1), date(31), 0.2);
        CostSchedules {
            economic: vec![tariff.clone()],
            accounting: vec![tariff],
        }
    }

    fn meter(id: &str, days: impl IntoIterator<Item = u32>, value: f64) -> Meter {
        let mut series = HalfHourSeries::new();
        for d in days {
            series.insert_slots(date(d), [value; SLOTS_PER_DAY], SourceTag::Original);
        }
        Meter::new(id, &format!("Meter {id}"), FuelType::Electricity, series)
            .with_cost_schedules(flat_schedules())
            .with_carbon_schedule(CarbonIntensities::default().schedule_for(FuelType::Electricity))
    }

    #[fixture]
    fn resolver() -> TariffResolver {
        TariffResolver::default()
    }

    #[rstest]
    fn should_return_none_for_no_meters(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        assert!(engine.aggregate(vec![]).unwrap().is_none());
    }

    #[rstest]
    #[case::copied(true, 1)]
    #[case::handed_back(false, 0)]
    fn should_shortcut_single_meter(
        resolver: TariffResolver,
        #[case] copy_single_meter: bool,
        #[case] expected_components: usize,
    ) {
        let engine = AggregationEngine::new(&resolver, copy_single_meter);
        let aggregated = engine.aggregate(vec![meter("a", 1..=3, 1.)]).unwrap().unwrap();
        assert_eq!(aggregated.aggregate.id(), "a");
        assert_eq!(aggregated.components.len(), expected_components);
        assert!(aggregated.aggregate.is_costed());
    }

    #[rstest]
    fn should_sum_only_meters_with_data(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let a = meter("a", [1, 2, 3, 5], 1.).with_aggregation_rules([AggregationRule::IgnoreEndDate]);
        let b = meter("b", [1, 3, 4, 5], 2.);
        let c = meter("c", [1, 2, 4, 5], 4.);

        let aggregate = engine.aggregate(vec![a, b, c]).unwrap().unwrap().aggregate;

        let slots = |d: u32| aggregate.series().slots(&date(d)).copied();
        assert_eq!(slots(1), Some([7.; SLOTS_PER_DAY]));
        assert_eq!(slots(2), Some([5.; SLOTS_PER_DAY]));
        assert_eq!(slots(3), Some([3.; SLOTS_PER_DAY]));
        assert_eq!(slots(4), Some([6.; SLOTS_PER_DAY]));
        assert_eq!(
            aggregate.series().reading(&date(1)).unwrap().source_tag,
            SourceTag::Aggregated
        );
        assert_relative_eq!(
            aggregate.day_total(crate::core::meter::DataType::EconomicCost, &date(2)).unwrap(),
            48. * 5. * 0.2,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn should_skip_dates_no_meter_covers(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let a = meter("a", [1, 2, 4], 1.);
        let b = meter("b", [1, 4], 1.);
        let aggregate = engine.aggregate(vec![a, b]).unwrap().unwrap().aggregate;
        assert!(!aggregate.series().has_date(&date(3)));
        assert_eq!(aggregate.missing_dates(), vec![date(3)]);
    }

    #[rstest]
    fn should_honour_ignore_rules_in_combined_range() {
        let a = meter("a", 1..=20, 1.);
        let b = meter("b", 5..=10, 1.);
        assert_eq!(
            AggregationEngine::combined_date_range(&[a.clone(), b.clone()]),
            Ok((date(5), date(10)))
        );

        let b = b.with_aggregation_rules([AggregationRule::DeprecatedIncludeButIgnoreStartDate]);
        assert_eq!(
            AggregationEngine::combined_date_range(&[a.clone(), b.clone()]),
            Ok((date(1), date(10)))
        );

        let b = b.with_aggregation_rules([
            AggregationRule::IgnoreStartDate,
            AggregationRule::IgnoreEndDate,
        ]);
        assert_eq!(
            AggregationEngine::combined_date_range(&[a, b.clone()]),
            Ok((date(1), date(20)))
        );
        assert!(matches!(
            AggregationEngine::combined_date_range(&[b]),
            Err(AggregationError::NoValidDateRange { .. })
        ));
    }

    #[rstest]
    fn should_fail_when_ranges_do_not_intersect(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let result = engine.aggregate(vec![meter("a", 1..=3, 1.), meter("b", 5..=6, 1.)]);
        assert!(matches!(
            result,
            Err(AggregationError::NoValidDateRange {
                fuel_type: FuelType::Electricity,
                ..
            })
        ));
    }

    #[rstest]
    fn should_not_change_values_when_rules_change(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let plain = engine
            .aggregate(vec![meter("a", 1..=10, 1.), meter("b", 3..=8, 2.)])
            .unwrap()
            .unwrap()
            .aggregate;
        let ruled = engine
            .aggregate(vec![
                meter("a", 1..=10, 1.),
                meter("b", 3..=8, 2.).with_aggregation_rules([AggregationRule::IgnoreStartDate]),
            ])
            .unwrap()
            .unwrap()
            .aggregate;
        assert_eq!(plain.start_date(), Some(date(3)));
        assert_eq!(ruled.start_date(), Some(date(1)));
        for d in 3..=8 {
            assert_eq!(plain.series().slots(&date(d)), ruled.series().slots(&date(d)));
        }
    }

    #[rstest]
    fn should_merge_metadata(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let a = meter("a", 1..=2, 1.).with_floor_area(Some(100.)).with_pupil_count(Some(50));
        let b = meter("b", 1..=2, 1.).with_floor_area(Some(250.)).with_pupil_count(None);

        let aggregate = engine.aggregate(vec![a, b]).unwrap().unwrap().aggregate;

        assert_eq!(aggregate.id(), "a+b");
        assert_eq!(aggregate.name(), "Meter a + Meter b");
        assert_eq!(aggregate.floor_area(), Some(350.));
        assert_eq!(aggregate.pupil_count(), None);
        assert_eq!(aggregate.cost_schedules(), &flat_schedules());
    }

    #[rstest]
    fn should_fall_back_to_area_tariff_when_schedules_differ() {
        let resolver = TariffResolver::new(indexmap! {
            FuelType::Electricity => CostSchedules {
                economic: vec![TariffDefinition::flat(date(1), date(31), 0.5)],
                accounting: vec![TariffDefinition::flat(date(1), date(31), 0.5)],
            }
        });
        let engine = AggregationEngine::new(&resolver, false);
        let cheaper = CostSchedules {
            economic: vec![TariffDefinition::flat(date(1), date(31), 0.1)],
            accounting: vec![TariffDefinition::flat(date(1), date(31), 0.1)],
        };
        let a = meter("a", 1..=2, 1.);
        let b = meter("b", 1..=2, 1.).with_cost_schedules(cheaper);

        let aggregate = engine.aggregate(vec![a, b]).unwrap().unwrap().aggregate;

        assert!(aggregate.cost_schedules().is_empty());
        assert_relative_eq!(
            aggregate.day_total(crate::core::meter::DataType::AccountingCost, &date(1)).unwrap(),
            96. * 0.5,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn should_sum_component_carbon(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let gas = |id: &str, value: f64| {
            let ones: X48 = [value; SLOTS_PER_DAY];
            let mut series = HalfHourSeries::new();
            series.insert_slots(date(1), ones, SourceTag::Original);
            Meter::new(id, id, FuelType::Gas, series)
                .with_cost_schedules(flat_schedules())
                .with_carbon_schedule(CarbonIntensities::default().schedule_for(FuelType::Gas))
        };

        let aggregate = engine
            .aggregate(vec![gas("g1", 1.), gas("g2", 3.)])
            .unwrap()
            .unwrap()
            .aggregate;

        assert_relative_eq!(
            aggregate.day_total(crate::core::meter::DataType::Co2, &date(1)).unwrap(),
            48. * 4. * 0.21,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn should_sum_component_costs_when_differing_schedules_have_no_area_default(
        resolver: TariffResolver,
    ) {
        let engine = AggregationEngine::new(&resolver, false);
        let dearer = CostSchedules {
            economic: vec![TariffDefinition::flat(date(1), date(31), 0.3)],
            accounting: vec![TariffDefinition::flat(date(1), date(31), 0.3)],
        };
        let a = meter("a", 1..=2, 1.);
        let b = meter("b", 1..=2, 1.).with_cost_schedules(dearer);

        let aggregate = engine.aggregate(vec![a, b]).unwrap().unwrap().aggregate;

        assert!(aggregate.cost_schedules().is_empty());
        for data_type in [
            crate::core::meter::DataType::EconomicCost,
            crate::core::meter::DataType::AccountingCost,
        ] {
            assert_relative_eq!(
                aggregate.day_total(data_type, &date(2)).unwrap(),
                48. * 0.2 + 48. * 0.3,
                max_relative = 1e-12
            );
        }
    }

    #[rstest]
    fn should_aggregate_sub_meters_within_combined_range(resolver: TariffResolver) {
        let engine = AggregationEngine::new(&resolver, false);
        let a = meter("a", 1..=3, 2.)
            .with_sub_meter(SubMeterType::Generation, meter("a-generation", 1..=3, 0.5))
            .with_sub_meter(SubMeterType::OriginalMains, meter("a-original_mains", 1..=3, 2.5));
        let b = meter("b", 2..=4, 1.)
            .with_sub_meter(SubMeterType::Generation, meter("b-generation", 2..=4, 0.25));

        let aggregate = engine.aggregate(vec![a, b]).unwrap().unwrap().aggregate;

        let generation = aggregate.sub_meter(SubMeterType::Generation).unwrap();
        assert_eq!(generation.id(), "a-generation+b-generation");
        assert_eq!(generation.series().slot(&date(2), 0), Some(0.75));
        assert_eq!(generation.series().slot(&date(1), 0), None);
        assert_relative_eq!(
            generation.day_total(crate::core::meter::DataType::EconomicCost, &date(2)).unwrap(),
            48. * 0.75 * 0.2,
            max_relative = 1e-12
        );
        // b has no solar split, so its own readings stand in for its original mains
        let original_mains = aggregate.sub_meter(SubMeterType::OriginalMains).unwrap();
        assert_eq!(original_mains.id(), "a-original_mains+b");
        assert_eq!(original_mains.series().slot(&date(3), 0), Some(3.5));
        assert!(aggregate.sub_meter(SubMeterType::SelfConsume).is_none());
    }
}
