mod test_aggregation_scenarios {
    use crate::core::aggregation::aggregation_engine::AggregationEngine;
    use crate::core::amr::half_hour_series::{HalfHourSeries, SourceTag};
    use crate::core::amr::vectors::{total_x48, X48};
    use crate::core::meter::{AggregationRule, DataType, FuelType, Meter};
    use crate::core::tariffs::tariff_definition::{
        CostSchedules, DayWindow, TariffDefinition, TariffKind,
    };
    use crate::core::tariffs::tariff_resolver::{EnergyCost, TariffResolver};
    use crate::core::units::SLOTS_PER_DAY;
    use approx::{assert_relative_eq, relative_eq};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn jan(d: u32) -> NaiveDate {
        date(2024, 1, d)
    }

    fn both(tariff: TariffDefinition) -> CostSchedules {
        CostSchedules {
            economic: vec![tariff.clone()],
            accounting: vec![tariff],
        }
    }

    fn series(days: impl IntoIterator<Item = NaiveDate>, slots: X48) -> HalfHourSeries {
        let mut series = HalfHourSeries::new();
        for date in days {
            series.insert_slots(date, slots, SourceTag::Original);
        }
        series
    }

    fn day_window(from_slot: usize, to_slot: usize) -> DayWindow {
        DayWindow { from_slot, to_slot }
    }

    fn energy_total(cost: EnergyCost) -> f64 {
        match cost {
            EnergyCost::Flat(cost) => total_x48(&cost),
            EnergyCost::DayNight { day, night } => total_x48(&day) + total_x48(&night),
        }
    }

    #[fixture]
    fn meter_a() -> Meter {
        Meter::new(
            "2200012345671",
            "Meter A",
            FuelType::Electricity,
            series((1..=10).map(jan), [1.0; SLOTS_PER_DAY]),
        )
        .with_cost_schedules(both(TariffDefinition::flat(
            date(2022, 4, 1),
            date(2025, 3, 31),
            0.2,
        )))
    }

    #[fixture]
    fn meter_b() -> Meter {
        Meter::new(
            "2200012345682",
            "Meter B",
            FuelType::Electricity,
            series((5..=20).map(jan), [2.0; SLOTS_PER_DAY]),
        )
        .with_aggregation_rules([AggregationRule::IgnoreStartDate])
        .with_cost_schedules(both(TariffDefinition::differential(
            jan(5),
            date(2024, 12, 31),
            day_window(14, 48),
            0.3,
            0.1,
        )))
    }

    #[rstest]
    fn test_two_meter_january_scenario(meter_a: Meter, meter_b: Meter) {
        let resolver = TariffResolver::default();
        let engine = AggregationEngine::new(&resolver, false);
        let meters = vec![meter_a, meter_b];
        assert_eq!(
            AggregationEngine::combined_date_range(&meters),
            Ok((jan(1), jan(10)))
        );
        assert!(TariffResolver::any_differential(&meters, jan(1), jan(10)));

        let aggregated = engine.aggregate(meters).unwrap().unwrap();
        let aggregate = &aggregated.aggregate;

        assert_eq!(aggregate.start_date(), Some(jan(1)));
        assert_eq!(aggregate.end_date(), Some(jan(10)));
        assert_eq!(aggregate.day_total(DataType::Kwh, &jan(1)), Some(48.));
        assert_eq!(aggregate.day_total(DataType::Kwh, &jan(6)), Some(144.));

        // A: 48 kWh at 0.2; B: 34 day slots at 0.3 and 14 night slots at 0.1, 2 kWh each
        let a_cost = 48. * 0.2;
        let b_cost = 34. * 2. * 0.3 + 14. * 2. * 0.1;
        let cost = aggregate.day_total(DataType::EconomicCost, &jan(6)).unwrap();
        assert_relative_eq!(cost, a_cost + b_cost, max_relative = 1e-12);
        assert_relative_eq!(
            aggregate.day_total(DataType::AccountingCost, &jan(6)).unwrap(),
            a_cost + b_cost,
            max_relative = 1e-12
        );
        let single_flat_rate = 144. * 0.2;
        assert!(!relative_eq!(cost, single_flat_rate, max_relative = 1e-6));
        // before B starts only A is costed
        assert_relative_eq!(
            aggregate.day_total(DataType::EconomicCost, &jan(2)).unwrap(),
            a_cost,
            max_relative = 1e-12
        );
        assert_eq!(aggregate.day_x48(DataType::EconomicCost, &jan(6)).map(|x| x.len()), Some(48));
    }

    #[rstest]
    fn test_per_component_costing_is_not_interchangeable_with_costing_summed_kwh() {
        let day = jan(15);
        let x_tariff = TariffDefinition::differential(day, day, day_window(14, 44), 0.3, 0.1);
        let y_tariff = TariffDefinition::differential(day, day, day_window(16, 46), 0.3, 0.1);
        let x_kwh: X48 = std::array::from_fn(|i| if i < 16 { 1. } else { 0. });
        let y_kwh: X48 = std::array::from_fn(|i| if i >= 44 { 1. } else { 0. });
        let x = Meter::new("x", "X", FuelType::Electricity, series([day], x_kwh))
            .with_cost_schedules(both(x_tariff.clone()));
        let y = Meter::new("y", "Y", FuelType::Electricity, series([day], y_kwh))
            .with_cost_schedules(both(y_tariff));
        let resolver = TariffResolver::default();
        let engine = AggregationEngine::new(&resolver, false);

        let aggregate = engine.aggregate(vec![x, y]).unwrap().unwrap().aggregate;

        let per_component = aggregate.day_total(DataType::EconomicCost, &day).unwrap();
        // X: 14 night slots and 2 day slots; Y: 2 day slots and 2 night slots
        assert_relative_eq!(per_component, 1.4 + 0.6 + 0.6 + 0.2, max_relative = 1e-12);

        let summed_kwh = aggregate.series().slots(&day).copied().unwrap();
        let summed_then_costed = energy_total(TariffResolver::cost_vector(&x_tariff, &summed_kwh));
        let flat_then_costed = energy_total(TariffResolver::cost_vector(
            &TariffDefinition::flat(day, day, 0.2),
            &summed_kwh,
        ));
        assert!(!relative_eq!(per_component, summed_then_costed, max_relative = 1e-6));
        assert!(!relative_eq!(per_component, flat_then_costed, max_relative = 1e-6));
    }

    #[rstest]
    fn test_gas_is_costed_from_combined_kwh_even_with_differential_tariff() {
        let day = jan(15);
        let shared = both(TariffDefinition::differential(day, day, day_window(14, 44), 0.3, 0.1));
        let night_heavy: X48 = std::array::from_fn(|i| if i < 14 { 1. } else { 0. });
        let gas = |id: &str| {
            Meter::new(id, id, FuelType::Gas, series([day], night_heavy))
                .with_cost_schedules(shared.clone())
        };
        let resolver = TariffResolver::default();
        let engine = AggregationEngine::new(&resolver, false);

        let aggregate = engine
            .aggregate(vec![gas("g1"), gas("g2")])
            .unwrap()
            .unwrap()
            .aggregate;

        // identical schedules carry over, so the combined meter is costed on its own kWh
        assert_eq!(aggregate.cost_schedules(), &shared);
        let costs = aggregate.costs(TariffKind::Economic).unwrap();
        assert_relative_eq!(
            costs.day_total(&day).unwrap(),
            28. * 0.1,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn test_combined_slot_sums_only_meters_with_data(meter_a: Meter, meter_b: Meter) {
        let resolver = TariffResolver::default();
        let engine = AggregationEngine::new(&resolver, false);
        let aggregate = engine
            .aggregate(vec![meter_a, meter_b])
            .unwrap()
            .unwrap()
            .aggregate;

        for d in 1..=10 {
            let expected = if d >= 5 { 3. } else { 1. };
            for slot in [0, 17, 47] {
                assert_eq!(
                    aggregate.slot(DataType::Kwh, &jan(d), slot),
                    Some(expected),
                    "slot {slot} on day {d}"
                );
            }
        }
        assert_eq!(aggregate.slot(DataType::Kwh, &jan(11), 0), None);
    }
}
