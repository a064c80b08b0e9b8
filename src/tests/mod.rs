mod test_aggregation_scenarios;
