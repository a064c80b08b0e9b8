pub mod costs;
pub mod tariff_definition;
pub mod tariff_resolver;
