pub mod half_hour_series;
pub mod vectors;
