pub mod aggregation;
pub mod amr;
pub mod carbon;
pub mod meter;
pub mod tariffs;
pub mod units;
