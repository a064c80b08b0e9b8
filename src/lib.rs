pub mod core;
pub mod errors;
pub mod input;
pub mod output;
mod output_writer;
mod statistics;

#[cfg(test)]
mod tests;

#[macro_use]
extern crate is_close;

pub use crate::core::aggregation::pipeline::AggregatedSchool;
use crate::errors::{EngineError, OutputError};
use crate::input::ingest_for_processing;
use crate::output::Output;
pub use crate::output_writer::SchoolSize;
use crate::output_writer::write_school_outputs;
use rayon::prelude::*;
use std::io::Read;
use tracing::info;

/// Aggregate, cost and disaggregate one school's meters, writing the results to `output`.
///
/// Stage failures are kept on the returned school alongside whatever did aggregate. Only a
/// school where nothing aggregated at all is an error.
pub fn run_school(input: impl Read, output: impl Output) -> Result<AggregatedSchool, EngineError> {
    let input = ingest_for_processing(input)?;
    let size = SchoolSize {
        floor_area: input.school.floor_area,
        pupils: input.school.pupils,
    };
    let service = input.into_service()?;

    let school = service.aggregate_heat_and_electricity_meters();
    if school.meters().next().is_none() {
        if let Some((_, error)) = school.failures.first() {
            return Err(error.clone().into());
        }
    }

    write_school_outputs(&output, &school, size)
        .map_err(|error| EngineError::ErrorInOutput(OutputError::new(error)))?;
    info!(school = %school.name, "finished school");

    Ok(school)
}

/// Run independent schools in parallel, one task per school.
pub fn run_schools<R: Read + Send>(
    inputs: Vec<R>,
    output: &impl Output,
) -> Vec<Result<AggregatedSchool, EngineError>> {
    inputs
        .into_par_iter()
        .map(|input| run_school(input, output))
        .collect()
}
