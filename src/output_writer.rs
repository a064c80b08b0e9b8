use crate::core::aggregation::pipeline::AggregatedSchool;
use crate::core::meter::{DataType, Meter};
use crate::output::Output;
use csv::WriterBuilder;
use std::io::Write;
use strum::IntoEnumIterator;
use tracing::debug;

/// School-wide figures used to normalise the summary totals.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchoolSize {
    pub floor_area: Option<f64>,
    pub pupils: Option<u32>,
}

pub(crate) fn write_school_outputs(
    output: &impl Output,
    school: &AggregatedSchool,
    size: SchoolSize,
) -> anyhow::Result<()> {
    if output.is_noop() {
        return Ok(());
    }
    let prefix = location_prefix(&school.name);
    debug!(school = %school.name, "writing outputs");

    write_summary(
        output.writer_for_location_key(&format!("{prefix}_summary"))?,
        school,
        size,
    )?;
    write_daily_totals(
        output.writer_for_location_key(&format!("{prefix}_daily_totals"))?,
        school,
    )?;
    write_missing_dates(
        output.writer_for_location_key(&format!("{prefix}_missing_dates"))?,
        school,
    )?;
    write_failures(
        output.writer_for_location_key(&format!("{prefix}_failures"))?,
        school,
    )
}

fn location_prefix(school_name: &str) -> String {
    school_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Every meter in the school, each followed by its sub-meters.
fn meter_tree(school: &AggregatedSchool) -> Vec<&Meter> {
    fn visit<'a>(meter: &'a Meter, meters: &mut Vec<&'a Meter>) {
        meters.push(meter);
        for sub_meter in meter.sub_meters().values() {
            visit(sub_meter, meters);
        }
    }
    let mut meters = vec![];
    for meter in school.meters() {
        visit(meter, &mut meters);
    }
    meters
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

fn write_summary(
    writer: impl Write,
    school: &AggregatedSchool,
    size: SchoolSize,
) -> anyhow::Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record([
        "aggregate",
        "meter_id",
        "start_date",
        "end_date",
        "kwh",
        "economic_cost",
        "accounting_cost",
        "co2_kg",
        "kwh_per_m2",
        "kwh_per_pupil",
    ])?;
    let aggregates = [
        ("electricity", &school.electricity),
        ("heat", &school.heat),
        ("storage_heaters", &school.storage_heaters),
    ];
    for (label, aggregate) in aggregates {
        let Some(meter) = aggregate else {
            continue;
        };
        let (Some(start), Some(end)) = (meter.start_date(), meter.end_date()) else {
            continue;
        };
        let totals = DataType::iter()
            .map(|data_type| meter.range_total(data_type, start, end))
            .collect::<Result<Vec<_>, _>>()?;
        let kwh = totals[0];
        let mut record = vec![
            label.to_string(),
            meter.id().to_string(),
            start.to_string(),
            end.to_string(),
        ];
        record.extend(totals.iter().map(f64::to_string));
        record.push(format_optional(size.floor_area.map(|area| kwh / area)));
        record.push(format_optional(size.pupils.map(|pupils| kwh / pupils as f64)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}

fn write_daily_totals(writer: impl Write, school: &AggregatedSchool) -> anyhow::Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(["date", "meter_id", "fuel_type", "data_type", "total"])?;
    for meter in meter_tree(school) {
        for date in meter.series().dates() {
            for data_type in DataType::iter() {
                if let Some(total) = meter.day_total(data_type, &date) {
                    writer.write_record([
                        date.to_string(),
                        meter.id().to_string(),
                        meter.fuel_type().to_string(),
                        data_type.to_string(),
                        total.to_string(),
                    ])?;
                }
            }
        }
    }
    writer.flush()?;

    Ok(())
}

fn write_missing_dates(writer: impl Write, school: &AggregatedSchool) -> anyhow::Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(["meter_id", "meter_name", "missing_date"])?;
    for meter in meter_tree(school) {
        for date in meter.missing_dates() {
            writer.write_record([meter.id(), meter.name(), date.to_string().as_str()])?;
        }
    }
    writer.flush()?;

    Ok(())
}

fn write_failures(writer: impl Write, school: &AggregatedSchool) -> anyhow::Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(["stage", "error"])?;
    for (stage, error) in &school.failures {
        writer.write_record([stage.to_string(), error.to_string()])?;
    }
    writer.flush()?;

    Ok(())
}
