extern crate amr_aggregation;

use amr_aggregation::output::FileOutput;
use amr_aggregation::run_schools;
use clap::Parser;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Default, Debug)]
#[clap(author, version, about, long_about = None)]
struct AggregationArgs {
    #[arg(required = true, help = "Paths to school input files in .json format")]
    input_files: Vec<PathBuf>,
    #[arg(
        long,
        short,
        default_value = "results",
        help = "Directory to write the .csv results to"
    )]
    output_dir: PathBuf,
    #[arg(
        long,
        short,
        action = clap::ArgAction::Count,
        help = "Log more detail (-v for debug, -vv for trace)"
    )]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = AggregationArgs::parse();

    let max_level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(max_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    fs::create_dir_all(&args.output_dir)?;
    let output = FileOutput::new(args.output_dir.clone(), "{}.csv".to_string());
    let inputs = args
        .input_files
        .iter()
        .map(|path| -> anyhow::Result<_> { Ok(BufReader::new(File::open(path)?)) })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut failed = 0;
    for (path, result) in args.input_files.iter().zip(run_schools(inputs, &output)) {
        match result {
            Ok(school) => info!(
                school = %school.name,
                failed_stages = school.failures.len(),
                "aggregated {}",
                path.display()
            ),
            Err(err) => {
                failed += 1;
                error!("{}: {err}", path.display());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} schools failed", args.input_files.len());
    }

    Ok(())
}
