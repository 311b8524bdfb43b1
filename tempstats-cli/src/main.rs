use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tempstats_rs::reference::{compare, full_scan};
use tempstats_rs::{
    compute_statistics, format_platforms, list_platforms, records, select_device, ComputeDevice,
    SelectedDevice, Series, Statistic, Statistics, StatisticsConfig, TempStatsError,
};
use tracing::{debug, info};

/// Tolerance for mean and standard deviation when verifying against a full scan
const VERIFY_TOLERANCE: f64 = 1e-9;

/// Workgroup-parallel temperature statistics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "tempstats")]
#[command(about = "Minimum, maximum, mean and standard deviation of station temperatures by parallel reduction", long_about = None)]
struct Cli {
    /// Whitespace-delimited record file (station year month day time temperature)
    #[arg(value_name = "INPUT_FILE", default_value = "temp_lincolnshire.txt")]
    input: PathBuf,

    /// Compute platform to run on (see --list)
    #[arg(short, long, default_value = "0")]
    platform: usize,

    /// Device of the selected platform
    #[arg(short, long, default_value = "0")]
    device: usize,

    /// List available platforms and devices, then exit
    #[arg(short, long)]
    list: bool,

    /// Workgroup size of the minimum reduction
    #[arg(long, default_value = "256")]
    min_workgroup: usize,

    /// Workgroup size of the maximum reduction
    #[arg(long, default_value = "256")]
    max_workgroup: usize,

    /// Workgroup size of the sum reduction
    #[arg(long, default_value = "32")]
    sum_workgroup: usize,

    /// Workgroup size of the squared deviation reduction
    #[arg(long, default_value = "256")]
    deviation_workgroup: usize,

    /// Save the statistics and per-reduction timings as JSON
    #[arg(long, value_name = "REPORT_PATH")]
    report: Option<PathBuf>,

    /// Check the results against a direct full scan of the data
    #[arg(long)]
    verify: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn statistics_config(&self) -> Result<StatisticsConfig> {
        Ok(StatisticsConfig::builder()
            .minimum_workgroup(self.min_workgroup)
            .maximum_workgroup(self.max_workgroup)
            .sum_workgroup(self.sum_workgroup)
            .deviation_workgroup(self.deviation_workgroup)
            .build()
            .map_err(|e| TempStatsError::InvalidConfig(e.to_string()))?)
    }
}

fn run<D: ComputeDevice>(device: &D, series: &Series, config: &StatisticsConfig) -> Result<Statistics> {
    println!("Running on {}", device.info());
    match compute_statistics(device, series, config) {
        Ok(stats) => Ok(stats),
        Err(TempStatsError::Build { status, options, log }) => {
            eprintln!("Build Status: {}", status);
            eprintln!("Build Options:\t{}", options);
            eprintln!("Build Log:\t {}", log);
            Err(anyhow::anyhow!("kernel program failed to build"))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_statistics(stats: &Statistics) {
    let timing = |statistic: Statistic| {
        let ns = stats.kernel_time_ns(statistic).unwrap_or(0);
        println!("Kernel execution time [ns]: {}", ns);
    };

    println!();
    println!("Number of readings = {}", stats.count);
    println!("Sum = {:.1}", stats.sum);
    timing(Statistic::Sum);
    println!("Mean = {:.3}", stats.mean);
    println!("Minimum = {:.1}", stats.minimum);
    timing(Statistic::Minimum);
    println!("Maximum = {:.1}", stats.maximum);
    timing(Statistic::Maximum);
    println!("SD = {:.3}", stats.std_dev);
    timing(Statistic::SquaredDeviation);
}

fn verify(series: &Series, stats: &Statistics) -> Result<()> {
    let reference = full_scan(series)?;
    let mismatches = compare(stats, &reference, VERIFY_TOLERANCE);
    if mismatches.is_empty() {
        println!("\nVerified against full scan: all statistics match");
        return Ok(());
    }
    for mismatch in &mismatches {
        eprintln!(
            "Mismatch in {}: device {} vs full scan {}",
            mismatch.statistic, mismatch.device, mismatch.reference
        );
    }
    Err(anyhow::anyhow!(
        "{} statistic(s) differ from the full scan",
        mismatches.len()
    ))
}

fn write_report(path: &Path, input: &Path, device: &str, stats: &Statistics) -> Result<()> {
    let report = serde_json::json!({
        "input": input.display().to_string(),
        "device": device,
        "statistics": stats,
    });
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    info!("Report written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.list {
        print!("{}", format_platforms(&list_platforms()));
        return Ok(());
    }

    let config = args.statistics_config()?;
    debug!(?config, "workgroup sizes");

    let selected = select_device(args.platform, args.device)?;
    let device_name = selected.info().name.clone();

    let series = records::read_series(&args.input)?;
    info!("Loaded {} readings from {}", series.len(), args.input.display());

    let stats = match &selected {
        SelectedDevice::Host(device) => run(device, &series, &config)?,
        #[cfg(feature = "cubecl")]
        SelectedDevice::Cubecl(device) => run(device, &series, &config)?,
    };

    print_statistics(&stats);

    if let Some(ref report_path) = args.report {
        write_report(report_path, &args.input, &device_name, &stats)?;
    }

    if args.verify {
        verify(&series, &stats)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["tempstats"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("temp_lincolnshire.txt"));
        assert_eq!(cli.platform, 0);
        assert_eq!(cli.device, 0);
        assert_eq!(cli.statistics_config().unwrap(), StatisticsConfig::default());
    }

    #[test]
    fn test_platform_and_device_flags() {
        let cli = Cli::try_parse_from(["tempstats", "-p", "1", "-d", "2", "data.txt"]).unwrap();
        assert_eq!(cli.platform, 1);
        assert_eq!(cli.device, 2);
        assert_eq!(cli.input, PathBuf::from("data.txt"));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["tempstats", "--fast"]).is_err());
    }

    #[test]
    fn test_bad_workgroup_size() {
        let cli = Cli::try_parse_from(["tempstats", "--sum-workgroup", "48"]).unwrap();
        assert!(cli.statistics_config().is_err());
    }
}
