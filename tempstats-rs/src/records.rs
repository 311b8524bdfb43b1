//! Weather station records
//!
//! The input file is whitespace-delimited with six fields per record:
//!
//! ```text
//! station year month day time air_temperature
//! ```
//!
//! Line breaks carry no meaning; tokens are grouped in sixes. The air
//! temperature is converted to fixed point on ingestion.

use crate::error::{Result, TempStatsError};
use crate::series::{to_fixed, Series};
use memmap3::MmapOptions;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

const FIELDS_PER_RECORD: usize = 6;

/// One reading from one station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemperatureRecord {
    pub station: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub time: u32,
    /// Air temperature in fixed point (tenths of a degree)
    pub air_temperature: i32,
}

fn field<T: FromStr>(token: &str, record: usize, name: &str) -> Result<T> {
    token.parse().map_err(|_| TempStatsError::Data {
        record,
        message: format!("{} '{}' is not a valid number", name, token),
    })
}

fn parse_record(tokens: &[&str], record: usize) -> Result<TemperatureRecord> {
    if tokens.len() != FIELDS_PER_RECORD {
        return Err(TempStatsError::Data {
            record,
            message: format!(
                "expected {} fields, found {}",
                FIELDS_PER_RECORD,
                tokens.len()
            ),
        });
    }
    let reading: f64 = field(tokens[5], record, "air temperature")?;
    let air_temperature = to_fixed(reading).ok_or_else(|| TempStatsError::Data {
        record,
        message: format!("air temperature {} is out of range", reading),
    })?;

    Ok(TemperatureRecord {
        station: tokens[0].to_string(),
        year: field(tokens[1], record, "year")?,
        month: field(tokens[2], record, "month")?,
        day: field(tokens[3], record, "day")?,
        time: field(tokens[4], record, "time")?,
        air_temperature,
    })
}

/// Parse every record in `text`
///
/// # Errors
/// Returns [`TempStatsError::Data`] naming the zero-based record index for a
/// malformed numeric field or a trailing partial record.
pub fn parse_records(text: &str) -> Result<Vec<TemperatureRecord>> {
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    tokens
        .chunks(FIELDS_PER_RECORD)
        .enumerate()
        .map(|(record, chunk)| parse_record(chunk, record))
        .collect()
}

/// Read and parse a record file
///
/// The file is memory-mapped and must be valid UTF-8.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<TemperatureRecord>> {
    let path = path.as_ref();
    let start = Instant::now();
    let file = File::open(path)?;

    // Zero-length files cannot be mapped
    if file.metadata()?.len() == 0 {
        info!(path = %path.display(), records = 0, "read empty data file");
        return Ok(Vec::new());
    }

    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let text = std::str::from_utf8(&mmap).map_err(|e| TempStatsError::Data {
        record: 0,
        message: format!("file is not valid UTF-8 at byte {}", e.valid_up_to()),
    })?;
    debug!(
        bytes = mmap.len(),
        lines = bytecount::count(&mmap, b'\n'),
        "mapped data file"
    );

    let records = parse_records(text)?;
    info!(
        path = %path.display(),
        records = records.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "read data file"
    );
    Ok(records)
}

/// Air temperatures of `records`, in file order
pub fn temperature_series(records: &[TemperatureRecord]) -> Series {
    Series::from_fixed(records.iter().map(|r| r.air_temperature).collect())
}

/// Read a record file straight into a temperature series
pub fn read_series<P: AsRef<Path>>(path: P) -> Result<Series> {
    Ok(temperature_series(&read_records(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
BARKSTON_HEATH 2013 1 1 0 -1.6
BARKSTON_HEATH 2013 1 1 100 -2.3
BARKSTON_HEATH 2013 1 1 200 2.3
";

    #[test]
    fn test_parse_records() {
        let records = parse_records(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].station, "BARKSTON_HEATH");
        assert_eq!(records[1].time, 100);
        assert_eq!(records[0].air_temperature, -16);
        assert_eq!(records[2].air_temperature, 23);
    }

    #[test]
    fn test_line_breaks_are_insignificant() {
        let records = parse_records("A 2013 1 1 0\n 4.5 B 2013\n1 1 100 5.0").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].air_temperature, 45);
        assert_eq!(records[1].station, "B");
    }

    #[test]
    fn test_partial_trailing_record() {
        let err = parse_records("A 2013 1 1 0 4.5\nB 2013 1").unwrap_err();
        assert!(matches!(err, TempStatsError::Data { record: 1, .. }));
    }

    #[test]
    fn test_bad_temperature() {
        let err = parse_records("A 2013 1 1 0 warm").unwrap_err();
        assert!(err.to_string().contains("air temperature"));
    }

    #[test]
    fn test_read_series_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let series = read_series(file.path()).unwrap();
        assert_eq!(series.samples(), &[-16, -23, 23]);
    }

    #[test]
    fn test_read_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(read_records(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = read_records("/nonexistent/temp_lincolnshire.txt").unwrap_err();
        assert!(matches!(err, TempStatsError::Io(_)));
    }
}
