//! CSV ingest and normalization.
//!
//! This module turns a longitudinal breeding-record CSV into a clean set of
//! `ClutchRow`s that are safe to model.
//!
//! Design goals:
//! - **Strict schema**: missing required columns and non-numeric values in
//!   them fail the whole ingest (clear errors + exit code 2)
//! - **Row-level validation** (skip rows with domain-level anomalies such
//!   as an impossible lifespan, but report what happened)
//! - **Deterministic behavior** (no hidden randomness)
//! - **Separation of concerns**: no fitting logic here

use std::collections::{HashMap, HashSet};
use std::io::Read;

use csv::StringRecord;

use crate::domain::{ClutchRecord, ClutchRow};
use crate::error::AppError;

const REQUIRED_COLUMNS: [&str; 6] = [
    "female_id",
    "age",
    "clutch_size",
    "julian_date",
    "lifespan",
    "year",
];

/// Summary stats about the rows actually read.
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub n_rows: usize,
    pub n_eligible: usize,
    pub n_females: usize,
    pub n_years: usize,
    pub age_min: u32,
    pub age_max: u32,
    pub clutch_mean: f64,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub female_id: Option<String>,
    pub message: String,
}

/// Ingest output: parsed rows + eligible modeling records + stats + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub rows: Vec<ClutchRow>,
    /// Rows with a known lifespan, promoted for modeling.
    pub records: Vec<ClutchRecord>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Ingest from any reader. The pipeline reads the file into memory first
/// (the same bytes feed the cache key) and parses from the slice.
pub fn from_reader<R: Read>(input: R) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::data_format(format!("Failed to read CSV headers: {e}")))?
        .clone();

    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2 because:
        // - records() starts at line 1 after headers
        // - CSV is 1-based line numbers
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    female_id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, line) {
            Ok(row) => rows.push(row),
            Err(RowFailure::Fatal(err)) => return Err(err),
            Err(RowFailure::Skip { female_id, message }) => row_errors.push(RowError {
                line,
                female_id,
                message,
            }),
        }
    }

    let rows_used = rows.len();
    if rows_used == 0 {
        return Err(AppError::insufficient_data(
            "No valid rows remain after parsing.",
        ));
    }

    let records = eligible_records(&rows);
    let stats = compute_stats(&rows, records.len()).ok_or_else(|| {
        AppError::insufficient_data("No usable rows remain after parsing.")
    })?;

    Ok(IngestedData {
        rows,
        records,
        stats,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Rows eligible for trajectory modeling: lifespan known (the female's full
/// record is closed). Idempotent over already-filtered input.
pub fn eligible_records(rows: &[ClutchRow]) -> Vec<ClutchRecord> {
    rows.iter().filter_map(ClutchRow::to_record).collect()
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on
    // the first header. If we don't strip it, schema validation will
    // incorrectly report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    for name in REQUIRED_COLUMNS {
        if !header_map.contains_key(name) {
            return Err(AppError::data_format(format!(
                "Missing required column: `{name}`"
            )));
        }
    }
    Ok(())
}

/// How a row failed to parse.
enum RowFailure {
    /// Malformed value in a required column: the file does not match the
    /// schema, so the whole ingest fails.
    Fatal(AppError),
    /// Domain-level anomaly: the row is skipped and reported.
    Skip {
        female_id: Option<String>,
        message: String,
    },
}

fn skip(female_id: &str, message: String) -> RowFailure {
    RowFailure::Skip {
        female_id: Some(female_id.to_string()),
        message,
    }
}

fn malformed(line: usize, column: &str, message: String) -> RowFailure {
    RowFailure::Fatal(AppError::data_format(format!(
        "Line {line}, column `{column}`: {message}"
    )))
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    line: usize,
) -> Result<ClutchRow, RowFailure> {
    let female_id = get_required(record, header_map, "female_id")
        .map_err(|m| RowFailure::Skip {
            female_id: None,
            message: m,
        })?
        .to_string();

    let age = parse_u32(
        get_required(record, header_map, "age").map_err(|m| skip(&female_id, m))?,
    )
    .map_err(|m| malformed(line, "age", m))?;
    let clutch_size = parse_u32(
        get_required(record, header_map, "clutch_size").map_err(|m| skip(&female_id, m))?,
    )
    .map_err(|m| malformed(line, "clutch_size", m))?;
    let julian_date = parse_f64(
        get_required(record, header_map, "julian_date").map_err(|m| skip(&female_id, m))?,
    )
    .map_err(|m| malformed(line, "julian_date", m))?;
    let year = get_required(record, header_map, "year")
        .map_err(|m| skip(&female_id, m))?
        .parse::<i32>()
        .map_err(|e| malformed(line, "year", format!("Invalid year: {e}")))?;

    // Lifespan is structurally missing for females still alive; an empty
    // cell or "NA" marks that, anything else must parse.
    let lifespan = match get_optional(record, header_map, "lifespan") {
        None => None,
        Some(s) if s.eq_ignore_ascii_case("na") => None,
        Some(s) => Some(parse_f64(s).map_err(|m| malformed(line, "lifespan", m))?),
    };

    if age == 0 {
        return Err(skip(
            &female_id,
            "Invalid `age` value: must be >= 1.".to_string(),
        ));
    }
    if let Some(l) = lifespan {
        if l < f64::from(age) {
            return Err(skip(
                &female_id,
                format!("`lifespan` ({l}) is less than `age` ({age})."),
            ));
        }
    }

    Ok(ClutchRow {
        female_id,
        age,
        clutch_size,
        julian_date,
        lifespan,
        year,
    })
}

fn compute_stats(rows: &[ClutchRow], n_eligible: usize) -> Option<DatasetStats> {
    if rows.is_empty() {
        return None;
    }

    let mut females = HashSet::new();
    let mut years = HashSet::new();
    let mut age_min = u32::MAX;
    let mut age_max = 0u32;
    let mut clutch_sum = 0.0f64;

    for row in rows {
        females.insert(row.female_id.as_str());
        years.insert(row.year);
        age_min = age_min.min(row.age);
        age_max = age_max.max(row.age);
        clutch_sum += f64::from(row.clutch_size);
    }

    Some(DatasetStats {
        n_rows: rows.len(),
        n_eligible,
        n_females: females.len(),
        n_years: years.len(),
        age_min,
        age_max,
        clutch_mean: clutch_sum / rows.len() as f64,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_u32(s: &str) -> Result<u32, String> {
    s.parse::<u32>()
        .map_err(|e| format!("Invalid integer '{s}': {e}"))
}

fn parse_f64(s: &str) -> Result<f64, String> {
    let v = s
        .parse::<f64>()
        .map_err(|e| format!("Invalid number '{s}': {e}"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("Non-finite number '{s}'."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const GOOD_CSV: &str = "\
female_id,age,clutch_size,julian_date,lifespan,year
F001,1,4,120,5,2001
F001,2,6,115,5,2002
F002,3,7,118.5,,2002
F003,1,5,130,NA,2003
";

    #[test]
    fn parses_rows_and_splits_eligible() {
        let data = from_reader(GOOD_CSV.as_bytes()).unwrap();
        assert_eq!(data.rows_read, 4);
        assert_eq!(data.rows_used, 4);
        assert!(data.row_errors.is_empty());

        // Only the two F001 rows have a known lifespan.
        assert_eq!(data.records.len(), 2);
        assert!(data.records.iter().all(|r| r.female_id == "F001"));

        assert_eq!(data.stats.n_females, 3);
        assert_eq!(data.stats.n_years, 3);
        assert_eq!(data.stats.age_min, 1);
        assert_eq!(data.stats.age_max, 3);
        assert!((data.stats.clutch_mean - 5.5).abs() < 1e-12);
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let csv = "female_id,age,clutch_size,julian_date,year\nF001,1,4,120,2001\n";
        let err = from_reader(csv.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert!(err.to_string().contains("lifespan"), "{err}");
    }

    #[test]
    fn bom_on_first_header_is_stripped() {
        let csv = "\u{feff}female_id,age,clutch_size,julian_date,lifespan,year\nF001,1,4,120,5,2001\n";
        let data = from_reader(csv.as_bytes()).unwrap();
        assert_eq!(data.rows_used, 1);
    }

    #[test]
    fn anomalous_rows_are_reported_not_fatal() {
        let csv = "\
female_id,age,clutch_size,julian_date,lifespan,year
F001,1,4,120,5,2001
F002,2,,118,5,2001
F003,2,5,118,1,2001
";
        let data = from_reader(csv.as_bytes()).unwrap();
        assert_eq!(data.rows_used, 1);
        assert_eq!(data.row_errors.len(), 2);
        // missing clutch size on the F002 row
        assert_eq!(data.row_errors[0].line, 3);
        assert!(data.row_errors[0].message.contains("clutch_size"));
        // lifespan < age on the F003 row
        assert_eq!(data.row_errors[1].line, 4);
        assert!(data.row_errors[1].message.contains("lifespan"));
    }

    #[test]
    fn non_numeric_required_value_is_a_schema_error() {
        // A value that fails to parse in a required numeric column means the
        // file does not match the schema; the whole ingest fails even when
        // other rows are fine.
        let csv = "\
female_id,age,clutch_size,julian_date,lifespan,year
F001,1,4,120,5,2001
F002,abc,4,120,5,2001
";
        let err = from_reader(csv.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert!(err.to_string().contains("age"), "{err}");
        assert!(err.to_string().contains("Line 3"), "{err}");
    }

    #[test]
    fn non_numeric_lifespan_is_a_schema_error() {
        let csv = "female_id,age,clutch_size,julian_date,lifespan,year\nF001,1,4,120,soon,2001\n";
        let err = from_reader(csv.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
        assert!(err.to_string().contains("lifespan"), "{err}");
    }

    #[test]
    fn all_rows_invalid_is_insufficient_data() {
        // Every row anomalous (lifespan below age) but none malformed:
        // nothing left to model.
        let csv = "female_id,age,clutch_size,julian_date,lifespan,year\nF001,5,4,120,2,2001\n";
        let err = from_reader(csv.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn eligible_records_is_idempotent() {
        let data = from_reader(GOOD_CSV.as_bytes()).unwrap();
        let closed: Vec<ClutchRow> = data
            .rows
            .iter()
            .filter(|r| r.lifespan.is_some())
            .cloned()
            .collect();
        assert_eq!(eligible_records(&closed).len(), data.records.len());
    }
}
