//! CSV session import
//!
//! Reads one session per CSV file. Column names are normalized through a
//! variation map ("hr", "bpm" and friends all land on `heart_rate`), so
//! exports from different head units and platforms import without manual
//! reshaping. The time column may hold plain elapsed seconds or absolute
//! datetimes; absolute times are rebased so the first sample sits at zero.
//!
//! Import only parses and orders. Physiological validation happens in the
//! detection pipeline. Unreadable files surface as [`HrrsError::Io`];
//! everything wrong inside the file surfaces as [`HrrsError::Import`].

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use crate::error::{HrrsError, Result};
use crate::models::{Sample, Session};

/// CSV importer with flexible column mapping
pub struct CsvImporter {
    column_mapping: HashMap<String, String>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        // Common column name variations
        Self::add_mapping(
            &mut column_mapping,
            "timestamp",
            &["timestamp", "time", "elapsed_time", "elapsed", "seconds"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "heart_rate",
            &["heart_rate", "hr", "heartrate", "bpm"],
        );

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, String>, standard: &str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard.to_string());
        }
    }

    fn normalize_column_name(&self, name: &str) -> String {
        let normalized = name.to_lowercase().replace([' ', '-'], "_");

        self.column_mapping
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    fn parse_datetime(date_str: &str) -> Result<DateTime<Utc>> {
        let formats = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%SZ",
            "%Y-%m-%dT%H:%M:%S%.fZ",
        ];

        for format in &formats {
            if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
            }
        }

        Err(HrrsError::Import(format!(
            "unable to parse datetime: {}",
            date_str
        )))
    }

    /// Import one session from a CSV file
    ///
    /// The session id is the file stem. Requires a time column and a
    /// heart-rate column; every other column is ignored.
    pub fn import_file(&self, file_path: &Path) -> Result<Session> {
        let file = File::open(file_path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| HrrsError::Import(format!("failed to read CSV headers: {}", e)))?
            .clone();

        let mut time_column = None;
        let mut hr_column = None;
        for (i, header) in headers.iter().enumerate() {
            match self.normalize_column_name(header).as_str() {
                "timestamp" => time_column = Some(i),
                "heart_rate" => hr_column = Some(i),
                _ => {}
            }
        }
        let time_column = time_column
            .ok_or_else(|| HrrsError::Import("no time column found in CSV headers".to_string()))?;
        let hr_column = hr_column.ok_or_else(|| {
            HrrsError::Import("no heart-rate column found in CSV headers".to_string())
        })?;

        let mut samples = Vec::new();
        let mut first_datetime: Option<DateTime<Utc>> = None;

        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                HrrsError::Import(format!("failed to read CSV record {}: {}", row + 1, e))
            })?;

            let time_field = record.get(time_column).ok_or_else(|| {
                HrrsError::Import(format!("row {} is missing the time column", row + 1))
            })?;
            let hr_field = record.get(hr_column).ok_or_else(|| {
                HrrsError::Import(format!("row {} is missing the heart-rate column", row + 1))
            })?;

            if hr_field.is_empty() {
                // Dropouts are common in optical HR exports; skip the row.
                continue;
            }

            let elapsed_seconds = if let Ok(seconds) = time_field.parse::<f64>() {
                seconds
            } else {
                let datetime = Self::parse_datetime(time_field)?;
                let base = *first_datetime.get_or_insert(datetime);
                (datetime - base).num_milliseconds() as f64 / 1000.0
            };

            let heart_rate: f64 = hr_field.parse().map_err(|_| {
                HrrsError::Import(format!(
                    "row {}: bad heart-rate value {:?}",
                    row + 1,
                    hr_field
                ))
            })?;

            samples.push(Sample::new(elapsed_seconds, heart_rate));
        }

        if samples.is_empty() {
            return Err(HrrsError::Import(format!(
                "no usable samples found in CSV file: {}",
                file_path.display()
            )));
        }

        let id = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("session")
            .to_string();

        debug!(
            session_id = %id,
            samples = samples.len(),
            "CSV session imported"
        );
        Ok(Session::new(id, samples))
    }
}
