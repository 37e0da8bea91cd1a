//! Accuracy check against a hand-made reference CSV
//!
//! Compares the first data row of both files column by column. Cells match
//! when equal after trimming and lower-casing. Columns are taken from the
//! reference file; a column the extracted file lacks is a mismatch.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::error::CsvError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub field: String,
    pub actual: String,
    /// `None` when the extracted file has no such column
    pub extracted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// Percentage of matching fields, 0 when the reference has no columns
    pub accuracy_pct: f64,
    pub total_fields: usize,
    pub correct_fields: usize,
    pub mismatches: Vec<FieldMismatch>,
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}% ({}/{} fields)",
            self.accuracy_pct, self.correct_fields, self.total_fields
        )
    }
}

struct FirstRow {
    header: Vec<String>,
    row: Vec<String>,
}

fn first_row<R: Read>(reader: R, label: &str) -> Result<FirstRow, CsvError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let header = csv.headers()?.iter().map(str::to_string).collect();
    let row = match csv.records().next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => return Err(CsvError::NoDataRow(label.to_string())),
    };
    Ok(FirstRow { header, row })
}

fn same(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn compare<A: Read, E: Read>(actual: A, extracted: E) -> Result<AccuracyReport, CsvError> {
    let actual = first_row(actual, "reference CSV")?;
    let extracted = first_row(extracted, "extracted CSV")?;

    let extracted_by_name: HashMap<&str, &str> = extracted
        .header
        .iter()
        .map(String::as_str)
        .zip(extracted.row.iter().map(String::as_str))
        .collect();

    let mut correct = 0;
    let mut mismatches = Vec::new();
    for (i, field) in actual.header.iter().enumerate() {
        let expected = actual.row.get(i).map(String::as_str).unwrap_or("");
        let got = extracted_by_name.get(field.as_str()).copied();
        match got {
            Some(value) if same(expected, value) => correct += 1,
            _ => mismatches.push(FieldMismatch {
                field: field.clone(),
                actual: expected.to_string(),
                extracted: got.map(str::to_string),
            }),
        }
    }

    let total = actual.header.len();
    let accuracy_pct = if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    };

    Ok(AccuracyReport {
        accuracy_pct,
        total_fields: total,
        correct_fields: correct,
        mismatches,
    })
}

pub fn compare_files(actual: &Path, extracted: &Path) -> Result<AccuracyReport, CsvError> {
    let open = |path: &Path| {
        std::fs::File::open(path).map_err(|source| CsvError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    compare(open(actual)?, open(extracted)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_match_ignores_case_and_whitespace() {
        let report = compare(
            "Hemoglobin,Glucose\n13.5 g/dL,92 mg/dL\n".as_bytes(),
            "Glucose,Hemoglobin\n92 MG/DL , 13.5 g/dL\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(report.total_fields, 2);
        assert_eq!(report.correct_fields, 2);
        assert_eq!(report.accuracy_pct, 100.0);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn test_mismatch_and_missing_column() {
        let report = compare(
            "Hemoglobin,Glucose,Sodium\n13.5 g/dL,92 mg/dL,140 mEq/L\n".as_bytes(),
            "Hemoglobin,Glucose\n13.5 g/dL,96 mg/dL\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(report.correct_fields, 1);
        assert!((report.accuracy_pct - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.to_string(), "33.33% (1/3 fields)");
        assert_eq!(
            report.mismatches,
            vec![
                FieldMismatch {
                    field: "Glucose".into(),
                    actual: "92 mg/dL".into(),
                    extracted: Some("96 mg/dL".into()),
                },
                FieldMismatch {
                    field: "Sodium".into(),
                    actual: "140 mEq/L".into(),
                    extracted: None,
                },
            ]
        );
    }

    #[test]
    fn test_missing_data_row() {
        let err = compare("Hemoglobin\n".as_bytes(), "Hemoglobin\n13.5\n".as_bytes()).unwrap_err();
        assert!(matches!(err, CsvError::NoDataRow(_)));
    }
}
