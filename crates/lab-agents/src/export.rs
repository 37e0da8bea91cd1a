//! Wide CSV export of the final biomarkers
//!
//! One header row of test names and one data row of `value unit` cells,
//! the layout the accuracy checker compares against.

use std::io::Write;
use std::path::Path;

use consensus::ConsensusOutput;

use crate::error::CsvError;

/// Header and data cells, in output order.
pub fn csv_row(output: &ConsensusOutput) -> (Vec<String>, Vec<String>) {
    output
        .biomarkers
        .iter()
        .map(|b| {
            let cell = match b.unit.as_deref() {
                Some(unit) => format!("{} {}", b.value, unit),
                None => b.value.to_string(),
            };
            (b.test_name.clone(), cell)
        })
        .unzip()
}

pub fn write_csv<W: Write>(output: &ConsensusOutput, writer: W) -> Result<(), CsvError> {
    let (header, row) = csv_row(output);
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(&header)?;
    csv.write_record(&row)?;
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_csv_file(output: &ConsensusOutput, path: &Path) -> Result<(), CsvError> {
    let file = std::fs::File::create(path).map_err(|source| CsvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_csv(output, file)
}
