//! Header-plus-rows text tables used for bulk loads.
//!
//! Every cell is already formatted as text; an empty cell means null.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::WarehouseError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularData {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TabularData {
    #[must_use]
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Append a row, which must match the header width.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidData`] on a width mismatch.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), WarehouseError> {
        if row.len() != self.header.len() {
            return Err(WarehouseError::InvalidData(format!(
                "row {} has {} cells, header has {}",
                self.rows.len(),
                row.len(),
                self.header.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as CSV with a leading header line.
    ///
    /// # Errors
    /// Returns an error if the CSV writer fails.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, WarehouseError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|error| WarehouseError::Io(error.into_error()))
    }

    /// Write the CSV rendering to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_csv(&self, path: &Path) -> Result<(), WarehouseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_csv_bytes()?)?;
        Ok(())
    }

    /// Read a CSV document whose first line is the header.
    ///
    /// # Errors
    /// Returns an error on malformed CSV or ragged rows.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, WarehouseError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let header = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut data = Self::new(header);
        for record in csv_reader.records() {
            let record = record?;
            data.push_row(record.iter().map(str::to_string).collect())?;
        }
        Ok(data)
    }
}
