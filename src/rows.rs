//! Raw, untyped row access.
//!
//! [`RowSet`] holds a header plus rows of trimmed-or-not text cells exactly as
//! read. The comparator, the time-series rule and geo flagging work on these
//! directly; profiling streams instead and never materialises a `RowSet`.

use std::{io::Read, path::Path};

use encoding_rs::{Encoding, UTF_8};

use crate::{
    error::{InsightError, Result},
    io_utils,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowSet {
    pub fn from_csv_text(text: &str, source_name: &str) -> Result<Self> {
        Self::from_delimited_text(text, io_utils::DEFAULT_CSV_DELIMITER, source_name)
    }

    pub fn from_delimited_text(text: &str, delimiter: u8, source_name: &str) -> Result<Self> {
        let reader = io_utils::open_csv_reader(text.as_bytes(), delimiter, true);
        Self::from_reader(reader, UTF_8, source_name)
    }

    pub fn from_path(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
        Self::from_reader(reader, encoding, &io_utils::source_label(path))
    }

    pub fn from_reader<R: Read>(
        mut reader: csv::Reader<R>,
        encoding: &'static Encoding,
        source_name: &str,
    ) -> Result<Self> {
        let headers = io_utils::reader_headers(&mut reader, encoding, source_name)?;
        let mut rows = Vec::new();
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            rows.push(io_utils::decode_record(&record, encoding)?);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            InsightError::invalid_config(format!("Column '{name}' not found in header"))
        })
    }

    /// Cell text, or `""` when the row is shorter than the header.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(column).map(|s| s.as_str()).unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_read_missing_cells_as_empty() {
        let rows = RowSet::from_csv_text("a,b,c\n1,2\n4,5,6\n", "inline").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.cell(0, 2), "");
        assert_eq!(rows.cell(1, 2), "6");
        assert_eq!(rows.column_values(1).collect::<Vec<_>>(), vec!["2", "5"]);
    }

    #[test]
    fn missing_header_is_reported() {
        let err = RowSet::from_csv_text("", "blank.csv").unwrap_err();
        assert!(matches!(err, InsightError::HeaderMissing { ref source_name } if source_name == "blank.csv"));
    }

    #[test]
    fn require_column_names_the_missing_column() {
        let rows = RowSet::from_csv_text("lat,lon\n1,2\n", "inline").unwrap();
        let tabbed = RowSet::from_delimited_text("lat\tlon\n1\t2\n", b'\t', "inline").unwrap();
        assert_eq!(tabbed, rows);
        assert_eq!(rows.require_column("lon").unwrap(), 1);
        let err = rows.require_column("alt").unwrap_err();
        assert!(err.to_string().contains("alt"));
    }
}
