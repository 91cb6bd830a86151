//! I/O utilities for CSV reading, writing, encoding, and delimiter resolution.
//!
//! All file I/O for profiling and comparison flows through this module. It
//! provides:
//!
//! - **Delimiter resolution**: extension-based auto-detection (`.csv` → comma,
//!   `.tsv` → tab) with manual override support.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8. A
//!   leading byte-order mark on the header is dropped during decoding.
//! - **Reader/writer construction**: readers are *flexible* so ragged rows are
//!   read rather than rejected; missing trailing cells count as empty.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{InsightError, Result};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| InsightError::invalid_config(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };
    Ok(open_csv_reader(reader, delimiter, has_headers))
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(File::create(p)?)),
        _ => Box::new(std::io::stdout()),
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

/// Reads a whole file (or stdin for `-`) as text in the given encoding.
pub fn read_text(path: &Path, encoding: &'static Encoding) -> Result<String> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        std::io::stdin().lock().read_to_end(&mut bytes)?;
    } else {
        File::open(path)?.read_to_end(&mut bytes)?;
    }
    decode_bytes(&bytes, encoding)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(InsightError::Decode(format!(
            "invalid byte sequence for encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Decoded header row. An empty header record means the input had no header.
pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
    source_name: &str,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    if headers.is_empty() {
        return Err(InsightError::header_missing(source_name));
    }
    decode_record(&headers, encoding)
}

pub fn source_label(path: &Path) -> String {
    if is_dash(path) {
        return "<stdin>".to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn delimiter_follows_extension_unless_overridden() {
        assert_eq!(resolve_input_delimiter(&PathBuf::from("a.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("a.CSV"), None), b',');
        assert_eq!(
            resolve_input_delimiter(&PathBuf::from("a.tsv"), Some(b';')),
            b';'
        );
    }

    #[test]
    fn header_bom_is_dropped() {
        let text = "\u{feff}city,sales\nseoul,1\n";
        let mut reader = open_csv_reader(text.as_bytes(), b',', true);
        let headers = reader_headers(&mut reader, UTF_8, "inline").unwrap();
        assert_eq!(headers, vec!["city", "sales"]);
    }

    #[test]
    fn empty_input_has_no_header() {
        let mut reader = open_csv_reader("".as_bytes(), b',', true);
        let err = reader_headers(&mut reader, UTF_8, "inline").unwrap_err();
        assert!(matches!(err, InsightError::HeaderMissing { .. }));
    }

    #[test]
    fn unknown_encoding_is_a_configuration_error() {
        assert!(resolve_encoding(Some("windows-1252")).is_ok());
        assert!(matches!(
            resolve_encoding(Some("klingon")),
            Err(InsightError::InvalidConfiguration(_))
        ));
    }
}
