//! Tolerant CSV parsing
//!
//! Pure parse step over an upload's raw bytes. Field values are stored
//! verbatim; all normalization happens at rule-evaluation time.

use payrun_common::{PayrunError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Delimiters considered by detection, in tie-break order.
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// A parsed CSV file: normalized headers plus one field map per data line.
#[derive(Debug, Clone)]
pub struct ParsedCsv {
    /// Normalized header names, in file order.
    pub headers: Vec<String>,
    /// Field maps keyed by normalized header; missing cells are `None`.
    /// Index 0 is row_number 1.
    pub rows: Vec<HashMap<String, Option<String>>>,
}

/// Normalize a header name: trim whitespace, then strip byte-order marks.
pub fn normalize_header(header: &str) -> String {
    header.trim().trim_matches('\u{feff}').trim().to_string()
}

/// Pick the delimiter by counting candidates in the header line.
///
/// Falls back to a comma when nothing matches (single-column files).
pub fn detect_delimiter(bytes: &[u8]) -> u8 {
    let header_line = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);

    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header_line.iter().filter(|b| **b == d).count()))
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count > 0)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// Parse raw CSV bytes in tolerant mode.
///
/// Missing cells degrade to `None`, surplus cells are dropped, and cells
/// that are not valid UTF-8 degrade lossily for that cell only. A file
/// without a header line or without any data lines is a fatal parse error.
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedCsv> {
    if bytes.iter().all(|b| b.is_ascii_whitespace() || *b == 0xEF || *b == 0xBB || *b == 0xBF) {
        return Err(PayrunError::Parse("CSV is empty".to_string()));
    }

    let delimiter = detect_delimiter(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|e| PayrunError::Parse(format!("CSV header is unreadable: {e}")))?
        .iter()
        .map(|cell| normalize_header(&String::from_utf8_lossy(cell)))
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(PayrunError::Parse("CSV is empty".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = match record {
            Ok(record) => record,
            // A malformed line degrades to an empty field map; the row
            // number is still consumed so chunk ranges stay aligned.
            Err(_) => csv::ByteRecord::new(),
        };

        let mut fields: HashMap<String, Option<String>> = HashMap::with_capacity(headers.len());
        for (index, header) in headers.iter().enumerate() {
            let value = record
                .get(index)
                .map(|cell| String::from_utf8_lossy(cell).to_string());
            fields.insert(header.clone(), value);
        }

        rows.push(fields);
    }

    if rows.is_empty() {
        return Err(PayrunError::Parse("CSV has no data rows".to_string()));
    }

    Ok(ParsedCsv { headers, rows })
}

/// Verify raw bytes against the content hash recorded at intake.
///
/// An empty recorded hash means intake did not store one; nothing to check.
pub fn verify_content_sha256(bytes: &[u8], expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }

    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PayrunError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header_strips_bom_and_whitespace() {
        assert_eq!(normalize_header("\u{feff}Amount"), "Amount");
        assert_eq!(normalize_header("  Currency  "), "Currency");
        assert_eq!(normalize_header(" \u{feff}Iban "), "Iban");
        assert_eq!(normalize_header("Name"), "Name");
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(b"a,b,c\n1,2,3"), b',');
        assert_eq!(detect_delimiter(b"a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter(b"a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter(b"a|b|c"), b'|');
        // single column falls back to comma
        assert_eq!(detect_delimiter(b"amount\n12.5"), b',');
    }

    #[test]
    fn test_parse_csv_basic() {
        let parsed = parse_csv(b"Name,Amount\nalice,10.00\nbob,20.00").unwrap();
        assert_eq!(parsed.headers, vec!["Name", "Amount"]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(
            parsed.rows[0].get("Name"),
            Some(&Some("alice".to_string()))
        );
        assert_eq!(
            parsed.rows[1].get("Amount"),
            Some(&Some("20.00".to_string()))
        );
    }

    #[test]
    fn test_parse_csv_semicolon_detection() {
        let parsed = parse_csv(b"Name;Amount\nalice;10").unwrap();
        assert_eq!(parsed.headers, vec!["Name", "Amount"]);
        assert_eq!(parsed.rows[0].get("Amount"), Some(&Some("10".to_string())));
    }

    #[test]
    fn test_parse_csv_values_are_verbatim() {
        let parsed = parse_csv(b"Name,Iban\n  alice  ,DE89 3704\n").unwrap();
        // no evaluation-time normalization at parse time
        assert_eq!(
            parsed.rows[0].get("Name"),
            Some(&Some("  alice  ".to_string()))
        );
        assert_eq!(
            parsed.rows[0].get("Iban"),
            Some(&Some("DE89 3704".to_string()))
        );
    }

    #[test]
    fn test_parse_csv_missing_cells_degrade_to_none() {
        let parsed = parse_csv(b"Name,Amount,Currency\nalice,10\n").unwrap();
        assert_eq!(parsed.rows[0].get("Amount"), Some(&Some("10".to_string())));
        assert_eq!(parsed.rows[0].get("Currency"), Some(&None));
    }

    #[test]
    fn test_parse_csv_surplus_cells_are_dropped() {
        let parsed = parse_csv(b"Name\nalice,extra,cells\n").unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].len(), 1);
    }

    #[test]
    fn test_parse_csv_bom_header() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"Name,Amount\nalice,1");
        let parsed = parse_csv(&bytes).unwrap();
        assert_eq!(parsed.headers[0], "Name");
    }

    #[test]
    fn test_parse_csv_empty_file_is_fatal() {
        assert!(matches!(parse_csv(b""), Err(PayrunError::Parse(_))));
        assert!(matches!(parse_csv(b"   \n"), Err(PayrunError::Parse(_))));
    }

    #[test]
    fn test_parse_csv_zero_data_lines_is_fatal() {
        let err = parse_csv(b"Name,Amount\n").unwrap_err();
        assert!(matches!(err, PayrunError::Parse(_)));
        assert!(err.to_string().contains("no data rows"));
    }

    #[test]
    fn test_verify_content_sha256() {
        let bytes = b"Name,Amount\nalice,1";
        let hash = hex::encode(Sha256::digest(bytes));

        assert!(verify_content_sha256(bytes, &hash).is_ok());
        assert!(verify_content_sha256(bytes, &hash.to_uppercase()).is_ok());
        assert!(verify_content_sha256(bytes, "").is_ok());
        assert!(matches!(
            verify_content_sha256(bytes, "deadbeef"),
            Err(PayrunError::ChecksumMismatch { .. })
        ));
    }
}
