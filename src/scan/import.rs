//! Bulk plan import from tabular (CSV) input.
//!
//! Each row becomes one [`ScanRequest`] with sample metadata. Column order does not
//! matter and extra columns are ignored, but every column in [`REQUIRED_COLUMNS`]
//! must be present. The single `pitch` column applies to both axes.

use crate::scan::request::{SampleMetadata, ScanRequest};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Columns a plan table must provide.
pub const REQUIRED_COLUMNS: [&str; 11] = [
    "name", "serial", "info", "xstart", "xstop", "ystart", "ystop", "pitch", "dwell", "type",
    "owner",
];

/// Errors reported to the operator when a plan table cannot be imported.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Every required column absent from the header.
    #[error("Plan is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A cell could not be parsed.
    #[error("Row {row}: invalid value '{value}' for column '{column}'")]
    InvalidValue {
        /// Line in the file; the header is line 1.
        row: usize,
        /// Column name.
        column: &'static str,
        /// The offending text.
        value: String,
    },

    /// The table itself could not be read.
    #[error("Malformed plan table: {0}")]
    Csv(#[from] csv::Error),

    /// The plan file could not be opened.
    #[error("Cannot open plan '{path}': {source}")]
    Open {
        /// Path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Import a plan file from disk.
pub fn import_path(path: &Path) -> Result<Vec<ScanRequest>, ImportError> {
    let file = std::fs::File::open(path).map_err(|source| ImportError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let requests = import_csv(file)?;
    info!(path = %path.display(), count = requests.len(), "Imported plan");
    Ok(requests)
}

/// Import a plan from any CSV reader.
pub fn import_csv<R: Read>(reader: R) -> Result<Vec<ScanRequest>, ImportError> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv
        .headers()?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    let columns = ColumnIndex::resolve(&headers)?;

    let mut requests = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        // header is line 1
        let row = i + 2;
        let request = columns.parse_row(&record, row)?;
        debug!(row, name = request.name(), "Parsed plan row");
        requests.push(request);
    }
    Ok(requests)
}

struct ColumnIndex {
    positions: [usize; REQUIRED_COLUMNS.len()],
}

impl ColumnIndex {
    fn resolve(headers: &[String]) -> Result<Self, ImportError> {
        let mut positions = [0usize; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();
        for (slot, column) in REQUIRED_COLUMNS.iter().enumerate() {
            match headers.iter().position(|h| h == column) {
                Some(pos) => positions[slot] = pos,
                None => missing.push((*column).to_string()),
            }
        }
        if missing.is_empty() {
            Ok(Self { positions })
        } else {
            Err(ImportError::MissingColumns(missing))
        }
    }

    fn text<'r>(&self, record: &'r csv::StringRecord, column: &'static str) -> &'r str {
        REQUIRED_COLUMNS
            .iter()
            .position(|c| *c == column)
            .and_then(|slot| record.get(self.positions[slot]))
            .unwrap_or("")
    }

    fn number<T: std::str::FromStr>(
        &self,
        record: &csv::StringRecord,
        column: &'static str,
        row: usize,
    ) -> Result<T, ImportError> {
        let value = self.text(record, column);
        value.parse().map_err(|_| ImportError::InvalidValue {
            row,
            column,
            value: value.to_string(),
        })
    }

    fn parse_row(&self, record: &csv::StringRecord, row: usize) -> Result<ScanRequest, ImportError> {
        let name = self.text(record, "name");
        if name.is_empty() {
            return Err(ImportError::InvalidValue {
                row,
                column: "name",
                value: String::new(),
            });
        }
        let pitch: u32 = self.number(record, "pitch", row)?;

        Ok(ScanRequest::builder(name)
            .x(
                self.number(record, "xstart", row)?,
                self.number(record, "xstop", row)?,
                pitch,
            )
            .y(
                self.number(record, "ystart", row)?,
                self.number(record, "ystop", row)?,
                pitch,
            )
            .dwell(self.number(record, "dwell", row)?)
            .sample(SampleMetadata {
                info: self.text(record, "info").to_string(),
                owner: self.text(record, "owner").to_string(),
                serial: self.text(record, "serial").to_string(),
                kind: self.text(record, "type").to_string(),
            })
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::request::RequestMetadata;

    const PLAN: &str = "\
name,serial,info,xstart,xstop,ystart,ystop,pitch,dwell,type,owner,comment
s1, G-17 ,garnet rim,0,10,0,5,11,0.01,thin section,beamline,first
s2,G-18,core,-1.5,1.5,-2,2,4,0.5,powder,visitor,
";

    #[test]
    fn test_import_rows_in_order() {
        let requests = import_csv(PLAN.as_bytes()).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].name(), "s1");
        assert_eq!(requests[0].x_axis(), (0.0, 10.0, 11));
        assert_eq!(requests[0].y_axis(), (0.0, 5.0, 11));
        assert_eq!(requests[1].x_axis(), (-1.5, 1.5, 4));

        match requests[0].metadata() {
            Some(RequestMetadata::Sample(sample)) => {
                assert_eq!(sample.serial, "G-17");
                assert_eq!(sample.kind, "thin section");
                assert_eq!(sample.owner, "beamline");
            }
            other => panic!("expected sample metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_columns_are_all_reported() {
        let table = "name,serial,info,xstart,xstop,ystart,ystop,dwell,type\ns1,1,i,0,1,0,1,0.1,t\n";
        let err = import_csv(table.as_bytes()).unwrap_err();
        match &err {
            ImportError::MissingColumns(missing) => {
                assert_eq!(missing, &vec!["pitch".to_string(), "owner".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("pitch, owner"));
    }

    #[test]
    fn test_bad_number_names_row_and_column() {
        let table = "\
name,serial,info,xstart,xstop,ystart,ystop,pitch,dwell,type,owner
ok,1,i,0,1,0,1,2,0.1,t,o
bad,1,i,0,one,0,1,2,0.1,t,o
";
        let err = import_csv(table.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ImportError::InvalidValue {
                row: 3,
                column: "xstop",
                ..
            }
        ));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let table = "NAME,Serial,INFO,XStart,XStop,YStart,YStop,Pitch,Dwell,Type,Owner\na,1,i,0,1,0,1,2,0.1,t,o\n";
        let requests = import_csv(table.as_bytes()).unwrap();
        assert_eq!(requests[0].name(), "a");
    }

    #[test]
    fn test_import_path_reports_missing_file() {
        let err = import_path(Path::new("/nonexistent/plan.csv")).unwrap_err();
        assert!(matches!(err, ImportError::Open { .. }));
    }
}
