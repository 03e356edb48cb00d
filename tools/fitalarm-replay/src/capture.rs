//! Heart rate capture files.
//!
//! A capture is a CSV file with a header row and two columns: seconds since
//! the start of the capture and the heart rate in beats per minute.
//!
//! ```text
//! seconds,bpm
//! 0.0,62
//! 1.0,64.5
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CaptureRow {
    pub seconds: f64,
    pub bpm: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open capture: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed capture: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: time {seconds}s goes backwards")]
    OutOfOrder { row: usize, seconds: f64 },

    #[error("row {row}: time must be a finite, non-negative number of seconds")]
    BadTime { row: usize },

    #[error("capture has no samples")]
    Empty,
}

pub fn load(path: &Path) -> Result<Vec<CaptureRow>, CaptureError> {
    from_reader(File::open(path)?)
}

/// Parse and validate rows. Rows must be in time order; non-finite heart
/// rates are kept, since the engine is expected to discard them itself.
pub fn from_reader<R: Read>(reader: R) -> Result<Vec<CaptureRow>, CaptureError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut rows: Vec<CaptureRow> = Vec::new();
    for (index, record) in csv.deserialize().enumerate() {
        let row: CaptureRow = record?;
        let number = index + 1;

        if !row.seconds.is_finite() || row.seconds < 0.0 {
            return Err(CaptureError::BadTime { row: number });
        }
        if rows.last().is_some_and(|prev| row.seconds < prev.seconds) {
            return Err(CaptureError::OutOfOrder {
                row: number,
                seconds: row.seconds,
            });
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(CaptureError::Empty);
    }
    Ok(rows)
}
