//! JSON report generation.
//!
//! [`JsonGenerator`] serializes a [`SessionReport`] either compactly or
//! pretty-printed, in memory or straight to a file.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use medsim_report::json::JsonGenerator;
//! use medsim_report::{HistoryReport, SessionReport};
//! use medsim_session::ProgressionTracker;
//!
//! let tracker = ProgressionTracker::new();
//! let progression = HistoryReport::from(tracker.state());
//! let report = SessionReport::new(progression, Vec::new(), Utc::now()).unwrap();
//!
//! let generator = JsonGenerator::new(&report);
//!
//! let compact = generator.generate().unwrap();
//! assert!(compact.contains(r#""totalCases":0"#));
//!
//! let pretty = generator.generate_pretty().unwrap();
//! assert!(pretty.contains('\n'));
//!
//! // generator.write_to_file(Path::new("medsim-report.json"), true).unwrap();
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{ReportError, Result, SessionReport};

/// JSON report generator.
pub struct JsonGenerator<'a> {
    report: &'a SessionReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a SessionReport) -> Self {
        Self { report }
    }

    /// Generates compact JSON output (single line, no extra whitespace).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output with indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the JSON report to `path`, creating or overwriting the file.
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
