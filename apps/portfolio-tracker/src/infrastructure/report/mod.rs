//! Report File Writer
//!
//! Writes each portfolio report into its destination directory, one file
//! per enabled save format:
//!
//! | Format       | File                 | Contents                          |
//! |--------------|----------------------|-----------------------------------|
//! | `statsjson`  | `<key>.stats.json`   | currency, balance, tickers, rows  |
//! | `balancetxt` | `<key>.balance.txt`  | display-rounded total             |
//! | `tickerstxt` | `<key>.tickers.txt`  | one formatted ticker per line     |
//! | `summarytxt` | `<key>.summary.txt`  | aligned summary table             |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::application::ports::{PortfolioReport, SinkError, ValuationSink};
use crate::domain::presentation::render_summary_table;
use crate::domain::valuation::round_for_display;
use crate::infrastructure::config::SaveFormat;

/// Errors writing report files.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Stats document could not be encoded.
    #[error("failed to encode stats: {0}")]
    Encode(#[from] serde_json::Error),

    /// A report file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ReportError> for SinkError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Encode(_) => Self::Encoding {
                message: err.to_string(),
            },
            ReportError::Write { .. } => Self::WriteFailed {
                message: err.to_string(),
            },
        }
    }
}

/// Path of one report file.
#[must_use]
pub fn report_path(destination: &Path, key: &str, format: SaveFormat) -> PathBuf {
    destination.join(format!("{key}.{}", format.file_suffix()))
}

/// Render the contents of one report file.
///
/// # Errors
///
/// Returns an error if the stats document cannot be encoded.
pub fn render(report: &PortfolioReport, format: SaveFormat) -> Result<String, ReportError> {
    Ok(match format {
        SaveFormat::StatsJson => to_pretty_json(&report.stats)?,
        SaveFormat::BalanceTxt => round_for_display(report.valuation.total_fiat_value).to_string(),
        SaveFormat::TickersTxt => report.stats.tickers.join("\n"),
        SaveFormat::SummaryTxt => render_summary_table(&report.stats.summary),
    })
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// File-backed valuation sink.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    formats: BTreeSet<SaveFormat>,
}

impl ReportWriter {
    /// Writer for the given formats.
    #[must_use]
    pub const fn new(formats: BTreeSet<SaveFormat>) -> Self {
        Self { formats }
    }

    /// Enabled formats.
    #[must_use]
    pub const fn formats(&self) -> &BTreeSet<SaveFormat> {
        &self.formats
    }

    /// Write every enabled file for one report.
    ///
    /// # Errors
    ///
    /// Returns the first encode or write failure.
    pub async fn write(&self, report: &PortfolioReport) -> Result<(), ReportError> {
        for format in &self.formats {
            let path = report_path(&report.destination, &report.key, *format);
            let contents = render(report, *format)?;
            tokio::fs::write(&path, contents)
                .await
                .map_err(|source| ReportError::Write { path, source })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ValuationSink for ReportWriter {
    async fn publish(&self, report: &PortfolioReport) -> Result<(), SinkError> {
        self.write(report).await.map_err(SinkError::from)
    }
}
