//! Portfolio File Loader
//!
//! Reads portfolio JSON documents from disk. The portfolio key is the file
//! stem, so `~/crypto/main.json` is reported as `main`.

use std::path::{Path, PathBuf};

use crate::application::ports::TrackedPortfolio;
use crate::domain::portfolio::PortfolioData;
use crate::infrastructure::config::PortfolioSource;

/// Errors loading a portfolio.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    /// The portfolio file does not exist.
    #[error("portfolio file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    /// The report directory does not exist.
    #[error("report directory does not exist: {}", .0.display())]
    MissingDestination(PathBuf),

    /// The file name has no usable stem.
    #[error("cannot derive a portfolio key from {}", .0.display())]
    InvalidName(PathBuf),

    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid portfolio document.
    #[error("invalid portfolio document {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Portfolio key for a source path.
///
/// # Errors
///
/// Returns an error if the path has no UTF-8 file stem.
pub fn portfolio_key(path: &Path) -> Result<String, PortfolioError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PortfolioError::InvalidName(path.to_path_buf()))
}

/// Check that every source file and report directory exists.
///
/// # Errors
///
/// Returns the first missing path.
pub fn verify_sources(sources: &[PortfolioSource]) -> Result<(), PortfolioError> {
    for source in sources {
        if !source.path.is_file() {
            return Err(PortfolioError::MissingFile(source.path.clone()));
        }
        if !source.destination.is_dir() {
            return Err(PortfolioError::MissingDestination(source.destination.clone()));
        }
    }
    Ok(())
}

/// Parse a portfolio document.
///
/// # Errors
///
/// Returns an error if the text is not a portfolio document.
pub fn parse_portfolio(text: &str) -> Result<PortfolioData, serde_json::Error> {
    serde_json::from_str(text)
}

/// Load one portfolio.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_portfolio(source: &PortfolioSource) -> Result<TrackedPortfolio, PortfolioError> {
    let key = portfolio_key(&source.path)?;
    let text = tokio::fs::read_to_string(&source.path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PortfolioError::MissingFile(source.path.clone()),
            _ => PortfolioError::Io {
                path: source.path.clone(),
                source: e,
            },
        })?;
    let data = parse_portfolio(&text).map_err(|e| PortfolioError::Parse {
        path: source.path.clone(),
        source: e,
    })?;

    tracing::debug!(portfolio = %key, coins = data.coins().count(), "Portfolio loaded");
    Ok(TrackedPortfolio {
        key,
        destination: source.destination.clone(),
        data,
    })
}

/// Load every portfolio, failing on the first error.
///
/// # Errors
///
/// Returns the first load error.
pub async fn load_all(sources: &[PortfolioSource]) -> Result<Vec<TrackedPortfolio>, PortfolioError> {
    let mut portfolios = Vec::with_capacity(sources.len());
    for source in sources {
        portfolios.push(load_portfolio(source).await?);
    }
    Ok(portfolios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn source(dir: &TempDir, name: &str, contents: &str) -> PortfolioSource {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        PortfolioSource {
            path,
            destination: dir.path().to_path_buf(),
        }
    }

    #[test_case("/home/u/main.json", "main" ; "json extension")]
    #[test_case("savings", "savings" ; "no extension")]
    #[test_case("/a/b/cold.wallet.json", "cold.wallet" ; "inner dot")]
    fn key_is_file_stem(path: &str, expected: &str) {
        assert_eq!(portfolio_key(Path::new(path)).unwrap(), expected);
    }

    #[test]
    fn key_requires_file_name() {
        assert!(matches!(
            portfolio_key(Path::new("/")),
            Err(PortfolioError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn loads_and_aggregates_wallets() {
        let dir = TempDir::new().unwrap();
        let src = source(
            &dir,
            "main.json",
            r#"{"ETH": {"wallets": [{"total": 4}, {"total": 6}, {}]}, "ADA": {"wallets": []}}"#,
        );

        let portfolio = load_portfolio(&src).await.unwrap();

        assert_eq!(portfolio.key, "main");
        let holdings = portfolio.data.holdings();
        let eth = holdings.iter().find(|h| h.coin == "ETH").unwrap();
        assert!((eth.quantity - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "bad.json", "{not json");

        assert!(matches!(
            load_portfolio(&src).await,
            Err(PortfolioError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn load_all_stops_at_missing_file() {
        let dir = TempDir::new().unwrap();
        let good = source(&dir, "good.json", "{}");
        let missing = PortfolioSource {
            path: dir.path().join("missing.json"),
            destination: dir.path().to_path_buf(),
        };

        assert!(matches!(
            load_all(&[good, missing]).await,
            Err(PortfolioError::MissingFile(_))
        ));
    }

    #[test]
    fn verify_sources_checks_destination() {
        let dir = TempDir::new().unwrap();
        let mut src = source(&dir, "main.json", "{}");
        assert!(verify_sources(std::slice::from_ref(&src)).is_ok());

        src.destination = dir.path().join("nope");
        assert!(matches!(
            verify_sources(&[src]),
            Err(PortfolioError::MissingDestination(_))
        ));
    }
}
