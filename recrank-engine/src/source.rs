//! Rating sources
//!
//! A [`RatingSource`] produces the current rating collection on demand. It is
//! only ever called from inside a training task on the blocking pool, so
//! implementations may block on I/O.

use crate::error::{BoxError, Error, Result};
use recrank_common::Rating;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplier of training input
pub trait RatingSource: Send + Sync {
    fn fetch(&self) -> std::result::Result<Vec<Rating>, BoxError>;
}

/// Any `Fn() -> Result<Vec<Rating>, E>` closure is a rating source
impl<F, E> RatingSource for F
where
    F: Fn() -> std::result::Result<Vec<Rating>, E> + Send + Sync,
    E: Into<BoxError>,
{
    fn fetch(&self) -> std::result::Result<Vec<Rating>, BoxError> {
        self().map_err(Into::into)
    }
}

/// Fetch ratings, translating any supplier failure into [`Error::DataSource`]
pub fn fetch_ratings(source: &dyn RatingSource) -> Result<Vec<Rating>> {
    source.fetch().map_err(Error::DataSource)
}

/// Fixed rating collection, used by one-shot training
#[derive(Debug, Clone, Default)]
pub struct StaticRatings {
    ratings: Vec<Rating>,
}

impl StaticRatings {
    pub fn new(ratings: Vec<Rating>) -> Self {
        Self { ratings }
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

impl RatingSource for StaticRatings {
    fn fetch(&self) -> std::result::Result<Vec<Rating>, BoxError> {
        Ok(self.ratings.clone())
    }
}

/// Ratings re-read from a JSON file on every fetch
///
/// Accepts either a JSON array of ratings or JSON lines (one rating object
/// per line, blank lines ignored).
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RatingSource for JsonFileSource {
    fn fetch(&self) -> std::result::Result<Vec<Rating>, BoxError> {
        let content = std::fs::read_to_string(&self.path).map_err(recrank_common::Error::Io)?;
        let ratings = parse_ratings(&content)?;
        debug!(path = %self.path.display(), count = ratings.len(), "Read ratings file");
        Ok(ratings)
    }
}

/// Parse a JSON array or JSON-lines document into ratings
pub fn parse_ratings(content: &str) -> recrank_common::Result<Vec<Rating>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Rating>(line).map_err(|e| {
                recrank_common::Error::Parse(format!("line {}: {}", idx + 1, e))
            })
        })
        .collect()
}
