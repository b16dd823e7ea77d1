//! Puzzle acquisition collaborator.

use std::collections::BTreeMap;
use std::future::Future;

use crate::puzzle::{Puzzle, PuzzleError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuzzleQuery {
    ById(String),
    /// `YYYY-MM-DD`.
    Date(String),
    Random,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no puzzle matches {0:?}")]
    NotFound(PuzzleQuery),
    #[error("puzzle source is empty")]
    Empty,
    #[error(transparent)]
    Invalid(#[from] PuzzleError),
    #[error("puzzle source unavailable: {0}")]
    Unavailable(String),
}

/// A puzzle together with the id it is cached and saved under.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPuzzle {
    pub id: String,
    pub puzzle: Puzzle,
}

pub trait PuzzleSource: Send + Sync {
    fn fetch(&self, query: &PuzzleQuery) -> impl Future<Output = Result<FetchedPuzzle, SourceError>> + Send;
}

/// Fixed in-memory catalogue keyed by puzzle id.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    puzzles: BTreeMap<String, Puzzle>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, puzzle: Puzzle) {
        self.puzzles.insert(id.into(), puzzle);
    }

    /// Parse, validate and add a JSON payload.
    pub fn insert_json(&mut self, id: impl Into<String>, json: &str) -> Result<(), SourceError> {
        let puzzle = Puzzle::from_json(json)?;
        self.insert(id, puzzle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.puzzles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puzzles.is_empty()
    }

    fn lookup(&self, query: &PuzzleQuery) -> Result<FetchedPuzzle, SourceError> {
        let found = match query {
            PuzzleQuery::ById(id) => self.puzzles.get_key_value(id),
            PuzzleQuery::Date(date) => self.puzzles.get_key_value(date).or_else(|| {
                self.puzzles
                    .iter()
                    .find(|(_, p)| p.metadata.date.as_deref() == Some(date.as_str()))
            }),
            PuzzleQuery::Random => {
                if self.puzzles.is_empty() {
                    return Err(SourceError::Empty);
                }
                let pick = (uuid::Uuid::new_v4().as_u128() % self.puzzles.len() as u128) as usize;
                self.puzzles.iter().nth(pick)
            }
        };
        found
            .map(|(id, puzzle)| FetchedPuzzle {
                id: id.clone(),
                puzzle: puzzle.clone(),
            })
            .ok_or_else(|| SourceError::NotFound(query.clone()))
    }
}

impl PuzzleSource for MemorySource {
    async fn fetch(&self, query: &PuzzleQuery) -> Result<FetchedPuzzle, SourceError> {
        let fetched = self.lookup(query)?;
        log::debug!("fetched puzzle {} for {query:?}", fetched.id);
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::puzzle_from_rows;

    fn source() -> MemorySource {
        let mut source = MemorySource::new();
        let mut dated = puzzle_from_rows(&["AB", "CD"]);
        dated.metadata.date = Some("2014-05-02".into());
        source.insert("nyt-1", dated);
        source.insert("2020-01-01", puzzle_from_rows(&["CAT", "O#O"]));
        source
    }

    #[tokio::test]
    async fn test_fetch_by_id() {
        let fetched = source().fetch(&PuzzleQuery::ById("nyt-1".into())).await.unwrap();
        assert_eq!(fetched.id, "nyt-1");
    }

    #[tokio::test]
    async fn test_fetch_by_date_uses_id_or_metadata() {
        let s = source();
        let by_meta = s.fetch(&PuzzleQuery::Date("2014-05-02".into())).await.unwrap();
        assert_eq!(by_meta.id, "nyt-1");
        let by_id = s.fetch(&PuzzleQuery::Date("2020-01-01".into())).await.unwrap();
        assert_eq!(by_id.puzzle.cols(), 3);
    }

    #[tokio::test]
    async fn test_missing_and_empty() {
        assert!(matches!(
            source().fetch(&PuzzleQuery::ById("nope".into())).await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            MemorySource::new().fetch(&PuzzleQuery::Random).await,
            Err(SourceError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_random_picks_known_puzzle() {
        let s = source();
        for _ in 0..10 {
            let fetched = s.fetch(&PuzzleQuery::Random).await.unwrap();
            assert!(fetched.id == "nyt-1" || fetched.id == "2020-01-01");
        }
    }

    #[test]
    fn test_insert_json_validates() {
        let mut s = MemorySource::new();
        assert!(matches!(s.insert_json("x", "{}"), Err(SourceError::Invalid(_))));
        assert!(s.is_empty());
    }
}
