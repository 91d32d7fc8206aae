use color_eyre::Report;
use thiserror::Error;

/// Failure of a single load attempt.
///
/// Running out of pages is not an error; it is reported as a successful
/// load with `end_of_pagination` set.
#[derive(Error, Debug)]
pub enum PagingError {
  /// The remote call failed (network, status code or response body).
  #[error("transport error: {0}")]
  Transport(Report),

  /// Reading from the cache failed.
  #[error("cache read failed: {0}")]
  CacheRead(Report),

  /// The merge transaction failed and was rolled back.
  #[error("cache transaction failed: {0}")]
  CacheTransaction(Report),
}
