//! Debounced keyword search.
//!
//! Each call waits out the debounce delay before dispatching its request.
//! Calls are numbered; a call that is no longer the newest when its delay
//! ends, or when its response arrives, reports `Superseded` and leaves the
//! results alone. The newest call therefore always wins, even if an older
//! request resolves after it.

use color_eyre::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// What a search call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome<T> {
  /// Results of the newest call
  Results(Vec<T>),
  /// A newer call started before this one finished
  Superseded,
}

impl<T> SearchOutcome<T> {
  pub fn results(self) -> Option<Vec<T>> {
    match self {
      SearchOutcome::Results(results) => Some(results),
      SearchOutcome::Superseded => None,
    }
  }

  pub fn is_superseded(&self) -> bool {
    matches!(self, SearchOutcome::Superseded)
  }
}

#[derive(Debug)]
struct SearchState<T> {
  keyword: String,
  results: Vec<T>,
  loading: bool,
}

#[derive(Debug)]
pub struct DebouncedSearch<T> {
  delay: Duration,
  min_chars: usize,
  generation: AtomicU64,
  state: Mutex<SearchState<T>>,
}

impl<T: Clone> DebouncedSearch<T> {
  pub fn new(delay: Duration, min_chars: usize) -> Self {
    Self {
      delay,
      min_chars,
      generation: AtomicU64::new(0),
      state: Mutex::new(SearchState {
        keyword: String::new(),
        results: Vec::new(),
        loading: false,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, SearchState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_current(&self, generation: u64) -> bool {
    self.generation.load(Ordering::SeqCst) == generation
  }

  /// Keyword of the newest call.
  pub fn keyword(&self) -> String {
    self.state().keyword.clone()
  }

  /// Results of the newest completed call.
  pub fn results(&self) -> Vec<T> {
    self.state().results.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state().loading
  }

  /// Run a search for `keyword`. Keywords shorter than the minimum (after
  /// trimming) resolve to no results without calling `fetch`.
  pub async fn search<F, Fut>(&self, keyword: &str, fetch: F) -> Result<SearchOutcome<T>>
  where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let keyword = keyword.trim().to_string();

    {
      let mut state = self.state();
      state.keyword = keyword.clone();
      if keyword.chars().count() < self.min_chars {
        state.results.clear();
        state.loading = false;
        return Ok(SearchOutcome::Results(Vec::new()));
      }
      state.loading = true;
    }

    tokio::time::sleep(self.delay).await;
    if !self.is_current(generation) {
      debug!(keyword = %keyword, "search superseded before dispatch");
      return Ok(SearchOutcome::Superseded);
    }

    let result = fetch(keyword.clone()).await;
    if !self.is_current(generation) {
      debug!(keyword = %keyword, "stale search response dropped");
      return Ok(SearchOutcome::Superseded);
    }

    let mut state = self.state();
    state.loading = false;
    let results = result?;
    state.results = results.clone();
    Ok(SearchOutcome::Results(results))
  }

  /// Supersede any call in flight and drop the results.
  pub fn clear(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
    let mut state = self.state();
    state.keyword.clear();
    state.results.clear();
    state.loading = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicU32;
  use std::sync::Arc;

  fn search() -> Arc<DebouncedSearch<String>> {
    Arc::new(DebouncedSearch::new(Duration::from_millis(300), 2))
  }

  #[tokio::test(start_paused = true)]
  async fn test_newer_call_within_delay_supersedes() {
    let search = search();
    let requests = Arc::new(AtomicU32::new(0));

    let first = {
      let (search, requests) = (search.clone(), requests.clone());
      tokio::spawn(async move {
        search
          .search("al", |kw| async move {
            requests.fetch_add(1, Ordering::SeqCst);
            Ok(vec![kw])
          })
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let counter = requests.clone();
    let second = search
      .search("alice", |kw| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![kw])
      })
      .await
      .unwrap();

    assert!(first.await.unwrap().unwrap().is_superseded());
    assert_eq!(second, SearchOutcome::Results(vec!["alice".to_string()]));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(search.results(), vec!["alice".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_stale_response_is_discarded() {
    let search = search();

    let slow = {
      let search = search.clone();
      tokio::spawn(async move {
        search
          .search("bo", |kw| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(vec![kw])
          })
          .await
      })
    };
    // Let the first call dispatch its request
    tokio::time::sleep(Duration::from_millis(400)).await;

    let fast = search
      .search("bob", |kw| async move { Ok(vec![kw]) })
      .await
      .unwrap();
    assert_eq!(fast.results(), Some(vec!["bob".to_string()]));

    assert!(slow.await.unwrap().unwrap().is_superseded());
    assert_eq!(search.results(), vec!["bob".to_string()]);
    assert!(!search.is_loading());
  }

  #[tokio::test(start_paused = true)]
  async fn test_short_keyword_skips_request() {
    let search = search();

    let outcome = search
      .search(" a ", |_| async { Err(eyre!("should not be called")) })
      .await
      .unwrap();

    assert_eq!(outcome, SearchOutcome::Results(Vec::new()));
    assert_eq!(search.keyword(), "a");
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_error_propagates() {
    let search = search();

    let result = search
      .search("carol", |_| async { Err(eyre!("Network connection error")) })
      .await;

    assert!(result.is_err());
    assert!(!search.is_loading());
  }
}
