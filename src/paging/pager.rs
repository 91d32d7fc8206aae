//! Paging runtime: one background task per subscription.
//!
//! A [`Pager`] spawns a task that owns the loaded pages and performs every
//! load in sequence. The returned [`PagingStream`] receives [`PagingData`]
//! snapshots; its [`PagingController`] sends commands (refresh, retry,
//! access).
//!
//! # Example
//!
//! ```ignore
//! let mut stream = Pager::new(PagingConfig::new(10), source).flow();
//! let controller = stream.controller();
//!
//! while let Some(data) = stream.next().await {
//!     render(&data.items);
//!     // Tell the pager where the user is; it loads more near the edges
//!     controller.access(data.items_before + data.items.len() - 1);
//! }
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::PagingError;
use super::source::{
  InitializeAction, LoadParams, LoadType, PagingConfig, PagingSource, PagingState, RemoteMediator,
};

/// State of one kind of load
#[derive(Debug, Clone)]
pub enum LoadState {
  NotLoading { end_of_pagination: bool },
  Loading,
  Error(Arc<PagingError>),
}

impl LoadState {
  const INCOMPLETE: LoadState = LoadState::NotLoading {
    end_of_pagination: false,
  };

  pub fn is_loading(&self) -> bool {
    matches!(self, LoadState::Loading)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, LoadState::Error(_))
  }

  pub fn end_of_pagination(&self) -> bool {
    matches!(
      self,
      LoadState::NotLoading {
        end_of_pagination: true
      }
    )
  }

  pub fn error(&self) -> Option<&PagingError> {
    match self {
      LoadState::Error(e) => Some(e.as_ref()),
      _ => None,
    }
  }
}

/// Load states for refresh, prepend and append
#[derive(Debug, Clone)]
pub struct LoadStates {
  pub refresh: LoadState,
  pub prepend: LoadState,
  pub append: LoadState,
}

impl Default for LoadStates {
  fn default() -> Self {
    Self {
      refresh: LoadState::INCOMPLETE,
      prepend: LoadState::INCOMPLETE,
      append: LoadState::INCOMPLETE,
    }
  }
}

impl LoadStates {
  pub fn get(&self, load_type: LoadType) -> &LoadState {
    match load_type {
      LoadType::Refresh => &self.refresh,
      LoadType::Prepend => &self.prepend,
      LoadType::Append => &self.append,
    }
  }

  fn set(&mut self, load_type: LoadType, state: LoadState) {
    match load_type {
      LoadType::Refresh => self.refresh = state,
      LoadType::Prepend => self.prepend = state,
      LoadType::Append => self.append = state,
    }
  }

  fn is_loading(&self) -> bool {
    self.refresh.is_loading() || self.prepend.is_loading() || self.append.is_loading()
  }
}

/// Load states of the paging source and, if present, the remote mediator
#[derive(Debug, Clone, Default)]
pub struct CombinedLoadStates {
  pub source: LoadStates,
  pub mediator: Option<LoadStates>,
}

impl CombinedLoadStates {
  /// Whether any load is in flight
  pub fn is_loading(&self) -> bool {
    self.source.is_loading() || self.mediator.as_ref().is_some_and(|m| m.is_loading())
  }

  /// Whether nothing more can be loaded after the last item
  pub fn append_exhausted(&self) -> bool {
    self.source.append.end_of_pagination()
      && self
        .mediator
        .as_ref()
        .map_or(true, |m| m.append.end_of_pagination())
  }

  /// The first failed load, if any
  pub fn error(&self) -> Option<&PagingError> {
    let mediator = self.mediator.iter().flat_map(|m| [&m.refresh, &m.prepend, &m.append]);
    [&self.source.refresh, &self.source.prepend, &self.source.append]
      .into_iter()
      .chain(mediator)
      .find_map(|s| s.error())
  }
}

/// Snapshot of a paged list
#[derive(Debug, Clone)]
pub struct PagingData<T> {
  pub items: Vec<T>,
  /// Absolute position of `items[0]`
  pub items_before: usize,
  pub load_states: CombinedLoadStates,
}

impl<T> Default for PagingData<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      items_before: 0,
      load_states: CombinedLoadStates::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
  Refresh,
  Retry,
  Access(usize),
}

/// Builder for a paged stream.
pub struct Pager<S: PagingSource> {
  config: PagingConfig,
  source: S,
  mediator: Option<Arc<dyn RemoteMediator<S::Key, S::Item>>>,
}

impl<S: PagingSource + 'static> Pager<S> {
  pub fn new(config: PagingConfig, source: S) -> Self {
    Self {
      config,
      source,
      mediator: None,
    }
  }

  /// Refill `source` from the network through `mediator` when it runs dry.
  pub fn with_remote_mediator(
    mut self,
    mediator: impl RemoteMediator<S::Key, S::Item> + 'static,
  ) -> Self {
    self.mediator = Some(Arc::new(mediator));
    self
  }

  /// Start loading. Dropping the returned stream stops the task.
  pub fn flow(self) -> PagingStream<S::Item> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(PagingData::default());

    let mediator_states = self.mediator.as_ref().map(|_| LoadStates::default());
    let task = PagerTask {
      state: PagingState::new(self.config),
      config: self.config,
      source: self.source,
      mediator: self.mediator,
      source_states: LoadStates::default(),
      mediator_states,
      snapshots: snapshot_tx,
    };

    PagingStream {
      controller: PagingController {
        commands: command_tx,
      },
      snapshots: snapshot_rx,
      task: tokio::spawn(task.run(command_rx)),
    }
  }
}

/// Handle to a running pager.
pub struct PagingStream<T> {
  controller: PagingController,
  snapshots: watch::Receiver<PagingData<T>>,
  task: JoinHandle<()>,
}

impl<T: Clone> PagingStream<T> {
  /// A handle for sending commands that outlives borrows of the stream.
  pub fn controller(&self) -> PagingController {
    self.controller.clone()
  }

  /// The latest snapshot, without waiting.
  pub fn snapshot(&self) -> PagingData<T> {
    self.snapshots.borrow().clone()
  }

  /// Wait for the next snapshot. Intermediate snapshots may be skipped.
  pub async fn next(&mut self) -> Option<PagingData<T>> {
    self.snapshots.changed().await.ok()?;
    Some(self.snapshots.borrow_and_update().clone())
  }

  /// Snapshots as a [`futures::Stream`]. The pager stops when it is dropped.
  pub fn into_stream(self) -> impl futures::Stream<Item = PagingData<T>> {
    futures::stream::unfold(self, |mut stream| async move {
      let data = stream.next().await?;
      Some((data, stream))
    })
  }
}

/// Sends commands to a running pager. Commands sent after the pager has
/// stopped are dropped.
#[derive(Debug, Clone)]
pub struct PagingController {
  commands: mpsc::UnboundedSender<Command>,
}

impl PagingController {
  /// Reload from scratch (through the mediator when there is one).
  pub fn refresh(&self) {
    self.send(Command::Refresh);
  }

  /// Re-issue every load that failed.
  pub fn retry(&self) {
    self.send(Command::Retry);
  }

  /// Report the absolute position the consumer is looking at.
  pub fn access(&self, position: usize) {
    self.send(Command::Access(position));
  }

  fn send(&self, command: Command) {
    let _ = self.commands.send(command);
  }
}

impl<T> Drop for PagingStream<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// The item under the anchor before a reload
struct AnchorItem<T> {
  item: T,
  /// Absolute position of `item`
  position: usize,
  anchor: usize,
}

struct PagerTask<S: PagingSource> {
  config: PagingConfig,
  source: S,
  mediator: Option<Arc<dyn RemoteMediator<S::Key, S::Item>>>,
  state: PagingState<S::Key, S::Item>,
  source_states: LoadStates,
  mediator_states: Option<LoadStates>,
  snapshots: watch::Sender<PagingData<S::Item>>,
}

impl<S: PagingSource> PagerTask<S> {
  async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut invalidations = self.source.invalidations();

    // Whatever is already there first, then the network
    self.load_source(LoadType::Refresh).await;
    if let Some(mediator) = self.mediator.clone() {
      if mediator.initialize().await == InitializeAction::LaunchInitialRefresh {
        self.load_remote(LoadType::Refresh).await;
      }
    }

    loop {
      tokio::select! {
        command = commands.recv() => match command {
          None => break,
          Some(Command::Refresh) => self.refresh().await,
          Some(Command::Retry) => self.retry().await,
          Some(Command::Access(position)) => {
            self.state.anchor_position = Some(position);
            self.fill_edges().await;
          }
        },
        Some(()) = changed(&mut invalidations) => {
          debug!("source invalidated, reloading");
          let anchor = self.anchor_item();
          self.load_source(LoadType::Refresh).await;
          if let Some(anchor) = anchor {
            self.follow(anchor);
          }
          self.fill_edges().await;
        }
      }
    }

    debug!("pager stopped");
  }

  fn anchor_item(&self) -> Option<AnchorItem<S::Item>> {
    let anchor = self.state.anchor_position?;
    Some(AnchorItem {
      item: self.state.closest_item_to_position(anchor)?.clone(),
      position: self.state.closest_position(anchor)?,
      anchor,
    })
  }

  /// Shift the anchor by as much as its item moved in the reload. Rows
  /// merged in front of the item (a remote prepend) push it back.
  fn follow(&mut self, anchor: AnchorItem<S::Item>) {
    let Some(position) = self.state.position_of(&anchor.item) else {
      return;
    };
    if position != anchor.position {
      let moved = (anchor.anchor + position).saturating_sub(anchor.position);
      debug!(from = anchor.anchor, to = moved, "anchor moved with its item");
      self.state.anchor_position = Some(moved);
    }
  }

  async fn refresh(&mut self) {
    if self.mediator.is_some() {
      // The commit invalidates the source, which reloads it
      self.load_remote(LoadType::Refresh).await;
    } else {
      self.load_source(LoadType::Refresh).await;
      self.fill_edges().await;
    }
  }

  async fn retry(&mut self) {
    for load_type in [LoadType::Refresh, LoadType::Prepend, LoadType::Append] {
      if self.source_states.get(load_type).is_error() {
        self.load_source(load_type).await;
      }
      let remote_failed = self
        .mediator_states
        .as_ref()
        .is_some_and(|states| states.get(load_type).is_error());
      if remote_failed {
        self.load_remote(load_type).await;
      }
    }
    self.fill_edges().await;
  }

  /// Keep loading while the anchor is within prefetch distance of an edge.
  async fn fill_edges(&mut self) {
    loop {
      let Some(anchor) = self.state.anchor_position else {
        return;
      };
      let start = self.state.leading_offset;
      let end = start + self.state.item_count();

      let mut progressed = false;
      if anchor + self.config.prefetch_distance >= end {
        progressed |= self.extend(LoadType::Append).await;
      }
      if anchor < start + self.config.prefetch_distance {
        progressed |= self.extend(LoadType::Prepend).await;
      }
      if !progressed {
        return;
      }
    }
  }

  /// Extend one edge from the source, or from the network once the source
  /// has nothing left on that side. Returns whether items were added.
  async fn extend(&mut self, load_type: LoadType) -> bool {
    if self.source_states.get(load_type).is_error() {
      return false;
    }

    let edge = match load_type {
      LoadType::Prepend => self.state.pages.first().map(|p| p.prev_key.is_some()),
      _ => self.state.pages.last().map(|p| p.next_key.is_some()),
    };
    if edge == Some(true) {
      let before = self.state.item_count();
      self.load_source(load_type).await;
      return self.state.item_count() > before;
    }

    let remote_ready = self.mediator_states.as_ref().is_some_and(|states| {
      matches!(
        states.get(load_type),
        LoadState::NotLoading {
          end_of_pagination: false
        }
      )
    });
    if remote_ready {
      // New rows arrive through invalidation
      self.load_remote(load_type).await;
    }
    false
  }

  async fn load_source(&mut self, load_type: LoadType) {
    let key = match load_type {
      LoadType::Refresh => self.source.refresh_key(&self.state),
      LoadType::Prepend => match self.state.pages.first().and_then(|p| p.prev_key.clone()) {
        Some(key) => Some(key),
        None => return,
      },
      LoadType::Append => match self.state.pages.last().and_then(|p| p.next_key.clone()) {
        Some(key) => Some(key),
        None => return,
      },
    };
    let load_size = match load_type {
      LoadType::Refresh => self.config.initial_load_size,
      _ => self.config.page_size,
    };

    self.source_states.set(load_type, LoadState::Loading);
    self.emit();

    let params = LoadParams {
      load_type,
      key: key.clone(),
      load_size,
    };
    match self.source.load(params).await {
      Ok(page) => {
        debug!(?load_type, ?key, count = page.items.len(), "page loaded");
        let reached_start = page.prev_key.is_none();
        let reached_end = page.next_key.is_none();
        match load_type {
          LoadType::Refresh => {
            self.state.leading_offset = page.items_before;
            self.state.pages = vec![page];
            self.source_states = LoadStates::default();
            self.source_states.set(
              LoadType::Prepend,
              LoadState::NotLoading {
                end_of_pagination: reached_start,
              },
            );
          }
          LoadType::Prepend => {
            self.state.leading_offset = self.state.leading_offset.saturating_sub(page.items.len());
            self.state.pages.insert(0, page);
            self.source_states.set(
              LoadType::Prepend,
              LoadState::NotLoading {
                end_of_pagination: reached_start,
              },
            );
          }
          LoadType::Append => self.state.pages.push(page),
        }
        if load_type != LoadType::Prepend {
          self.source_states.set(
            LoadType::Append,
            LoadState::NotLoading {
              end_of_pagination: reached_end,
            },
          );
        }
      }
      Err(e) => {
        warn!(?load_type, ?key, "load failed: {}", e);
        self.source_states.set(load_type, LoadState::Error(Arc::new(e)));
      }
    }

    self.emit();
  }

  async fn load_remote(&mut self, load_type: LoadType) {
    let (Some(mediator), Some(states)) = (self.mediator.clone(), self.mediator_states.as_mut())
    else {
      return;
    };

    states.set(load_type, LoadState::Loading);
    self.emit();

    let result = mediator.load(load_type, &self.state).await;

    let Some(states) = self.mediator_states.as_mut() else {
      return;
    };
    match result {
      Ok(result) => {
        let done = LoadState::NotLoading {
          end_of_pagination: result.end_of_pagination,
        };
        if load_type == LoadType::Refresh {
          states.refresh = LoadState::INCOMPLETE;
          states.prepend = done.clone();
          states.append = done;
        } else {
          states.set(load_type, done);
        }
      }
      Err(e) => {
        warn!(?load_type, "remote load failed: {}", e);
        states.set(load_type, LoadState::Error(Arc::new(e)));
      }
    }

    self.emit();
  }

  fn emit(&self) {
    let data = PagingData {
      items: self.state.items().cloned().collect(),
      items_before: self.state.leading_offset,
      load_states: CombinedLoadStates {
        source: self.source_states.clone(),
        mediator: self.mediator_states.clone(),
      },
    };
    self.snapshots.send_replace(data);
  }
}

/// Resolves on the next invalidation; never resolves without a receiver.
async fn changed(invalidations: &mut Option<watch::Receiver<u64>>) -> Option<()> {
  match invalidations {
    Some(rx) => rx.changed().await.ok(),
    None => std::future::pending().await,
  }
}
