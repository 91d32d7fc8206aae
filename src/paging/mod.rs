//! Paged loading on top of the remote client and the cache.
//!
//! A [`Pager`] drives one `PagingSource` per subscription and, for the
//! cached list, a `RemoteMediator` that refills the cache from the network
//! whenever the source runs out of items at either edge.

pub mod cached;
mod error;
pub mod mediator;
pub mod pager;
pub mod search;
mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use pager::{Pager, PagingStream};
pub use source::PagingConfig;
