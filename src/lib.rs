//! Harvest film records from saved ČSFD watchlist pages.
//!
//! Index pages on disk name the detail pages; those are fetched under a
//! concurrency cap with a random pause before each request, and every page
//! that arrives is parsed into a [`parser::Record`].

pub mod error;
pub mod fetcher;
pub mod index;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod settings;
