#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! BitTorrent engine for Magnetar backed by librqbit.
//!
//! # Design
//! - One librqbit [`librqbit::Session`] per process; each Magnetar session adds one torrent.
//! - A driver task per torrent resolves metadata, then polls statistics and turns
//!   them into ordered engine events.
//! - Byte reads go through librqbit file streams, which wait for and prioritise
//!   the pieces under the read position.

mod adapter;
mod convert;
/// Engine tuning.
pub mod types;

pub use adapter::{RqbitEngine, RqbitHandle};
pub use types::RqbitConfig;
