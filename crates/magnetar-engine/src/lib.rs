#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! In-memory swarm engine for Magnetar.
//!
//! Locators resolve against a catalog of simulated torrents (or, when explicitly
//! enabled, generated stand-in content) and each session is driven by a worker task
//! that emits the usual metadata, progress, completion and error events. The
//! production engine lives in `magnetar-rqbit`; both plug in through
//! [`magnetar_core::SwarmEngine`].

/// Simulated torrent descriptions and deterministic content.
pub mod catalog;
mod command;
/// Transfer pacing.
pub mod types;
mod worker;

mod adapter;

pub use adapter::{SimulatedEngine, SimulatedHandle};
pub use catalog::{SimulatedFile, SimulatedTorrent, content_byte};
pub use types::SimulationConfig;
