#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! Session lifecycle, engine event ingestion, file selection, streaming and
//! idle-session cleanup for the Magnetar streaming service.
//!
//! Layout:
//! - `model.rs`, `locator.rs`: session records and locator parsing.
//! - `engine.rs`: the swarm engine seam and its event vocabulary.
//! - `registry.rs`, `manager.rs`, `ingestor.rs`: the session store and its writers.
//! - `selector.rs`, `source.rs`, `remote.rs`, `transcode.rs`, `pipeline.rs`: streaming.
//! - `scheduler.rs`, `clock.rs`: idle eviction.

pub mod clock;
pub mod engine;
pub mod error;
pub mod ingestor;
pub mod locator;
pub mod manager;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod selector;
pub mod source;
pub mod transcode;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    EVENT_CHANNEL_CAPACITY, EngineEvent, EngineHandle, EngineSession, EngineStart, FileEntry,
    ProgressSample, ReleaseOptions, SwarmEngine,
};
pub use error::{SessionError, SessionResult, StreamError};
pub use ingestor::{EventIngestor, apply_event};
pub use locator::{Locator, normalize_session_id, placeholder_name};
pub use manager::{AddOutcome, SessionManager};
pub use model::{
    AUDIO_EXTENSIONS, NewSession, Session, SessionFile, SessionSnapshot, SessionStatus,
    VIDEO_EXTENSIONS,
};
pub use pipeline::{DeliveryMode, MediaStream, StreamPipeline, content_type_for};
pub use registry::{Detached, Insertion, SessionRegistry};
pub use remote::RemoteSource;
pub use scheduler::{CleanupScheduler, SchedulerHandle};
pub use selector::select_best_file;
pub use source::{
    ByteRange, ByteStream, SourceError, SourceResponse, SourceStatus, respond_with_range,
};
pub use transcode::{ProcessTranscoder, TranscodeError, Transcoder};
