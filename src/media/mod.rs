//! # Media Module
//!
//! Resolves remote media URLs to local temporary audio files so the job
//! executor can treat remote submissions like file submissions. Downloads
//! are streamed to disk, capped in size, and wrapped in an RAII guard that
//! removes the file again when the job is done with it.

pub mod retriever;

pub use retriever::{MediaRetriever, TempAudioFile};
