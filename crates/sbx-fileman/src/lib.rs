//! sbx-fileman: the pipeline that turns a plaintext file into scattered
//! encrypted chunks and back.
//!
//! Upload: hash → shard → encrypt+tag per chunk → scatter through the
//! store client → assemble the reference → PGP-encrypt it to the owner.
//! Download runs the inverse, verifying every HMAC before any decryption
//! and the whole-file hash after reassembly. Delete walks the reference
//! and removes every chunk, reporting survivors.

pub mod pipeline;
pub mod state;

pub use pipeline::{FileManager, PipelineConfig, PipelineProgress};
pub use state::{ChunkLedger, ChunkState, RunState};
