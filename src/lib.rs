//! termchat-server: a multi-participant terminal video chat server.
//!
//! Clients send raw RGB frames and float PCM audio over a length-prefixed
//! framed TCP transport. For every connected client the server composites
//! the other participants' video into a mosaic, renders it as ANSI-colored
//! ASCII matched to that client's terminal capabilities, mixes everyone
//! else's audio, and streams the personalized result back.
//!
//! ## Modules
//!
//! - **protocol**: packet framing, typed payloads, validation
//! - **buffer**: payload pool, packet queues, video/audio rings
//! - **render**: palettes, color quantization, ANSI emission
//! - **video**: frame validation, scaling, mosaic composition
//! - **audio**: source registry and mix-excluding fan-out
//! - **client**: per-client record, global registry, session threads
//! - **server**: accept loop, reaper, stats timer, shutdown

pub mod audio;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod render;
pub mod server;
pub mod video;

pub use config::Cli;
pub use server::{RuntimeConfig, Server, ServerContext};
