//! Remote Torrent Server Library
//!
//! Mirrors the state of a peer-to-peer transfer session into a registry of
//! plain snapshots and exposes it over a small REST API.
//!
//! # Modules
//!
//! - `identifier`: 20-byte info hash and its hex/base32 codecs
//! - `descriptor`: magnet URIs and bencoded `.torrent` metainfo
//! - `session`: the transfer session boundary and an in-process implementation
//! - `transfer`: snapshot types and the merge that refreshes them
//! - `engine`: the registry and session reconfiguration
//! - `store`: persisted descriptors for restart recovery

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod transfer;
