//! apkmark-core: shared building blocks for the apkmark workspace
//!
//! # Overview
//! - `constants`: on-disk magic values, field offsets, and verity sizes
//! - `region`: randomly addressable byte stores (`ByteRegion`) and consumers (`DataSink`)
//! - `error`: the error taxonomy shared by every library crate
//! - `config`: `apkmark.toml` schema

pub mod config;
pub mod constants;
pub mod error;
pub mod region;

pub use error::{ApkmarkError, ApkmarkResult};
pub use region::{ByteRegion, DataSink, FileRegion, MemoryRegion, RegionSlice};
