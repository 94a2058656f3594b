//! apkmark-verity: salted chunk digests and fs-verity Merkle trees
//!
//! # Overview
//! - `digester`: `ChunkDigester`, SHA-256 over `salt || 4096-byte window`, one digest per window
//! - `tree`: level-by-level tree construction, parallel over content regions with rayon
//! - `header`: the 64-byte fs-verity header prefixed to serialized tree data

pub mod digester;
pub mod header;
pub mod tree;

pub use digester::ChunkDigester;
pub use header::VerityHeader;
pub use tree::{
    build_verity_tree, build_verity_tree_with, tree_level_sizes, TreeOptions, VerityResult,
};
