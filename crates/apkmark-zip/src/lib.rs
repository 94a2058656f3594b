//! apkmark-zip: locate and edit the APK signing block
//!
//! # Overview
//! - `eocd`: find the end of central directory record and reject ZIP64
//! - `signing_block`: find the signing block in front of the central directory and parse its entries
//! - `editor`: insert or extract tagged entries while keeping every size and offset field consistent
//!
//! ```text
//! | ZIP entries | APK signing block | central directory | EOCD |
//!               ^ block offset      ^ directory offset  ^ record offset
//! ```

pub mod editor;
pub mod eocd;
pub mod signing_block;

#[doc(hidden)]
pub mod testing;

pub use editor::{
    extract_entry, has_v2_signature, insert_entry, read_channel, write_channel,
};
pub use eocd::{find_eocd, locate_eocd, EndOfDirectoryRecord};
pub use signing_block::{locate, locate_signing_block, SigningBlockEntry, SigningBlockRegion};
