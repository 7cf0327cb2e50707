//! Integration and end-to-end tests for partfs.
//!
//! This crate provides:
//! - A disk image builder producing DOS and GPT labeled images
//! - A harness bundling an image with a device session
//! - Integration tests for table reading, metadata and region I/O

pub mod harness;
pub mod image;

pub use harness::TestDevice;
pub use image::{DiskImage, ImagePartition};
