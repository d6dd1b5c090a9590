//! Mach-O image classification
//!
//! Decides whether a candidate file is a fat container, a thin image, or
//! not a binary at all, and names the CPU architecture of each image.
//! Both concerns sit behind traits so the finder can be driven by fakes.

pub mod arch;
pub mod classify;

pub use arch::{ArchResolver, HostArchTable, OverrideResolver};
pub use classify::{Classification, ImageClassifier, ImageInfo, ImageRole, MachOClassifier};
