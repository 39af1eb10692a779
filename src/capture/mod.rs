//! Durable artifact files for recorded matches

mod directory;
mod file;
#[cfg(test)]
mod tests;

pub use directory::{ArtifactPaths, ArtifactWriter};
pub use file::{partial_path_for, ArtifactFile, PARTIAL_SUFFIX};
