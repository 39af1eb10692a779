//! Frame acquisition: stream codec, sources and boundary classification

mod classifier;
mod codec;
mod stream;

pub use classifier::{AnnotatedClassifier, BoundaryClassifier};
pub use codec::{FrameStreamReader, FrameStreamWriter, StreamHeader, MAX_FRAME_BYTES};
pub use stream::{open_source, ChannelFrameSource, FrameSource, StreamFrameSource};
