use crate::frame::{BoundarySignal, Frame};

/// Per-frame boundary classifier
///
/// The detector only consumes the verdict; how frames are classified is
/// up to the implementation.
pub trait BoundaryClassifier: Send + Sync {
    /// Classifier identifier for logs
    fn name(&self) -> &'static str;

    fn classify(&self, frame: &Frame) -> BoundarySignal;
}

/// Trusts the annotation carried by the frame stream
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotatedClassifier;

impl BoundaryClassifier for AnnotatedClassifier {
    fn name(&self) -> &'static str {
        "annotated"
    }

    fn classify(&self, frame: &Frame) -> BoundarySignal {
        frame.signal
    }
}
