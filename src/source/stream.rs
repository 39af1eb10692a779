use super::classifier::{AnnotatedClassifier, BoundaryClassifier};
use super::codec::FrameStreamReader;
use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Supplier of classified frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Source description for logs
    fn describe(&self) -> String;
}

/// Frame source decoding the framed record stream from any async reader
pub struct StreamFrameSource<R> {
    reader: FrameStreamReader<R>,
    classifier: Box<dyn BoundaryClassifier>,
    label: String,
}

impl<R: AsyncRead + Unpin + Send> StreamFrameSource<R> {
    pub async fn new(reader: R, label: &str) -> Result<Self, SourceError> {
        let reader = FrameStreamReader::open(reader).await?;
        info!(
            "Frame source '{}' opened ({} fps)",
            label,
            reader.header().fps
        );

        Ok(Self {
            reader,
            classifier: Box::new(AnnotatedClassifier),
            label: label.to_string(),
        })
    }

    /// Replace the classifier applied to every decoded frame
    pub fn with_classifier(mut self, classifier: Box<dyn BoundaryClassifier>) -> Self {
        debug!(
            "Frame source '{}' using classifier '{}'",
            self.label,
            classifier.name()
        );
        self.classifier = classifier;
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for StreamFrameSource<R> {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match self.reader.next_frame().await? {
            Some(mut frame) => {
                frame.signal = self.classifier.classify(&frame);
                Ok(Some(frame))
            }
            None => {
                info!(
                    "Frame source '{}' ended after {} frames",
                    self.label,
                    self.reader.frames_read()
                );
                Ok(None)
            }
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Open the configured source: `-` reads stdin, anything else is a file or FIFO
pub async fn open_source(path: &str) -> Result<Box<dyn FrameSource>, SourceError> {
    if path == "-" {
        let source = StreamFrameSource::new(BufReader::new(tokio::io::stdin()), "stdin").await?;
        return Ok(Box::new(source));
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| SourceError::Open {
            path: path.to_string(),
            source,
        })?;
    let source = StreamFrameSource::new(BufReader::new(file), path).await?;
    Ok(Box::new(source))
}

/// Frame source fed through a channel
pub struct ChannelFrameSource {
    receiver: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    pub fn new(receiver: mpsc::Receiver<Frame>) -> Self {
        Self { receiver }
    }

    /// Create a bounded channel and the source reading from it
    pub fn channel(capacity: usize) -> (mpsc::Sender<Frame>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self::new(receiver))
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.receiver.recv().await)
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}
