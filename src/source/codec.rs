use crate::error::SourceError;
use crate::frame::{BoundarySignal, Frame};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Magic number for the frame stream format: "MCFS"
const STREAM_MAGIC: [u8; 4] = *b"MCFS";
const STREAM_VERSION: u32 = 1;
const STREAM_HEADER_SIZE: usize = 12;
const RECORD_HEADER_SIZE: usize = 21;

/// Upper bound for a single frame payload
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u32,
    /// Nominal frame rate (0 if unknown)
    pub fps: u32,
}

/// Decoder for the framed record stream
pub struct FrameStreamReader<R> {
    reader: R,
    header: StreamHeader,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameStreamReader<R> {
    /// Read and validate the stream header
    pub async fn open(mut reader: R) -> Result<Self, SourceError> {
        let mut header = [0u8; STREAM_HEADER_SIZE];
        let read = read_fully(&mut reader, &mut header).await?;
        if read < STREAM_HEADER_SIZE {
            return Err(SourceError::InvalidHeader {
                details: format!("stream ended after {} header bytes", read),
            });
        }

        if header[0..4] != STREAM_MAGIC {
            return Err(SourceError::InvalidHeader {
                details: "bad magic number".to_string(),
            });
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != STREAM_VERSION {
            return Err(SourceError::UnsupportedVersion { version });
        }
        let fps = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        debug!("Opened frame stream v{} at {} fps", version, fps);
        Ok(Self {
            reader,
            header: StreamHeader { version, fps },
            frames_read: 0,
        })
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next frame (None at end of stream)
    ///
    /// A record cut short by the end of the stream is logged and treated as
    /// end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let mut record = [0u8; RECORD_HEADER_SIZE];
        let read = read_fully(&mut self.reader, &mut record).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < RECORD_HEADER_SIZE {
            warn!(
                "Frame stream truncated inside a record header after {} frames",
                self.frames_read
            );
            return Ok(None);
        }

        let timestamp_nanos = u64::from_le_bytes(slice8(&record[0..8]));
        let frame_id = u64::from_le_bytes(slice8(&record[8..16]));
        let signal_byte = record[16];
        let data_len = u32::from_le_bytes([record[17], record[18], record[19], record[20]]);

        let signal = BoundarySignal::from_byte(signal_byte).ok_or(SourceError::InvalidSignal {
            frame_id,
            value: signal_byte,
        })?;

        if data_len > MAX_FRAME_BYTES {
            return Err(SourceError::OversizedFrame {
                frame_id,
                len: data_len,
            });
        }

        let mut data = vec![0u8; data_len as usize];
        let read = read_fully(&mut self.reader, &mut data).await?;
        if read < data.len() {
            warn!(
                "Frame stream truncated inside frame {} ({} of {} bytes)",
                frame_id, read, data_len
            );
            return Ok(None);
        }

        self.frames_read += 1;
        let timestamp = SystemTime::UNIX_EPOCH + Duration::from_nanos(timestamp_nanos);
        Ok(Some(Frame::new(frame_id, timestamp, data, signal)))
    }
}

/// Encoder for the framed record stream
pub struct FrameStreamWriter<W> {
    writer: W,
    frames_written: u64,
}

impl<W: AsyncWrite + Unpin> FrameStreamWriter<W> {
    /// Write the stream header
    pub async fn new(mut writer: W, fps: u32) -> Result<Self, SourceError> {
        let mut header = Vec::with_capacity(STREAM_HEADER_SIZE);
        header.extend_from_slice(&STREAM_MAGIC);
        header.extend_from_slice(&STREAM_VERSION.to_le_bytes());
        header.extend_from_slice(&fps.to_le_bytes());
        writer.write_all(&header).await?;

        Ok(Self {
            writer,
            frames_written: 0,
        })
    }

    /// Append one frame record
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), SourceError> {
        let data_len = u32::try_from(frame.data.len()).unwrap_or(u32::MAX);
        if data_len > MAX_FRAME_BYTES {
            return Err(SourceError::OversizedFrame {
                frame_id: frame.id,
                len: data_len,
            });
        }

        let timestamp_nanos = frame
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + frame.data.len());
        record.extend_from_slice(&timestamp_nanos.to_le_bytes());
        record.extend_from_slice(&frame.id.to_le_bytes());
        record.push(frame.signal.as_byte());
        record.extend_from_slice(&data_len.to_le_bytes());
        record.extend_from_slice(&frame.data);

        self.writer.write_all(&record).await?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and hand back the underlying writer
    pub async fn finish(mut self) -> Result<W, SourceError> {
        self.writer.flush().await?;
        Ok(self.writer)
    }
}

/// Fill `buf` unless the stream ends first; returns the bytes read
async fn read_fully<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, SourceError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn slice8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}
