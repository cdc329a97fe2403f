//! Length-Prefixed Frame Encoding
//!
//! Gives message boundaries to the byte-stream pipes between parent and worker.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Upper bound on a payload; a worker report is a few hundred bytes per task
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes in the little-endian `u32` length header
const HEADER_LEN: usize = 4;

/// Pipe buffer size on either side
const PIPE_BUFFER: usize = 16 * 1024;

/// Errors reading or writing a frame
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying pipe failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be archived
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The payload failed validation
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced or encoded size
        size: usize,
        /// Limit in force
        max: usize,
    },

    /// The frame is malformed
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer closed the pipe between frames
    #[error("End of stream")]
    EndOfStream,
}

fn check_len(len: usize) -> Result<usize, FrameError> {
    match len {
        0 => Err(FrameError::InvalidFrame("zero-length frame".to_string())),
        len if len > MAX_FRAME_SIZE => Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        }),
        len => Ok(len),
    }
}

/// Archive `message` into a payload
fn encode<T>(message: &T) -> Result<rkyv::AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<256>>,
{
    rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))
}

/// Validate a payload and rebuild the message from it
fn decode<T>(payload: &rkyv::AlignedVec) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    rkyv::check_archived_root::<T>(payload)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?
        .deserialize(&mut Infallible)
        .map_err(|e| FrameError::Deserialization(format!("{:?}", e)))
}

/// Write one frame and flush it.
///
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let payload = encode(message)?;
    let len = check_len(payload.len())?;

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    // The peer blocks on this frame
    writer.flush()?;
    Ok(())
}

/// Read one frame; a clean end of input before the header is `EndOfStream`
pub fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut header = [0u8; HEADER_LEN];
    if let Err(e) = reader.read_exact(&mut header) {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::EndOfStream,
            _ => FrameError::Io(e),
        });
    }
    let len = check_len(u32::from_le_bytes(header) as usize)?;

    // rkyv validates in place and needs an aligned buffer
    let mut payload = rkyv::AlignedVec::with_capacity(len);
    payload.resize(len, 0);
    reader.read_exact(&mut payload)?;

    decode(&payload)
}

/// Sending half of a pipe
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Buffer writes to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(PIPE_BUFFER, writer),
        }
    }

    /// Send one message and flush it
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }
}

/// Receiving half of a pipe
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Buffer reads from `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(PIPE_BUFFER, reader),
        }
    }

    /// Block until the next message arrives
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Whether bytes are already buffered, so a poll on the fd would under-report
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}
