use std::sync::Arc;

use spin::Mutex;
use thiserror::Error;

/// Bytes per output sample (16-bit mono).
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink is not open")]
    NotOpen,
    #[error("sink is closed")]
    Closed,
    #[error("failed to open sink: {0}")]
    Open(String),
    #[error("audio device error: {0}")]
    Device(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination of the rendered PCM stream: 16-bit signed, little-endian, mono.
///
/// `write` blocks until the sink has accepted the whole block; the renderer
/// relies on that to run at the sample rate.
pub trait AudioSink: Send {
    /// Prepare the sink for `sample_rate` with a buffer of `buffer_size` bytes.
    fn open(&mut self, sample_rate: u32, buffer_size: usize) -> SinkResult<()>;

    /// Write a block of PCM bytes. Returns the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> SinkResult<usize>;

    /// Free space in the sink's buffer, in bytes.
    fn available(&self) -> usize;

    /// Size of the sink's buffer, in bytes.
    fn buffer_size(&self) -> usize;

    fn start(&mut self) -> SinkResult<()>;

    fn stop(&mut self) -> SinkResult<()>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn open(&mut self, sample_rate: u32, buffer_size: usize) -> SinkResult<()> {
        (**self).open(sample_rate, buffer_size)
    }

    fn write(&mut self, bytes: &[u8]) -> SinkResult<usize> {
        (**self).write(bytes)
    }

    fn available(&self) -> usize {
        (**self).available()
    }

    fn buffer_size(&self) -> usize {
        (**self).buffer_size()
    }

    fn start(&mut self) -> SinkResult<()> {
        (**self).start()
    }

    fn stop(&mut self) -> SinkResult<()> {
        (**self).stop()
    }
}

/// Shared view of what a [`MemorySink`] has captured.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn byte_len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn sample_len(&self) -> usize {
        self.byte_len() / BYTES_PER_SAMPLE
    }

    /// Decoded samples captured so far.
    pub fn samples(&self) -> Vec<i16> {
        self.bytes
            .lock()
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}

/// Offline sink that keeps everything written to it.
///
/// Drains instantly, so it reports no free space and never looks starved.
/// With a sample limit it closes once the limit is reached, which ends a
/// renderer thread writing into it.
#[derive(Debug)]
pub struct MemorySink {
    capture: Capture,
    buffer_size: usize,
    limit_bytes: Option<usize>,
    open: bool,
    running: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            capture: Capture::default(),
            buffer_size: 0,
            limit_bytes: None,
            open: false,
            running: false,
        }
    }

    /// Close after `samples` samples have been captured.
    pub fn with_limit(mut self, samples: usize) -> Self {
        self.limit_bytes = Some(samples * BYTES_PER_SAMPLE);
        self
    }

    pub fn capture(&self) -> Capture {
        self.capture.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MemorySink {
    fn open(&mut self, _sample_rate: u32, buffer_size: usize) -> SinkResult<()> {
        self.buffer_size = buffer_size;
        self.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> SinkResult<usize> {
        if !self.open {
            return Err(SinkError::NotOpen);
        }
        let mut captured = self.capture.bytes.lock();
        let accepted = match self.limit_bytes {
            Some(limit) => {
                let room = limit.saturating_sub(captured.len());
                if room == 0 {
                    return Err(SinkError::Closed);
                }
                bytes.len().min(room)
            }
            None => bytes.len(),
        };
        captured.extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    fn available(&self) -> usize {
        0
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn start(&mut self) -> SinkResult<()> {
        if !self.open {
            return Err(SinkError::NotOpen);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> SinkResult<()> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_requires_open() {
        let mut sink = MemorySink::new();
        assert_eq!(sink.write(&[0, 0]), Err(SinkError::NotOpen));
        assert_eq!(sink.start(), Err(SinkError::NotOpen));

        sink.open(44_100, 2048).unwrap();
        sink.start().unwrap();
        assert!(sink.is_running());
        assert_eq!(sink.buffer_size(), 2048);
        assert_eq!(sink.available(), 0);
    }

    #[test]
    fn test_samples_decode_little_endian() {
        let mut sink = MemorySink::new();
        let capture = sink.capture();
        sink.open(44_100, 2048).unwrap();

        let mut bytes = Vec::new();
        for s in [0i16, 1, -1, i16::MAX, i16::MIN] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(sink.write(&bytes).unwrap(), 10);
        assert_eq!(capture.samples(), vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_limit_closes_sink() {
        let mut sink = MemorySink::new().with_limit(3);
        let capture = sink.capture();
        sink.open(44_100, 2048).unwrap();

        assert_eq!(sink.write(&[1, 0, 2, 0]).unwrap(), 4);
        assert_eq!(sink.write(&[3, 0, 4, 0]).unwrap(), 2);
        assert_eq!(sink.write(&[5, 0]), Err(SinkError::Closed));
        assert_eq!(capture.samples(), vec![1, 2, 3]);
    }
}
