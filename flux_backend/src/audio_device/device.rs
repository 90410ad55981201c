//! Live output through cpal.
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform) and pulls samples from a bounded lock-free queue. `write` pushes
//! into that queue and blocks while it is full, so the queue depth is the
//! sink's buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use tracing::{error, info, warn};

use super::enumeration::find_output_device;
use super::sink::{AudioSink, BYTES_PER_SAMPLE, SinkError, SinkResult};

enum StreamCommand {
    Play,
    Pause,
}

struct StreamThread {
    commands: Sender<StreamCommand>,
    handle: JoinHandle<()>,
}

/// Sink writing to an output device.
pub struct DeviceSink {
    device_name: Option<String>,
    queue: Option<Arc<ArrayQueue<i16>>>,
    failed: Arc<AtomicBool>,
    stream: Option<StreamThread>,
    buffer_size: usize,
}

impl DeviceSink {
    /// The default output device.
    pub fn new() -> Self {
        Self::with_device(None)
    }

    /// The output device whose name matches `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_device(Some(name.into()))
    }

    fn with_device(device_name: Option<String>) -> Self {
        Self {
            device_name,
            queue: None,
            failed: Arc::new(AtomicBool::new(false)),
            stream: None,
            buffer_size: 0,
        }
    }

    fn send(&self, command: StreamCommand) -> SinkResult<()> {
        let stream = self.stream.as_ref().ok_or(SinkError::NotOpen)?;
        stream.commands.send(command).map_err(|_| SinkError::Closed)
    }
}

impl Default for DeviceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for DeviceSink {
    fn open(&mut self, sample_rate: u32, buffer_size: usize) -> SinkResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let capacity = (buffer_size / BYTES_PER_SAMPLE).max(1);
        let queue = Arc::new(ArrayQueue::new(capacity));
        let (commands, command_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);

        let handle = thread::Builder::new()
            .name("flux-audio-device".to_string())
            .spawn({
                let queue = Arc::clone(&queue);
                let failed = Arc::clone(&self.failed);
                let device_name = self.device_name.clone();
                move || {
                    run_stream(
                        device_name.as_deref(),
                        sample_rate,
                        queue,
                        failed,
                        ready_tx,
                        command_rx,
                    )
                }
            })
            .map_err(|e| SinkError::Open(format!("failed to spawn device thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => return Err(SinkError::Open("device thread exited".to_string())),
        }

        self.queue = Some(queue);
        self.buffer_size = capacity * BYTES_PER_SAMPLE;
        self.stream = Some(StreamThread { commands, handle });
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> SinkResult<usize> {
        let queue = self.queue.as_ref().ok_or(SinkError::NotOpen)?;
        let backoff = Backoff::new();
        for pair in bytes.chunks_exact(BYTES_PER_SAMPLE) {
            let mut sample = i16::from_le_bytes([pair[0], pair[1]]);
            while let Err(rejected) = queue.push(sample) {
                if self.failed.load(Ordering::Relaxed) {
                    return Err(SinkError::Closed);
                }
                sample = rejected;
                if backoff.is_completed() {
                    thread::sleep(Duration::from_micros(250));
                } else {
                    backoff.snooze();
                }
            }
            backoff.reset();
        }
        Ok(bytes.len() - bytes.len() % BYTES_PER_SAMPLE)
    }

    fn available(&self) -> usize {
        self.queue
            .as_ref()
            .map(|q| (q.capacity() - q.len()) * BYTES_PER_SAMPLE)
            .unwrap_or(0)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn start(&mut self) -> SinkResult<()> {
        self.send(StreamCommand::Play)
    }

    fn stop(&mut self) -> SinkResult<()> {
        self.send(StreamCommand::Pause)
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            // closing the channel ends the stream thread
            drop(stream.commands);
            let _ = stream.handle.join();
        }
    }
}

fn run_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    queue: Arc<ArrayQueue<i16>>,
    failed: Arc<AtomicBool>,
    ready: Sender<SinkResult<()>>,
    commands: Receiver<StreamCommand>,
) {
    let stream = match build_stream(device_name, sample_rate, queue, Arc::clone(&failed)) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            error!(error = %e, "audio stream command failed");
        }
    }
    info!("audio device stream closed");
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    queue: Arc<ArrayQueue<i16>>,
    failed: Arc<AtomicBool>,
) -> SinkResult<cpal::Stream> {
    let device = find_output_device(device_name)?;
    let (config, format) = negotiate(&device, sample_rate)?;
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        channels = config.channels,
        sample_rate,
        ?format,
        "opening output stream"
    );

    match format {
        SampleFormat::I16 => make_stream::<i16>(&device, &config, queue, failed),
        SampleFormat::I32 => make_stream::<i32>(&device, &config, queue, failed),
        SampleFormat::U16 => make_stream::<u16>(&device, &config, queue, failed),
        SampleFormat::F32 => make_stream::<f32>(&device, &config, queue, failed),
        SampleFormat::F64 => make_stream::<f64>(&device, &config, queue, failed),
        other => Err(SinkError::Open(format!("unsupported sample format {other:?}"))),
    }
}

/// Pick a stream config at `sample_rate`, preferring 16-bit, then float,
/// then the fewest channels.
fn negotiate(device: &cpal::Device, sample_rate: u32) -> SinkResult<(StreamConfig, SampleFormat)> {
    let rank = |format: SampleFormat| match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::I32 | SampleFormat::U16 | SampleFormat::F64 => 2,
        _ => 3,
    };

    let best = device
        .supported_output_configs()
        .map_err(|e| SinkError::Open(format!("failed to query device configs: {e}")))?
        .filter(|range| {
            range.min_sample_rate().0 <= sample_rate && sample_rate <= range.max_sample_rate().0
        })
        .filter(|range| rank(range.sample_format()) < 3)
        .min_by_key(|range| (rank(range.sample_format()), range.channels()))
        .ok_or_else(|| SinkError::Open(format!("device does not support {sample_rate} Hz")))?;

    let format = best.sample_format();
    let config = best.with_sample_rate(cpal::SampleRate(sample_rate)).config();
    Ok((config, format))
}

fn make_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<ArrayQueue<i16>>,
    failed: Arc<AtomicBool>,
) -> SinkResult<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                // an empty queue plays silence; the renderer flags it as a glitch
                for frame in output.chunks_exact_mut(channels) {
                    let sample = queue.pop().unwrap_or(0);
                    frame.fill(T::from_sample(sample));
                }
            },
            move |err| {
                warn!(error = %err, "audio stream error");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    failed.store(true, Ordering::Relaxed);
                }
            },
            None,
        )
        .map_err(|e| SinkError::Open(format!("failed to build output stream: {e}")))
}
