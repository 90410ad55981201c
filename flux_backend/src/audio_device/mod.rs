//! Destinations for the rendered PCM stream.

#[cfg(feature = "device")]
pub mod device;
#[cfg(feature = "device")]
pub mod enumeration;
pub mod sink;

#[cfg(feature = "device")]
pub use device::DeviceSink;
#[cfg(feature = "device")]
pub use enumeration::{OutputDeviceInfo, list_output_devices};
pub use sink::{AudioSink, BYTES_PER_SAMPLE, Capture, MemorySink, SinkError, SinkResult};
