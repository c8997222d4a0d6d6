pub mod backend;
pub mod capture;
pub mod cpal_backend;
pub mod file;
pub mod pcm;
pub mod resample;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, CaptureEvent,
    CaptureEventSender, InputFormat, SampleCallback,
};
pub use capture::{
    CaptureConfig, CaptureCounters, CapturePipeline, DropReason, FrameSink, SendOutcome,
};
pub use cpal_backend::{list_input_devices, list_output_devices, CpalBackend, DeviceInfo};
pub use file::{AudioFile, FileBackend};
pub use pcm::{encode_block, encode_sample, frame_to_bytes, FrameAssembler, DEFAULT_BLOCK_SIZE, SAMPLE_RATE};
