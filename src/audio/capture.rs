//! Audio capture on a dedicated thread, feeding an [`IngestBuffer`]

use super::ingest::IngestBuffer;
use super::sources::LiveSource;
use super::{AudioConfig, Sample};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device {device} does not support {sample_rate} Hz capture")]
    UnsupportedSampleRate { device: String, sample_rate: u32 },

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Commands sent to the audio thread
enum AudioCommand {
    Stop,
}

/// Outcome of stream startup, reported by the audio thread
type Ready = Result<String, CaptureError>;

/// Audio capture handle
///
/// The cpal stream is not `Send` on every platform, so it never leaves the
/// audio thread. The handle only keeps the command channel, the join handle
/// and the shared ingest buffer.
pub struct AudioCaptureHandle {
    /// Command sender to control the audio thread
    command_tx: mpsc::Sender<AudioCommand>,

    /// Handle to the audio thread
    thread_handle: Option<JoinHandle<()>>,

    /// Mono samples written by the stream callback
    ingest: Arc<IngestBuffer>,

    sample_rate: u32,
    device_name: String,
}

impl AudioCaptureHandle {
    /// Open the configured input device and start streaming into a new
    /// ingest buffer. Returns once the stream is running, or with the error
    /// that kept it from starting.
    pub fn new(config: &AudioConfig) -> Result<Self, CaptureError> {
        let ingest = Arc::new(IngestBuffer::new(config.ingest_capacity()));
        log::debug!("Ingest buffer: {} samples", ingest.capacity());
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Ready>(1);

        let device = config.device.clone();
        let sample_rate = config.sample_rate;
        let buffer = ingest.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_audio_thread(device, sample_rate, buffer, command_rx, ready_tx))
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(CaptureError::ThreadError(
                    "audio thread exited during startup".to_string(),
                ));
            }
        };

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
            ingest,
            sample_rate,
            device_name,
        })
    }

    /// A chunk source reading this capture's fresh samples
    pub fn source(&self) -> LiveSource {
        LiveSource::new(self.ingest.clone(), self.sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop the audio capture
    pub fn stop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioCaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert any cpal sample type to normalized f32.
pub fn normalize<T>(data: &[T]) -> Vec<Sample>
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    data.iter().map(|s| cpal::Sample::from_sample(*s)).collect()
}

/// Average interleaved frames down to mono. A trailing partial frame is
/// averaged over the channels it has.
pub fn downmix(data: &[Sample], channels: usize) -> Vec<Sample> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<Sample>() / frame.len() as Sample)
        .collect()
}

/// Body of the `audio-capture` thread: open the stream, report startup,
/// then hold the stream until told to stop.
fn run_audio_thread(
    device: Option<String>,
    sample_rate: u32,
    buffer: Arc<IngestBuffer>,
    command_rx: mpsc::Receiver<AudioCommand>,
    ready_tx: mpsc::SyncSender<Ready>,
) {
    let stream = match open_stream(device.as_deref(), sample_rate, buffer) {
        Ok((stream, name)) => {
            let _ = ready_tx.send(Ok(name));
            stream
        }
        Err(e) => {
            log::error!("Audio thread error: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Block until stopped; a dropped handle disconnects the channel.
    match command_rx.recv() {
        Ok(AudioCommand::Stop) => log::info!("Audio capture stopping"),
        Err(_) => log::info!("Audio capture channel disconnected"),
    }
    drop(stream);
    log::info!("Audio capture stopped");
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    buffer: Arc<IngestBuffer>,
) -> Result<(cpal::Stream, String), CaptureError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let config = select_config(&device, &name, sample_rate)?;
    let channels = config.channels() as usize;
    let format = config.sample_format();
    log::info!(
        "Audio capture: {} ({} Hz, {} channels, {:?})",
        name,
        sample_rate,
        channels,
        format
    );

    let stream_config: StreamConfig = config.into();
    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, buffer, channels),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, buffer, channels),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, buffer, channels),
        other => {
            return Err(CaptureError::ConfigError(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| CaptureError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::PlayError(e.to_string()))?;

    log::info!("Audio capture started");
    Ok((stream, name))
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, CaptureError> {
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::ConfigError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string())),
        None => host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice),
    }
}

/// Pick an input config that runs at exactly `sample_rate`, preferring
/// float samples and fewer channels.
fn select_config(
    device: &Device,
    device_name: &str,
    sample_rate: u32,
) -> Result<SupportedStreamConfig, CaptureError> {
    let rate = SampleRate(sample_rate);
    let format_rank = |format: SampleFormat| match format {
        SampleFormat::F32 => 0,
        SampleFormat::I16 => 1,
        _ => 2,
    };

    device
        .supported_input_configs()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .filter(|range| {
            matches!(
                range.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|range| (format_rank(range.sample_format()), range.channels()))
        .map(|range| range.with_sample_rate(rate))
        .ok_or_else(|| CaptureError::UnsupportedSampleRate {
            device: device_name.to_string(),
            sample_rate,
        })
}

/// Build audio stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    buffer: Arc<IngestBuffer>,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = downmix(&normalize(data), channels);
            buffer.write(&mono);
        },
        |err| {
            log::warn!("Audio stream error: {}", err);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_integer_formats_to_unit_range() {
        assert_eq!(normalize(&[0i16, i16::MIN]), vec![0.0, -1.0]);
        assert_eq!(normalize(&[16384i16]), vec![0.5]);
        assert_eq!(normalize(&[32768u16]), vec![0.0]);
        assert_eq!(normalize(&[0.25f32]), vec![0.25]);
    }

    #[test]
    fn downmix_averages_interleaved_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downmix_passes_mono_through() {
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn downmix_averages_a_partial_trailing_frame() {
        assert_eq!(downmix(&[0.25, 0.5, 0.75, 0.5], 3), vec![0.5, 0.5]);
    }

    #[test]
    fn capture_error_messages_name_the_device() {
        let err = CaptureError::UnsupportedSampleRate {
            device: "USB Mic".to_string(),
            sample_rate: 44100,
        };
        assert_eq!(err.to_string(), "Device USB Mic does not support 44100 Hz capture");
    }
}
