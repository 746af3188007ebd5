/// Output device backends
///
/// A backend opens the realtime output and wires it to the shared mixer. The
/// returned device lives on the engine's device thread and never crosses
/// threads, which is what lets it hold a `cpal::Stream`.
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::mixer::Mixer;
use super::{AudioError, DeviceState, SharedDeviceState};

pub trait OutputBackend: Send + Sync {
    /// Construct the output device. The device starts suspended.
    fn open(
        &self,
        mixer: Arc<Mutex<Mixer>>,
        state: SharedDeviceState,
    ) -> Result<Box<dyn OutputDevice>, AudioError>;
}

pub trait OutputDevice {
    fn sample_rate(&self) -> f32;
    fn resume(&mut self) -> Result<(), AudioError>;
    fn suspend(&mut self) -> Result<(), AudioError>;
}

/// Default host output through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        mixer: Arc<Mutex<Mixer>>,
        state: SharedDeviceState,
    ) -> Result<Box<dyn OutputDevice>, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0 as f32;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        log::info!(
            "opening output device {} ({} Hz, {} ch, {:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer, state)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer, state)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer, state)?,
            other => return Err(AudioError::UnsupportedSampleFormat(format!("{other:?}"))),
        };

        Ok(Box::new(CpalDevice {
            stream,
            sample_rate,
        }))
    }
}

struct CpalDevice {
    stream: Stream,
    sample_rate: f32,
}

impl OutputDevice for CpalDevice {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        self.stream.play()?;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), AudioError> {
        self.stream.pause()?;
        Ok(())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    state: SharedDeviceState,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| match mixer.lock() {
            Ok(mut mixer) => mixer.render(data, channels, |s| T::from_sample(s)),
            Err(_) => data.fill(T::EQUILIBRIUM),
        },
        move |err| {
            log::warn!("output stream error: {err}");
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = match err {
                cpal::StreamError::DeviceNotAvailable => DeviceState::Closed,
                _ => DeviceState::Suspended,
            };
        },
        None,
    )?;

    Ok(stream)
}
