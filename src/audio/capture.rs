// Audio capture for EchoNote Core
// Microphone stream producing fixed-size 16 kHz mono f32 frames

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, Sender};

use crate::constants::{CAPTURE_CHUNK_SAMPLES, CAPTURE_SAMPLE_RATE, MAX_CAPTURE_GAIN};
use crate::error::{CoreError, CoreResult};

/// Producer of fixed-size PCM frames. The realtime recorder only sees this
/// trait, so tests can inject synthetic audio.
pub trait AudioFrameSource: Send {
    /// Begin capture and return the frame channel.
    fn start(&mut self) -> CoreResult<Receiver<Vec<f32>>>;

    /// Stop capture and release the device. Idempotent.
    fn stop(&mut self);

    fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }
}

/// Microphone capture on a dedicated thread owning the cpal stream.
///
/// Samples are averaged to mono, multiplied by the gain (clamped to
/// [0, 10]), clipped to [-1, 1], and emitted as 512-sample frames (~32 ms).
pub struct AudioCapture {
    device_name: Option<String>,
    gain_bits: Arc<AtomicU32>,
    last_rms_bits: Arc<AtomicU32>,
    capturing: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioCapture {
    pub fn new(device_name: Option<String>, gain: f32) -> Self {
        let gain = gain.clamp(0.0, MAX_CAPTURE_GAIN);
        Self {
            device_name,
            gain_bits: Arc::new(AtomicU32::new(gain.to_bits())),
            last_rms_bits: Arc::new(AtomicU32::new(0f32.to_bits())),
            capturing: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Update the software gain applied to captured audio.
    pub fn set_gain(&self, gain: f32) {
        let clamped = gain.clamp(0.0, MAX_CAPTURE_GAIN);
        if clamped != gain {
            log::warn!("Gain value {} is out of range [0, {}]", gain, MAX_CAPTURE_GAIN);
        }
        self.gain_bits.store(clamped.to_bits(), Ordering::SeqCst);
        log::info!("Gain set to {}", clamped);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::SeqCst))
    }

    /// RMS of the most recent emitted frame.
    pub fn volume_level(&self) -> f32 {
        f32::from_bits(self.last_rms_bits.load(Ordering::SeqCst))
    }

    /// Available input device names.
    pub fn input_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                log::error!("Failed to access audio input devices: {}", e);
                Vec::new()
            }
        }
    }
}

impl AudioFrameSource for AudioCapture {
    fn start(&mut self) -> CoreResult<Receiver<Vec<f32>>> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(CoreError::validation("audio capture is already running"));
        }

        let (frame_tx, frame_rx) = bounded::<Vec<f32>>(256);
        let (ready_tx, ready_rx) = bounded::<CoreResult<()>>(1);

        let device_name = self.device_name.clone();
        let gain_bits = self.gain_bits.clone();
        let last_rms_bits = self.last_rms_bits.clone();
        let capturing = self.capturing.clone();

        // The cpal stream is not Send on every platform, so the stream lives
        // and dies on this thread.
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                capture_thread(
                    device_name,
                    gain_bits,
                    last_rms_bits,
                    capturing,
                    frame_tx,
                    ready_tx,
                )
            })
            .map_err(|e| CoreError::fatal(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                log::info!("Audio capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                self.capturing.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.capturing.store(false, Ordering::SeqCst);
                Err(CoreError::fatal("audio capture did not start in time"))
            }
        }
    }

    fn stop(&mut self) {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio capture thread panicked");
            }
        }
        log::info!("Audio capture stopped");
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    device_name: Option<String>,
    gain_bits: Arc<AtomicU32>,
    last_rms_bits: Arc<AtomicU32>,
    capturing: Arc<AtomicBool>,
    frame_tx: Sender<Vec<f32>>,
    ready_tx: Sender<CoreResult<()>>,
) {
    let host = cpal::default_host();

    let device = match &device_name {
        Some(name) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().map(|n| &n == name).unwrap_or(false))),
        None => host.default_input_device(),
    };

    let device = match device {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(CoreError::fatal(format!(
                "audio input device not found: {}",
                device_name.as_deref().unwrap_or("default")
            ))));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_CHUNK_SAMPLES * 2);

    let data_callback = {
        let capturing = capturing.clone();
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            if !capturing.load(Ordering::SeqCst) {
                return;
            }

            let gain = f32::from_bits(gain_bits.load(Ordering::SeqCst));
            pending.extend(data.iter().map(|&s| (s * gain).clamp(-1.0, 1.0)));

            while pending.len() >= CAPTURE_CHUNK_SAMPLES {
                let frame: Vec<f32> = pending.drain(..CAPTURE_CHUNK_SAMPLES).collect();
                let rms =
                    (frame.iter().map(|&x| x * x).sum::<f32>() / frame.len() as f32).sqrt();
                last_rms_bits.store(rms.to_bits(), Ordering::SeqCst);

                if frame_tx.try_send(frame).is_err() {
                    // Consumer is behind; dropping the frame beats blocking
                    // the audio callback.
                    log::debug!("Frame channel full, dropping capture frame");
                }
            }
        }
    };

    let stream = device.build_input_stream(
        &config,
        data_callback,
        |err| log::error!("Audio stream error: {}", err),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CoreError::fatal(format!(
                "failed to open input stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CoreError::fatal(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    log::info!("Audio capture loop started");

    while capturing.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    log::info!("Audio capture loop stopped");
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Frame source replaying a fixed script of frames, then silence.
    pub struct ScriptedSource {
        frames: Vec<Vec<f32>>,
        handle: Option<std::thread::JoinHandle<()>>,
        running: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        pub fn new(frames: Vec<Vec<f32>>) -> Self {
            Self {
                frames,
                handle: None,
                running: Arc::new(AtomicBool::new(false)),
            }
        }

        /// `count` frames of a constant-amplitude signal.
        pub fn tone_frames(count: usize, amplitude: f32) -> Vec<Vec<f32>> {
            (0..count)
                .map(|_| vec![amplitude; CAPTURE_CHUNK_SAMPLES])
                .collect()
        }

        pub fn silence_frames(count: usize) -> Vec<Vec<f32>> {
            (0..count).map(|_| vec![0.0; CAPTURE_CHUNK_SAMPLES]).collect()
        }
    }

    impl AudioFrameSource for ScriptedSource {
        fn start(&mut self) -> CoreResult<Receiver<Vec<f32>>> {
            let (tx, rx) = bounded(1024);
            let frames = self.frames.clone();
            let running = self.running.clone();
            running.store(true, Ordering::SeqCst);

            self.handle = Some(std::thread::spawn(move || {
                for frame in frames {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    if tx.send(frame).is_err() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                // Keep emitting silence until stopped, like a live mic.
                while running.load(Ordering::SeqCst) {
                    if tx
                        .send_timeout(vec![0.0; CAPTURE_CHUNK_SAMPLES], Duration::from_millis(5))
                        .is_err()
                    {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }));
            Ok(rx)
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
