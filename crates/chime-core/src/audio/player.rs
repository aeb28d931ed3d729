//! Audio output backends for the notification tone
//!
//! Uses rodio for cross-platform audio playback. The rodio output stream is
//! not `Send`, so it lives on a dedicated audio thread; callers only push
//! requests through a channel and never wait for playback to finish.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::tone::Tone;
use super::AudioError;

/// How long `open` waits for the audio thread to report back.
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Seam between the gate and the actual sound device.
pub trait AudioBackend: Send {
    /// One-time device setup. Only invoked after a user interaction.
    fn open(&mut self) -> Result<(), AudioError>;

    /// Start device setup without waiting for it. Failures surface on a
    /// later `play`.
    fn open_in_background(&mut self) -> Result<(), AudioError> {
        self.open()
    }

    /// Queue the tone and return immediately.
    fn play(&mut self, tone: &Tone) -> Result<(), AudioError>;
}

/// Backend that accepts everything and produces no sound (headless hosts).
#[derive(Debug, Default)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn open(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn play(&mut self, _tone: &Tone) -> Result<(), AudioError> {
        Ok(())
    }
}

enum AudioRequest {
    Open(Sender<Result<(), String>>),
    Play(Tone),
}

enum DeviceState {
    Closed,
    /// Open request queued; the audio thread answers on this channel.
    Opening(Receiver<Result<(), String>>),
    Open,
}

/// rodio-backed output running on its own thread.
pub struct RodioBackend {
    tx: Option<Sender<AudioRequest>>,
    worker: Option<JoinHandle<()>>,
    device: DeviceState,
}

impl RodioBackend {
    pub fn new() -> Self {
        Self {
            tx: None,
            worker: None,
            device: DeviceState::Closed,
        }
    }

    fn sender(&mut self) -> Result<&Sender<AudioRequest>, AudioError> {
        if self.tx.is_none() {
            let (tx, rx) = mpsc::channel();
            let worker = std::thread::Builder::new()
                .name("chime-audio".to_string())
                .spawn(move || audio_thread(rx))
                .map_err(|e| AudioError::Device(format!("Failed to spawn audio thread: {}", e)))?;
            self.tx = Some(tx);
            self.worker = Some(worker);
        }
        self.tx
            .as_ref()
            .ok_or_else(|| AudioError::Device("Audio thread unavailable".to_string()))
    }

    fn request_open(&mut self) -> Result<Receiver<Result<(), String>>, AudioError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender()?
            .send(AudioRequest::Open(reply_tx))
            .map_err(|_| AudioError::Device("Audio thread stopped".to_string()))?;
        Ok(reply_rx)
    }

    /// Picks up the answer to a background open, if it has arrived.
    fn poll_open(&mut self) -> Result<(), AudioError> {
        let DeviceState::Opening(reply) = &self.device else {
            return Ok(());
        };
        match reply.try_recv() {
            Ok(Ok(())) => self.device = DeviceState::Open,
            Ok(Err(e)) => {
                self.device = DeviceState::Closed;
                return Err(AudioError::Device(e));
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.device = DeviceState::Closed;
                return Err(AudioError::Device("Audio thread stopped".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for RodioBackend {
    fn open(&mut self) -> Result<(), AudioError> {
        let reply = match std::mem::replace(&mut self.device, DeviceState::Closed) {
            DeviceState::Open => {
                self.device = DeviceState::Open;
                return Ok(());
            }
            DeviceState::Opening(reply) => reply,
            DeviceState::Closed => self.request_open()?,
        };

        match reply.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.device = DeviceState::Open;
                Ok(())
            }
            Ok(Err(e)) => Err(AudioError::Device(e)),
            Err(_) => Err(AudioError::Device(
                "Timed out opening audio output".to_string(),
            )),
        }
    }

    fn open_in_background(&mut self) -> Result<(), AudioError> {
        if matches!(self.device, DeviceState::Closed) {
            self.device = DeviceState::Opening(self.request_open()?);
        }
        Ok(())
    }

    fn play(&mut self, tone: &Tone) -> Result<(), AudioError> {
        self.poll_open()?;
        if matches!(self.device, DeviceState::Closed) {
            return Err(AudioError::NotReady);
        }
        // While still opening, the thread handles this after the open.
        self.sender()?
            .send(AudioRequest::Play(tone.clone()))
            .map_err(|_| AudioError::Device("Audio thread stopped".to_string()))
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        // Closing the channel ends the audio thread's loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn audio_thread(rx: Receiver<AudioRequest>) {
    // Output stream handle (must be kept alive for playback)
    let mut output: Option<(OutputStream, OutputStreamHandle)> = None;

    while let Ok(request) = rx.recv() {
        match request {
            AudioRequest::Open(reply) => {
                let result = if output.is_some() {
                    Ok(())
                } else {
                    match OutputStream::try_default() {
                        Ok(pair) => {
                            output = Some(pair);
                            tracing::debug!("Audio output initialized");
                            Ok(())
                        }
                        Err(e) => {
                            tracing::warn!("Failed to initialize audio output: {}", e);
                            Err(format!("Failed to initialize audio output: {}", e))
                        }
                    }
                };
                let _ = reply.send(result);
            }
            AudioRequest::Play(tone) => {
                let Some((_, handle)) = output.as_ref() else {
                    tracing::warn!("Dropping tone: audio output not initialized");
                    continue;
                };
                match Sink::try_new(handle) {
                    Ok(sink) => {
                        sink.append(SamplesBuffer::new(1, tone.sample_rate, tone.samples.to_vec()));
                        sink.detach();
                    }
                    Err(e) => tracing::warn!("Failed to create audio sink: {}", e),
                }
            }
        }
    }
}
