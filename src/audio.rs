//! Audio output on a local sound device.
//!
//! [`RodioOutput`] plays live HTTP streams: the stream is downloaded in the
//! background by `stream-download`, decoded by `rodio` and queued on a
//! single [`Sink`]. Attaching a new stream clears the sink first, so at
//! most one station is ever audible.
//!
//! Loading happens on a task; its outcome is reported on the device event
//! channel returned by [`RodioOutput::open`].

use std::{
    io::BufReader,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, Sink};
use stream_download::{
    storage::{bounded::BoundedStorageProvider, memory::MemoryStorageProvider},
    Settings, StreamDownload,
};
use tokio::{sync::mpsc, task::JoinHandle};
use url::Url;

use crate::{
    error::{Error, Result},
    player::{Attachment, DeviceEvent, DeviceEventKind, Output},
};

/// Output on a `cpal` device through a `rodio` sink.
///
/// Holds the device stream, which must stay on the thread that opened it.
pub struct RodioOutput {
    /// Keeps the device open.
    _stream: OutputStream,
    sink: Arc<Sink>,

    /// Attachment that loading tasks may still append to.
    current: Arc<AtomicU64>,
    loaded: bool,

    task: Option<JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl RodioOutput {
    /// Size of the in-memory ring the live stream is downloaded into.
    /// About half a minute of audio at 128 kbps.
    pub const BUFFER_SIZE: NonZeroUsize = match NonZeroUsize::new(512 * 1024) {
        Some(size) => size,
        None => unreachable!(),
    };

    /// Opens the output device and returns the receiving end of its device
    /// events.
    ///
    /// `device` selects an output device by name; `None` picks the
    /// system default.
    ///
    /// # Errors
    ///
    /// Returns error if the device is not found or cannot be opened.
    pub fn open(device: Option<&str>) -> Result<(Self, mpsc::UnboundedReceiver<DeviceEvent>)> {
        let (stream, handle) = match device {
            None => OutputStream::try_default()?,
            Some(name) => {
                let device = cpal::default_host()
                    .output_devices()
                    .map_err(Error::unavailable)?
                    .find(|device| device.name().is_ok_and(|n| n == name))
                    .ok_or_else(|| Error::not_found(format!("audio device {name} not found")))?;
                OutputStream::try_from_device(&device)?
            }
        };

        let sink = Sink::try_new(&handle)?;
        sink.pause();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        info!(
            "opened audio output {}",
            device.unwrap_or("on default device")
        );

        Ok((
            Self {
                _stream: stream,
                sink: Arc::new(sink),
                current: Arc::new(AtomicU64::new(0)),
                loaded: false,
                task: None,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Names of the available output devices.
    ///
    /// # Errors
    ///
    /// Returns error if the audio host cannot enumerate its devices.
    pub fn devices() -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .output_devices()
            .map_err(Error::unavailable)?
            .filter_map(|device| device.name().ok())
            .collect();
        Ok(devices)
    }

    /// Downloads and decodes `url`, then queues it on the sink.
    ///
    /// Returns whether the stream is audible now. A stream that belongs to
    /// a superseded attachment is dropped without being queued.
    async fn load(
        url: Url,
        sink: &Sink,
        current: &AtomicU64,
        attachment: Attachment,
    ) -> Result<Option<bool>> {
        // Live streams never end, so only a bounded window is kept.
        let storage = BoundedStorageProvider::new(MemoryStorageProvider, Self::BUFFER_SIZE);
        let download = StreamDownload::new_http(url, storage, Settings::default()).await?;

        // Probing reads from the download, which blocks.
        let source =
            tokio::task::spawn_blocking(move || Decoder::new(BufReader::new(download))).await??;

        if current.load(Ordering::SeqCst) != attachment {
            return Ok(None);
        }

        sink.append(source);
        Ok(Some(!sink.is_paused()))
    }
}

impl Output for RodioOutput {
    fn attach(&mut self, attachment: Attachment, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_argument(format!(
                "unsupported stream scheme {}",
                url.scheme()
            )));
        }

        self.current.store(attachment, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }

        // `clear` also pauses the sink.
        self.sink.clear();
        self.sink.play();
        self.loaded = true;

        let send = {
            let event_tx = self.event_tx.clone();
            move |kind| {
                if let Err(e) = event_tx.send(DeviceEvent { attachment, kind }) {
                    error!("failed to send device event: {e}");
                }
            }
        };

        send(DeviceEventKind::Buffering);
        debug!("loading {url}");

        let sink = Arc::clone(&self.sink);
        let current = Arc::clone(&self.current);
        self.task = Some(tokio::spawn(async move {
            match Self::load(url, &sink, &current, attachment).await {
                Ok(Some(audible)) => {
                    if audible {
                        send(DeviceEventKind::Started);
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    send(DeviceEventKind::Failed(e.to_string()));
                    return;
                }
            }

            // Live streams only end when the connection breaks.
            let waiter = Arc::clone(&sink);
            if tokio::task::spawn_blocking(move || waiter.sleep_until_end())
                .await
                .is_ok()
                && current.load(Ordering::SeqCst) == attachment
            {
                send(DeviceEventKind::Failed("stream ended".to_owned()));
            }
        }));

        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(Error::failed_precondition("no stream attached"));
        }

        self.sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_buffer_holds_seconds_not_hours() {
        // 128 kbps is 16 KiB per second.
        let seconds = RodioOutput::BUFFER_SIZE.get() / (16 * 1024);
        assert!((10..=120).contains(&seconds), "{seconds} s buffered");
    }
}
