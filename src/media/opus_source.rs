use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rand::Rng;
use tokio::sync::mpsc;
use webrtc::rtp::{self, packetizer::Packetizer};

use crate::error::Error;
use crate::media::PacketReceiver;

/// samples per encoded frame; 2.5ms at 48kHz
const FRAME_SIZE: usize = 120;

/// Groups raw PCM samples into frames and encodes them with opus.
pub struct OpusFramer {
    encoder: opus::Encoder,
    // samples queued until a full frame is available
    pending: Vec<i16>,
    encoded: Vec<u8>,
    frame_size: usize,
}

impl OpusFramer {
    pub fn init(frame_size: usize, sample_rate: u32, channels: opus::Channels) -> Result<Self, Error> {
        let encoder = opus::Encoder::new(sample_rate, channels, opus::Application::Voip)
            .map_err(|e| Error::MediaAccess {
                reason: format!("failed to create opus encoder: {}", e),
            })?;
        Ok(Self {
            encoder,
            pending: Vec::with_capacity(frame_size),
            encoded: vec![0; frame_size],
            frame_size,
        })
    }

    /// queues one sample; returns an encoded frame once enough have arrived
    pub fn frame(&mut self, sample: i16) -> Option<Bytes> {
        self.pending.push(sample);
        if self.pending.len() < self.frame_size {
            return None;
        }
        let result = self
            .encoder
            .encode(self.pending.as_slice(), self.encoded.as_mut_slice());
        self.pending.clear();
        match result {
            Ok(size) => Some(Bytes::copy_from_slice(&self.encoded[..size])),
            Err(e) => {
                log::error!("opus encode failed: {}", e);
                None
            }
        }
    }
}

/// Captures the default input device and turns it into RTP packets suitable
/// for `RtpSourceCapture::with_microphone`.
///
/// Holds the cpal stream, so it is not `Send`; keep it on the thread that
/// created it and move only the packet receiver around.
pub struct MicrophoneSource {
    device: cpal::Device,
    stream: cpal::Stream,
}

impl MicrophoneSource {
    pub fn init(sample_rate: u32, channels: opus::Channels) -> Result<(Self, PacketReceiver), Error> {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel::<rtp::packet::Packet>();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();

        let mut framer = OpusFramer::init(FRAME_SIZE, sample_rate, channels)?;
        let ssrc: u32 = rand::thread_rng().gen();
        let payloader = Box::new(rtp::codecs::opus::OpusPayloader {});
        let sequencer = Box::new(rtp::sequence::new_random_sequencer());
        let mut packetizer = rtp::packetizer::new_packetizer(
            // i16 samples are 2 bytes each
            (FRAME_SIZE * 2) as usize,
            // dynamic payload type; remapped during negotiation anyway
            98,
            ssrc,
            payloader,
            sequencer,
            sample_rate,
        );

        tokio::spawn(async move {
            while let Some(bytes) = frame_rx.recv().await {
                match packetizer.packetize(&bytes, FRAME_SIZE as u32).await {
                    Ok(packets) => {
                        for packet in packets {
                            if packet_tx.send(packet).is_err() {
                                // capture worker went away, nothing left to feed
                                return;
                            }
                        }
                    }
                    Err(e) => log::error!("failed to packetize opus frame: {}", e),
                }
            }
        });

        let input_data_fn = move |data: &[i16], _: &cpal::InputCallbackInfo| {
            for sample in data {
                if let Some(bytes) = framer.frame(*sample) {
                    if frame_tx.send(bytes).is_err() {
                        return;
                    }
                }
            }
        };

        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(Error::MediaAccess {
            reason: "no default input device".into(),
        })?;
        let config = device.default_input_config().map_err(|e| Error::MediaAccess {
            reason: format!("failed to read input config: {}", e),
        })?;
        let stream = device
            .build_input_stream(&config.into(), input_data_fn, stream_err_fn)
            .map_err(|e| Error::MediaAccess {
                reason: format!("failed to open input stream: {}", e),
            })?;

        Ok((Self { device, stream }, packet_rx))
    }

    pub fn play(&self) -> Result<(), Error> {
        self.stream.play().map_err(|e| Error::MediaAccess {
            reason: format!("failed to start input stream: {}", e),
        })
    }

    pub fn device(&self) -> &cpal::Device {
        &self.device
    }
}

fn stream_err_fn(err: cpal::StreamError) {
    log::error!("input stream error: {}", err);
}
