//! Audio ingress task: jitter buffer → energy meter → endpointing.
//!
//! Consumes decoded frames from the WS reader, reorders and conceals
//! through the jitter buffer, runs VAD and endpointing on the ordered
//! stream, and forwards every ordered frame to the ASR adapter. The
//! ASR send is a bounded-channel await — when the recognizer falls
//! behind, pressure propagates here instead of dropping frames.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use invorto_domain::audio::{AudioFrame, SampleRate};
use invorto_domain::config::SessionConfig;
use invorto_media::{Endpointer, EnergyMeter, JitterBuffer, TurnSignal};

use super::SessionEvent;

pub struct IngressArgs {
    pub cfg: SessionConfig,
    pub rate: SampleRate,
    /// Decoded frames from the WS reader.
    pub raw_rx: mpsc::Receiver<AudioFrame>,
    /// Ordered frames into the ASR adapter.
    pub asr_frames: mpsc::Sender<AudioFrame>,
    /// Boundary/VAD events to the supervisor.
    pub events: mpsc::Sender<SessionEvent>,
    /// Word counts committed by ASR finals (fed back by the supervisor).
    pub words_rx: mpsc::Receiver<usize>,
    pub cancel: CancellationToken,
}

pub async fn run_ingress(args: IngressArgs) {
    let IngressArgs {
        cfg,
        rate,
        mut raw_rx,
        asr_frames,
        events,
        mut words_rx,
        cancel,
    } = args;

    let mut jitter = JitterBuffer::new(cfg.jitter.clone(), rate.as_hz());
    let mut meter = EnergyMeter::new(cfg.vad.clone(), rate.as_hz());
    let mut endpointer = Endpointer::new(cfg.endpointing.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            words = words_rx.recv() => {
                match words {
                    Some(words) => endpointer.commit_words(words),
                    // Supervisor gone; the session is unwinding.
                    None => break,
                }
            }

            frame = raw_rx.recv() => {
                let Some(frame) = frame else {
                    // Socket closed: drain what the buffer still holds.
                    for ordered in jitter.drain() {
                        if process_frame(
                            ordered, rate, &mut meter, &mut endpointer, &asr_frames, &events,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    break;
                };

                jitter.push(frame);
                while let Some(ordered) = jitter.pop_ready() {
                    if process_frame(
                        ordered, rate, &mut meter, &mut endpointer, &asr_frames, &events,
                    )
                    .await
                    .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    let stats = jitter.stats();
    tracing::debug!(
        delivered = stats.delivered,
        concealed = stats.concealed,
        duplicates = stats.duplicates_dropped,
        late = stats.late_dropped,
        "ingress pipeline finished"
    );
}

/// Analyze one ordered frame and forward it. Err means a downstream
/// channel closed and the pipeline should stop.
async fn process_frame(
    frame: AudioFrame,
    rate: SampleRate,
    meter: &mut EnergyMeter,
    endpointer: &mut Endpointer,
    asr_frames: &mpsc::Sender<AudioFrame>,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<(), ()> {
    let vad = meter.process(&frame);

    if meter.update_due(frame.timestamp) {
        events
            .send(SessionEvent::Vad {
                confidence: vad.confidence,
                rms_db: vad.rms_db,
                speaking: vad.speaking,
            })
            .await
            .map_err(drop)?;
    }

    let frame_ms = frame.duration_ms(rate);
    match endpointer.observe(vad.speaking, frame_ms) {
        TurnSignal::StartOfSpeech => {
            events
                .send(SessionEvent::TurnStarted)
                .await
                .map_err(drop)?;
        }
        TurnSignal::EndOfSpeech(reason) => {
            events
                .send(SessionEvent::TurnEnded(reason))
                .await
                .map_err(drop)?;
        }
        TurnSignal::None => {}
    }

    // Backpressure point: never drop, wait for the adapter.
    asr_frames.send(frame).await.map_err(drop)
}
