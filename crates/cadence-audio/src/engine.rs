//! Decode thread driving dequeue, decode, convert, and deliver.
//!
//! One [`AudioDecoder`] owns one thread. The thread holds the pipeline mutex
//! while it inspects the queue and releases it around decoding and sink calls,
//! so producers never wait on codec work. Its only suspension point is the
//! pipe's availability condition.

use crate::config::PipelineConfig;
use crate::negotiator::{FormatNegotiator, Negotiation};
use crate::pipe::MediaPipe;
use crate::resample::{ResamplerFactory, RubatoResampler};
use crate::sink::{DeliverOutcome, SinkAdapter, SinkFactory};
use cadence_core::{
    AudioFormat, AudioUnit, CodecHandle, DecodeOutput, DecodedFrame, Error, MediaBuf,
    MediaBufKind, MediaQueue, Result,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::MutexGuard;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Events held for a reader before further ones are dropped.
pub const EVENT_CAPACITY: usize = 64;

/// Factories for the pieces the decode thread builds for itself.
pub struct AudioBackend {
    /// Builds the sink on the decode thread.
    pub sink: SinkFactory,
    /// Builds a resampler on each format change. `None` uses
    /// [`RubatoResampler`] with the configured chunk size.
    pub resampler: Option<ResamplerFactory>,
}

impl AudioBackend {
    pub fn new(sink: SinkFactory) -> Self {
        Self {
            sink,
            resampler: None,
        }
    }

    #[must_use]
    pub fn with_resampler(mut self, resampler: ResamplerFactory) -> Self {
        self.resampler = Some(resampler);
        self
    }
}

/// Why a unit was dropped without reaching the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// The unit was flagged `skip`.
    Skipped,
    /// The unit belongs to a stream other than the selected one.
    StreamMismatch,
    /// The codec rejected the payload.
    DecodeError,
    /// Neither the frame nor the unit carried a sample rate.
    UnknownSampleRate,
}

/// Counters kept by the decode thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    pub units_decoded: u64,
    pub units_discarded: u64,
    pub decode_errors: u64,
    pub bytes_consumed: u64,
    pub chunks_delivered: u64,
    pub frames_delivered: u64,
    pub busy_retries: u64,
    pub reconfigurations: u64,
    pub clock_updates: u64,
}

/// Events emitted by the decode thread.
///
/// The channel holds [`EVENT_CAPACITY`] events; while it is full new events
/// are dropped. [`DecoderStats`] keeps the totals either way.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// Decoded input changed format and a new resampler is open.
    FormatChanged {
        input: AudioFormat,
        output: AudioFormat,
    },
    /// No resampler could be opened for this input; its audio is dropped.
    ResamplerUnavailable(AudioFormat),
    /// A unit was dropped.
    UnitDiscarded { reason: DiscardReason },
    /// The thread hit an unrecoverable error and is stopping.
    Fatal(String),
    /// The thread has stopped.
    Stopped(DecoderStats),
}

/// Handle to a running decode thread.
pub struct AudioDecoder {
    pipe: Arc<MediaPipe>,
    handle: Option<JoinHandle<Result<DecoderStats>>>,
    events: Receiver<DecoderEvent>,
}

impl AudioDecoder {
    /// Start the decode thread on `pipe`.
    pub fn spawn(pipe: Arc<MediaPipe>, backend: AudioBackend, config: PipelineConfig) -> Result<Self> {
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let thread_pipe = Arc::clone(&pipe);

        let handle = std::thread::Builder::new()
            .name("audio decoder".to_string())
            .spawn(move || {
                let AudioBackend { sink, resampler } = backend;
                let resampler = resampler
                    .unwrap_or_else(|| RubatoResampler::factory(config.resample_chunk_frames));

                // The sink is built here since device streams are not `Send`.
                let sink = match sink() {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("Failed to initialize audio sink: {e}");
                        let _ = event_tx.try_send(DecoderEvent::Fatal(e.to_string()));
                        let _ = event_tx.try_send(DecoderEvent::Stopped(DecoderStats::default()));
                        thread_pipe.close();
                        return Err(e);
                    }
                };

                DecodeLoop::new(thread_pipe, sink, resampler, config, event_tx).run()
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn decoder thread: {e}")))?;

        Ok(Self {
            pipe,
            handle: Some(handle),
            events: event_rx,
        })
    }

    /// Event stream of the decode thread.
    pub const fn events(&self) -> &Receiver<DecoderEvent> {
        &self.events
    }

    pub const fn pipe(&self) -> &Arc<MediaPipe> {
        &self.pipe
    }

    /// True once the thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread to stop on an `Exit` already queued.
    pub fn join(mut self) -> Result<DecoderStats> {
        self.wait()
    }

    /// Queue `Exit` behind everything already queued and wait for the
    /// thread to finish processing it.
    pub fn shutdown(mut self) -> Result<DecoderStats> {
        if !self.is_finished() {
            self.pipe.send_command(MediaBufKind::Exit)?;
        }
        self.wait()
    }

    fn wait(&mut self) -> Result<DecoderStats> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::Internal("Decoder thread already joined".to_string()))?;

        handle
            .join()
            .map_err(|_| Error::Internal("Decoder thread panicked".to_string()))?
    }
}

impl Drop for AudioDecoder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                // Jump the queue: stop without decoding the backlog.
                let _ = self.pipe.send_command_head(MediaBufKind::Exit);
            }
            if handle.join().is_err() {
                error!("Decoder thread panicked");
            }
        }
    }
}

/// State owned by the decode thread.
struct DecodeLoop {
    pipe: Arc<MediaPipe>,
    sink: Box<dyn SinkAdapter>,
    negotiator: FormatNegotiator,
    config: PipelineConfig,
    events: Sender<DecoderEvent>,
    stats: DecoderStats,
    /// Timestamp for the next delivered chunk, consumed once.
    pending_pts: Option<i64>,
    pending_epoch: u32,
    /// Last device delay reported by the sink, in microseconds.
    output_delay: i64,
    /// Codecs seen so far; reset on flush, finalized at exit.
    codecs: Vec<CodecHandle>,
    /// Sink delay at the last busy delivery while exiting.
    exit_busy_delay: Option<i64>,
    running: bool,
}

impl DecodeLoop {
    fn new(
        pipe: Arc<MediaPipe>,
        sink: Box<dyn SinkAdapter>,
        resampler: ResamplerFactory,
        config: PipelineConfig,
        events: Sender<DecoderEvent>,
    ) -> Self {
        let output = sink.output_format();
        let output_delay = sink.output_delay();

        Self {
            pipe,
            sink,
            negotiator: FormatNegotiator::new(output, resampler),
            config,
            events,
            stats: DecoderStats::default(),
            pending_pts: None,
            pending_epoch: 0,
            output_delay,
            codecs: Vec::new(),
            exit_busy_delay: None,
            running: true,
        }
    }

    fn run(mut self) -> Result<DecoderStats> {
        info!("Audio decoder started, output {}", self.negotiator.output_format());

        let result = self.process();
        self.release();

        match &result {
            Ok(()) => info!(
                "Audio decoder stopped: {} units decoded, {} chunks delivered",
                self.stats.units_decoded, self.stats.chunks_delivered
            ),
            Err(e) => {
                error!("Audio decoder failed: {e}");
                self.emit(DecoderEvent::Fatal(e.to_string()));
            }
        }

        // Release producers still waiting for room.
        self.pipe.close();
        self.emit(DecoderEvent::Stopped(self.stats));

        result.map(|()| self.stats)
    }

    fn process(&mut self) -> Result<()> {
        let pipe = Arc::clone(&self.pipe);
        let mut queue = pipe.lock();

        while self.running {
            let head = queue.front_kind();

            if self.should_deliver(head) {
                self.deliver(&mut queue, head == Some(MediaBufKind::Exit));
                continue;
            }

            let Some(kind) = head else {
                trace!("Waiting for work");
                pipe.wait(&mut queue);
                continue;
            };

            if kind == MediaBufKind::Exit && self.negotiator.has_buffered_input() {
                let frames = MutexGuard::unlocked(&mut queue, || self.negotiator.drain());
                trace!("Drained {} frames from resampler", frames);
                continue;
            }

            let selected = queue.selected_stream();
            let Some(buf) = queue.pop_front() else {
                continue;
            };
            pipe.signal_space_available();

            match buf {
                MediaBuf::Audio(unit) => {
                    let partial =
                        MutexGuard::unlocked(&mut queue, || self.decode_unit(unit, selected))?;
                    if let Some(unit) = partial {
                        queue.push_front(MediaBuf::Audio(unit));
                    }
                }
                MediaBuf::Pause => {
                    debug!("Pause");
                    MutexGuard::unlocked(&mut queue, || self.sink.pause());
                }
                MediaBuf::Play => {
                    debug!("Play");
                    MutexGuard::unlocked(&mut queue, || self.sink.resume());
                }
                MediaBuf::Flush => {
                    MutexGuard::unlocked(&mut queue, || self.flush());
                }
                MediaBuf::Exit => {
                    debug!("Exit");
                    self.running = false;
                }
            }
        }

        Ok(())
    }

    /// Converted output is ready and nothing ahead of it needs handling first.
    fn should_deliver(&self, head: Option<MediaBufKind>) -> bool {
        if !self.negotiator.is_ready(1) {
            return false;
        }

        match head {
            None | Some(MediaBufKind::Exit) => true,
            Some(MediaBufKind::Audio) => {
                self.negotiator.available_frames() >= self.config.samples_per_deliver.max(1)
            }
            Some(_) => false,
        }
    }

    fn deliver(&mut self, queue: &mut MutexGuard<'_, MediaQueue>, exiting: bool) {
        let frames = self
            .config
            .samples_per_deliver
            .max(1)
            .min(self.negotiator.available_frames());
        let samples = self.negotiator.peek(frames);
        let (pts, epoch) = (self.pending_pts, self.pending_epoch);

        let outcome = MutexGuard::unlocked(queue, || self.sink.deliver(&samples, pts, epoch));

        match outcome {
            DeliverOutcome::Accepted => {
                trace!("Delivered {} frames (pts {:?})", frames, pts);
                self.negotiator.consume(frames);
                self.pending_pts = None;
                self.output_delay = self.sink.output_delay();
                self.exit_busy_delay = None;
                self.stats.chunks_delivered += 1;
                self.stats.frames_delivered += frames as u64;
            }
            DeliverOutcome::Busy => {
                self.stats.busy_retries += 1;

                if exiting {
                    // A sink that is not draining (e.g. paused) would hold the
                    // exit forever; give up on the rest of the output.
                    let delay = self.sink.output_delay();
                    if self.exit_busy_delay == Some(delay) {
                        debug!(
                            "Sink stalled at exit, dropping {} frames",
                            self.negotiator.available_frames()
                        );
                        self.negotiator.flush();
                        return;
                    }
                    self.exit_busy_delay = Some(delay);
                }

                self.pipe.wait_for(queue, self.config.busy_retry);
            }
        }
    }

    /// Decode one step of `unit`. Returns the unit if payload remains.
    fn decode_unit(&mut self, mut unit: AudioUnit, selected: u32) -> Result<Option<AudioUnit>> {
        if unit.skip {
            trace!("Skipping unit ({} bytes)", unit.size());
            self.discard(DiscardReason::Skipped);
            return Ok(None);
        }
        if unit.stream != selected {
            trace!("Unit of stream {} while {} is selected", unit.stream, selected);
            self.discard(DiscardReason::StreamMismatch);
            return Ok(None);
        }

        let at_start = unit.offset == 0;

        let step = match unit.codec.clone() {
            Some(codec) => {
                self.track_codec(&codec);
                let remaining = unit.remaining();
                let result = codec.lock().decode(&remaining);
                result
            }
            None => {
                let remaining = unit.remaining();
                let consumed = remaining.len();
                DecodedFrame::from_raw_s16(remaining, unit.sample_rate, unit.channels)
                    .map(|frame| DecodeOutput::new(consumed, Some(frame)))
            }
        };

        let output = match step {
            Ok(output) => output,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Discarding unit: {e}");
                } else {
                    error!("Discarding unit after decoder failure: {e}");
                }
                self.stats.decode_errors += 1;
                self.discard(DiscardReason::DecodeError);
                return Ok(None);
            }
        };

        if output.consumed == 0 && output.frame.is_none() && !unit.is_consumed() {
            warn!("Decoder made no progress, discarding unit");
            self.stats.decode_errors += 1;
            self.discard(DiscardReason::DecodeError);
            return Ok(None);
        }

        let frame = match output.frame {
            Some(frame) if frame.format().sample_rate == 0 => {
                if unit.sample_rate == 0 {
                    warn!("Decoded frame has no sample rate, discarding unit");
                    self.discard(DiscardReason::UnknownSampleRate);
                    return Ok(None);
                }
                Some(frame.with_sample_rate(unit.sample_rate))
            }
            frame => frame,
        };

        if let Some(frame) = &frame {
            self.negotiate(frame.format());
        }

        if at_start {
            if let Some(pts) = unit.pts {
                self.pending_pts = Some(
                    pts - self.negotiator.output_delay_micros()
                        - self.negotiator.input_delay_micros(),
                );
                self.pending_epoch = unit.epoch;

                if unit.drive_clock {
                    self.pipe.clock().set_clock(pts, -self.output_delay, unit.epoch);
                    self.stats.clock_updates += 1;
                }
            }
        }

        if let Some(frame) = &frame {
            self.negotiator.push_frame(frame);
        }

        unit.advance(output.consumed);
        self.stats.bytes_consumed += output.consumed as u64;

        if unit.is_consumed() {
            self.stats.units_decoded += 1;
            Ok(None)
        } else {
            trace!("Partial decode, {} of {} bytes consumed", unit.offset, unit.size());
            Ok(Some(unit))
        }
    }

    fn negotiate(&mut self, input: &AudioFormat) {
        let output = *self.negotiator.output_format();

        match self.negotiator.negotiate(input) {
            Negotiation::Unchanged => {}
            Negotiation::Reconfigured => {
                self.stats.reconfigurations += 1;
                self.sink.reconfigure(input);
                self.emit(DecoderEvent::FormatChanged {
                    input: *input,
                    output,
                });
            }
            Negotiation::Failed => {
                self.stats.reconfigurations += 1;
                self.sink.reconfigure(input);
                self.emit(DecoderEvent::ResamplerUnavailable(*input));
            }
        }
    }

    fn flush(&mut self) {
        debug!("Flush");
        self.sink.flush();
        self.negotiator.flush();
        for codec in &self.codecs {
            codec.lock().reset();
        }
        self.pending_pts = None;
        self.output_delay = self.sink.output_delay();
    }

    fn track_codec(&mut self, codec: &CodecHandle) {
        if !self.codecs.iter().any(|c| c.same_codec(codec)) {
            self.codecs.push(codec.clone());
        }
    }

    fn discard(&mut self, reason: DiscardReason) {
        self.stats.units_discarded += 1;
        self.emit(DecoderEvent::UnitDiscarded { reason });
    }

    fn release(&mut self) {
        self.negotiator.close();
        for codec in self.codecs.drain(..) {
            codec.lock().finalize();
        }
        self.sink.close();
    }

    fn emit(&self, event: DecoderEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            trace!("Event channel full, dropping {:?}", event);
        }
    }
}
