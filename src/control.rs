//! Frame control loop and the session control surface.
//!
//! One worker thread pulls capture blocks, drives the session and pushes
//! playback blocks. It stops when the running flag drops, when the capture
//! source returns a short block, or when collaborator I/O keeps failing.
//!
//! The session sits behind a single `Mutex` shared with the controller, so
//! `reset()`, `stop()` and `stats()` never interleave with a block in flight.
//! A blocked capture read is not interrupted; cancellation takes effect at the
//! next iteration.

use crate::config::SessionConfig;
use crate::dsp::reblock::BlockAssembler;
use crate::dsp::utils::{frame_peak, frame_rms};
use crate::error::{Result, SessionError};
use crate::meters::LevelMeters;
use crate::model::InferenceEngine;
use crate::session::{DenoisingSession, SessionPhase};
use crate::stats::ProcessingStats;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Platform capture side, consumed one block at a time.
pub trait CaptureSource: Send {
    /// Blocking read of up to `max_samples`. A shorter block means end of stream.
    fn read(&mut self, max_samples: usize) -> anyhow::Result<Vec<f32>>;
}

/// Platform playback side.
pub trait PlaybackSink: Send {
    fn write(&mut self, block: &[f32]) -> anyhow::Result<()>;

    /// Called once after the final block of a stream.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Running flag cleared by the controller.
    Cancelled,
    EndOfStream,
    /// More consecutive capture/playback failures than allowed.
    IoFailure,
    /// The session refused a block.
    SessionFailure(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub iterations: u64,
    pub samples_in: u64,
    pub samples_out: u64,
    pub io_errors: u64,
    /// Samples lost to full re-blocking buffers.
    pub overflowed: u64,
}

#[derive(Clone, Copy, Debug)]
enum IoSide {
    Capture,
    Playback,
}

fn lock_session(session: &Mutex<DenoisingSession>) -> Result<MutexGuard<'_, DenoisingSession>> {
    session.lock().map_err(|_| SessionError::Poisoned)
}

pub struct FrameLoop {
    session: Arc<Mutex<DenoisingSession>>,
    running: Arc<AtomicBool>,
    meters: Arc<LevelMeters>,
    capture_block: usize,
    /// Largest capture slice that resamples to at most one hop.
    resample_chunk: usize,
    max_io_errors: u32,
    /// Cuts capture into model hops when capture already runs at the model rate.
    input: Option<BlockAssembler>,
    output: BlockAssembler,
    /// Session reset count the queued audio belongs to.
    seen_resets: u64,
    capture_failures: u32,
    playback_failures: u32,
    iterations: u64,
    samples_in: u64,
    samples_out: u64,
    io_errors: u64,
}

impl FrameLoop {
    pub fn new(
        session: Arc<Mutex<DenoisingSession>>,
        running: Arc<AtomicBool>,
        meters: Arc<LevelMeters>,
    ) -> Result<Self> {
        let (config, seen_resets) = {
            let guard = lock_session(&session)?;
            (guard.config().clone(), guard.reset_count())
        };
        let hop = config.model.hop_size;
        let input = (!config.needs_input_resampler())
            .then(|| BlockAssembler::new(hop, config.capture_block));
        let max_out = (hop as u64 * config.playback_rate as u64)
            .div_ceil(config.model.sample_rate as u64) as usize
            + 1;
        let output = BlockAssembler::new(config.playback_block, max_out);
        let resample_chunk = ((hop as u64 * config.capture_rate as u64)
            / config.model.sample_rate as u64)
            .max(1) as usize;

        Ok(Self {
            session,
            running,
            meters,
            capture_block: config.capture_block,
            resample_chunk,
            max_io_errors: config.max_consecutive_io_errors,
            input,
            output,
            seen_resets,
            capture_failures: 0,
            playback_failures: 0,
            iterations: 0,
            samples_in: 0,
            samples_out: 0,
            io_errors: 0,
        })
    }

    pub fn run(
        mut self,
        capture: &mut dyn CaptureSource,
        playback: &mut dyn PlaybackSink,
    ) -> LoopSummary {
        info!(
            "Frame loop started (capture block {}, playback block {})",
            self.capture_block,
            self.output.block_len()
        );

        let exit = loop {
            if !self.running.load(Ordering::Acquire) {
                break LoopExit::Cancelled;
            }
            self.iterations += 1;

            let captured = match capture.read(self.capture_block) {
                Ok(block) => {
                    self.capture_failures = 0;
                    block
                }
                Err(e) => {
                    if self.io_failed(IoSide::Capture, &e) {
                        break LoopExit::IoFailure;
                    }
                    continue;
                }
            };

            let end_of_stream = captured.len() < self.capture_block;
            self.samples_in += captured.len() as u64;
            if !captured.is_empty() {
                self.meters.set_input_peak(frame_peak(&captured));
                self.meters.set_input_rms(frame_rms(&captured));
            }

            if let Err(exit) = self.feed(&captured, playback) {
                break exit;
            }
            if end_of_stream {
                debug!("capture returned {} samples, ending stream", captured.len());
                match self.finish_stream(playback) {
                    Ok(()) => break LoopExit::EndOfStream,
                    Err(exit) => break exit,
                }
            }
        };

        self.running.store(false, Ordering::Release);
        let summary = LoopSummary {
            exit,
            iterations: self.iterations,
            samples_in: self.samples_in,
            samples_out: self.samples_out,
            io_errors: self.io_errors,
            overflowed: self.output.overflowed()
                + self.input.as_ref().map_or(0, |a| a.overflowed()),
        };
        match &summary.exit {
            LoopExit::SessionFailure(msg) => error!("Frame loop aborted: {}", msg),
            LoopExit::IoFailure => error!(
                "Frame loop aborted after {} consecutive I/O errors",
                self.capture_failures.max(self.playback_failures)
            ),
            exit => info!(
                "Frame loop finished ({:?}): {} samples in, {} samples out",
                exit, summary.samples_in, summary.samples_out
            ),
        }
        summary
    }

    /// Count a collaborator failure. True once the loop should give up.
    fn io_failed(&mut self, side: IoSide, e: &anyhow::Error) -> bool {
        let in_a_row = match side {
            IoSide::Capture => &mut self.capture_failures,
            IoSide::Playback => &mut self.playback_failures,
        };
        *in_a_row += 1;
        let in_a_row = *in_a_row;
        self.io_errors += 1;
        warn!("{:?} failed ({} in a row): {:#}", side, in_a_row, e);
        in_a_row > self.max_io_errors
    }

    /// Drop everything queued before the latest session reset.
    fn sync_resets(&mut self, resets: u64) {
        if resets == self.seen_resets {
            return;
        }
        self.seen_resets = resets;
        if let Some(asm) = self.input.as_mut() {
            asm.clear();
        }
        self.output.clear();
        debug!("session was reset, dropped queued audio");
    }

    fn feed(
        &mut self,
        captured: &[f32],
        playback: &mut dyn PlaybackSink,
    ) -> std::result::Result<(), LoopExit> {
        let resets = lock_session(&self.session)
            .map_err(|e| LoopExit::SessionFailure(e.to_string()))?
            .reset_count();
        self.sync_resets(resets);

        let blocks: Vec<Vec<f32>> = match self.input.as_mut() {
            Some(asm) => {
                asm.push(captured);
                std::iter::from_fn(|| asm.pop_block()).collect()
            }
            None => captured
                .chunks(self.resample_chunk)
                .map(<[f32]>::to_vec)
                .collect(),
        };
        for block in blocks {
            if !self.process(&block, playback)? {
                // reset landed mid-batch; the rest predates it
                break;
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        block: &[f32],
        playback: &mut dyn PlaybackSink,
    ) -> std::result::Result<bool, LoopExit> {
        let processed = {
            let mut session = lock_session(&self.session)
                .map_err(|e| LoopExit::SessionFailure(e.to_string()))?;
            let resets = session.reset_count();
            if resets != self.seen_resets {
                drop(session);
                self.sync_resets(resets);
                return Ok(false);
            }
            let out = session
                .process_block(block)
                .map_err(|e| LoopExit::SessionFailure(e.to_string()))?;
            self.meters.set_speech(session.last_block_active());
            out
        };
        self.meters.count_block();

        if let Some(out) = processed {
            self.meters.set_output_peak(frame_peak(&out));
            self.output.push(&out);
            while let Some(block) = self.output.pop_block() {
                self.write(&block, playback)?;
            }
        }
        Ok(true)
    }

    fn write(
        &mut self,
        block: &[f32],
        playback: &mut dyn PlaybackSink,
    ) -> std::result::Result<(), LoopExit> {
        match playback.write(block) {
            Ok(()) => {
                self.playback_failures = 0;
                self.samples_out += block.len() as u64;
                Ok(())
            }
            Err(e) if self.io_failed(IoSide::Playback, &e) => Err(LoopExit::IoFailure),
            Err(_) => Ok(()),
        }
    }

    /// Zero-pad the last partial hop, then hand out whatever is still queued.
    fn finish_stream(
        &mut self,
        playback: &mut dyn PlaybackSink,
    ) -> std::result::Result<(), LoopExit> {
        let pad = self
            .input
            .as_ref()
            .filter(|a| a.queued() > 0)
            .map(|a| a.block_len() - a.queued());
        if let Some(pad) = pad {
            self.feed(&vec![0.0; pad], playback)?;
        }

        let tail = self.output.pop_remaining();
        if !tail.is_empty() {
            self.write(&tail, playback)?;
        }
        if let Err(e) = playback.finish() {
            warn!("playback finish failed: {:#}", e);
            self.io_errors += 1;
        }
        Ok(())
    }
}

/// Control surface of one session: start, stop, reset, stats.
pub struct SessionController {
    session: Arc<Mutex<DenoisingSession>>,
    running: Arc<AtomicBool>,
    meters: Arc<LevelMeters>,
    worker: Option<JoinHandle<LoopSummary>>,
}

impl SessionController {
    pub fn new(config: SessionConfig, engine: Box<dyn InferenceEngine>) -> Result<Self> {
        let session = DenoisingSession::new(config, engine)?;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            running: Arc::new(AtomicBool::new(false)),
            meters: Arc::new(LevelMeters::new()),
            worker: None,
        })
    }

    /// Start the session and spawn the frame loop on its own thread.
    pub fn start<C, P>(&mut self, capture: C, playback: P) -> Result<()>
    where
        C: CaptureSource + 'static,
        P: PlaybackSink + 'static,
    {
        if self.worker.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let frame_loop = FrameLoop::new(
            Arc::clone(&self.session),
            Arc::clone(&self.running),
            Arc::clone(&self.meters),
        )?;
        lock_session(&self.session)?.start()?;
        self.meters.clear();
        self.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("poise-frame-loop".into())
            .spawn(move || {
                let (mut capture, mut playback) = (capture, playback);
                frame_loop.run(&mut capture, &mut playback)
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Wait for the loop to end on its own (end of stream or failure).
    pub fn wait(&mut self) -> Result<Option<LoopSummary>> {
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map(Some)
                .map_err(|_| SessionError::WorkerPanicked),
            None => Ok(None),
        }
    }

    /// Cancel the loop, join it and stop the session.
    pub fn stop(&mut self) -> Result<Option<LoopSummary>> {
        self.running.store(false, Ordering::Release);
        let summary = self.wait()?;
        lock_session(&self.session)?.stop()?;
        Ok(summary)
    }

    pub fn reset(&self) -> Result<()> {
        lock_session(&self.session)?.reset()?;
        self.meters.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<ProcessingStats> {
        Ok(lock_session(&self.session)?.stats())
    }

    pub fn phase(&self) -> Result<SessionPhase> {
        Ok(lock_session(&self.session)?.phase())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn meters(&self) -> Arc<LevelMeters> {
        Arc::clone(&self.meters)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
