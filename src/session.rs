//! Denoising Session
//!
//! Owns every piece of per-stream state: the energy gate, the optional
//! device<->model resamplers, the STFT engine for spectral models, the
//! recurrent model state and the counters.
//!
//! # Lifecycle
//! - **Idle**: Constructed and validated, nothing allocated.
//! - **Running**: Buffers allocated, blocks accepted. `reset()` only here.
//! - **Stopped**: Terminal. Buffers released, last stats kept for reporting.
//!
//! # Per-block path
//! capture block -> [resample in] -> gate -> [STFT -> engine -> iSTFT] or
//! passthrough -> safety stage -> [resample out]
//!
//! # Failure policy
//! An engine error or a malformed answer never touches the stored recurrent
//! state; the pre-inference block goes out instead. For spectral models that
//! block is the dry overlap-add reconstruction, so gated, failed and enhanced
//! hops all leave with the same one-hop latency.

use crate::config::SessionConfig;
use crate::dsp::post::PostProcessor;
use crate::dsp::resampler::{PacedResampler, StreamingResampler};
use crate::dsp::stft::SpectralEngine;
use crate::dsp::vad::VoiceActivityDetector;
use crate::error::{Result, SessionError};
use crate::model::{
    validate_output, InferenceEngine, InferenceRequest, ModelDomain, ModelFrame, ModelSpec,
    RecurrentState,
};
use crate::stats::{InferenceCounters, ProcessingStats};
use log::{debug, info, trace, warn};
use std::time::Instant;

const FAILURE_LOG_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Stopped,
}

/// Buffers that only exist while the session runs.
struct Components {
    vad: VoiceActivityDetector,
    input_resampler: Option<StreamingResampler>,
    output_resampler: Option<PacedResampler>,
    spectral: Option<SpectralEngine>,
    state: RecurrentState,
    counters: InferenceCounters,
    last_active: bool,
}

impl Components {
    fn new(config: &SessionConfig) -> Self {
        let model = &config.model;
        let input_resampler = config
            .needs_input_resampler()
            .then(|| StreamingResampler::new(config.capture_rate, model.sample_rate));
        let output_resampler = config.needs_output_resampler().then(|| {
            PacedResampler::new(model.hop_size, model.sample_rate, config.playback_rate)
        });
        let spectral = match model.domain {
            ModelDomain::Spectral => Some(SpectralEngine::new(model.fft_size, model.hop_size)),
            ModelDomain::Waveform => None,
        };

        Self {
            vad: VoiceActivityDetector::with_hangover_ms(
                config.vad_threshold_db,
                config.hangover_ms,
                model.hop_size,
                model.sample_rate,
            ),
            input_resampler,
            output_resampler,
            spectral,
            state: RecurrentState::zeros(&model.state),
            counters: InferenceCounters::default(),
            last_active: false,
        }
    }

    fn reset(&mut self) {
        self.vad.reset();
        if let Some(rs) = self.input_resampler.as_mut() {
            rs.reset();
        }
        if let Some(rs) = self.output_resampler.as_mut() {
            rs.reset();
        }
        if let Some(stft) = self.spectral.as_mut() {
            stft.reset();
        }
        self.state.zero();
        self.counters.reset();
        self.last_active = false;
    }

    fn stats(&self, model: &ModelSpec) -> ProcessingStats {
        self.counters
            .snapshot(self.vad.stats(), model.block_duration_ms())
    }
}

pub struct DenoisingSession {
    config: SessionConfig,
    engine: Box<dyn InferenceEngine>,
    post: PostProcessor,
    phase: SessionPhase,
    parts: Option<Components>,
    final_stats: ProcessingStats,
    resets: u64,
}

impl DenoisingSession {
    pub fn new(config: SessionConfig, engine: Box<dyn InferenceEngine>) -> Result<Self> {
        config.validate()?;
        if engine.domain() != config.model.domain {
            return Err(SessionError::DomainMismatch {
                engine: engine.domain(),
                model: config.model.domain,
            });
        }
        info!(
            "Session created: model={} ({:?}, {} Hz, hop {}), VAD threshold={:.1} dB, atten limit={:.1} dB",
            config.model.name,
            config.model.domain,
            config.model.sample_rate,
            config.model.hop_size,
            config.vad_threshold_db,
            config.atten_lim_db
        );
        Ok(Self {
            post: PostProcessor::new(config.limiter_threshold),
            config,
            engine,
            phase: SessionPhase::Idle,
            parts: None,
            final_stats: ProcessingStats::default(),
            resets: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn hop_size(&self) -> usize {
        self.config.model.hop_size
    }

    /// Successful `reset()` calls so far. Lets a driver drop audio it queued
    /// before the latest reset.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    fn require(&self, expected: SessionPhase) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected,
                actual: self.phase,
            })
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.require(SessionPhase::Idle)?;
        let parts = Components::new(&self.config);
        info!(
            "Session started (capture {} Hz, playback {} Hz, gate {:.1} dB, hangover {} blocks)",
            self.config.capture_rate,
            self.config.playback_rate,
            parts.vad.threshold_db(),
            parts.vad.hangover_frames()
        );
        self.parts = Some(parts);
        self.phase = SessionPhase::Running;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.require(SessionPhase::Running)?;
        if let Some(parts) = self.parts.take() {
            self.final_stats = parts.stats(&self.config.model);
        }
        self.phase = SessionPhase::Stopped;
        info!(
            "Session stopped. Processed {} frames, avg time: {:.2} ms",
            self.final_stats.frame_count, self.final_stats.avg_inference_ms
        );
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.require(SessionPhase::Running)?;
        if let Some(parts) = self.parts.as_mut() {
            parts.reset();
        }
        self.resets += 1;
        info!("Session state reset");
        Ok(())
    }

    pub fn stats(&self) -> ProcessingStats {
        match &self.parts {
            Some(parts) => parts.stats(&self.config.model),
            None => self.final_stats,
        }
    }

    /// Gate decision for the most recent frame.
    pub fn last_block_active(&self) -> bool {
        self.parts.as_ref().is_some_and(|p| p.last_active)
    }

    /// Current recurrent model state, `None` unless running.
    pub fn recurrent_state(&self) -> Option<&RecurrentState> {
        self.parts.as_ref().map(|p| &p.state)
    }

    fn parts_mut(&mut self) -> Result<&mut Components> {
        let actual = self.phase;
        self.parts.as_mut().ok_or(SessionError::InvalidState {
            expected: SessionPhase::Running,
            actual,
        })
    }

    /// Gate, enhance and reconstruct one model-rate hop.
    ///
    /// Returns the enhanced hop, or the unenhanced one when the gate is closed
    /// or the engine fails. Waveform models pass the input through as is;
    /// spectral models emit it one hop late like every other spectral output.
    /// No safety stage is applied here.
    pub fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        self.require(SessionPhase::Running)?;
        let hop = self.config.model.hop_size;
        if frame.len() != hop {
            return Err(SessionError::BlockSize {
                expected: hop,
                got: frame.len(),
            });
        }
        let atten_lim_db = self.config.atten_lim_db;
        let engine = &mut self.engine;
        let parts = match self.parts.as_mut() {
            Some(parts) => parts,
            None => {
                return Err(SessionError::InvalidState {
                    expected: SessionPhase::Running,
                    actual: self.phase,
                })
            }
        };

        parts.last_active = parts.vad.is_speech(frame);
        if !parts.last_active {
            trace!("gate closed, passthrough");
            return Ok(match parts.spectral.as_mut() {
                Some(stft) => {
                    stft.push_history(frame);
                    stft.synthesize_dry()
                }
                None => frame.to_vec(),
            });
        }

        let model_frame = match parts.spectral.as_mut() {
            Some(stft) => ModelFrame::Spectrum(stft.analyze(frame)),
            None => ModelFrame::Waveform(frame.to_vec()),
        };

        let started = Instant::now();
        let result = {
            let request = InferenceRequest {
                frame: &model_frame,
                state: &parts.state,
                atten_lim_db,
            };
            engine
                .infer(&request)
                .and_then(|output| validate_output(&request, &output).map(|_| output))
        };
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                parts.state.copy_from(&output.state);
                parts.counters.record_success(elapsed);
                trace!("inference took {:.3} ms", elapsed.as_secs_f64() * 1000.0);
                match (output.frame, parts.spectral.as_mut()) {
                    (ModelFrame::Spectrum(spectrum), Some(stft)) => Ok(stft.synthesize(&spectrum)),
                    (ModelFrame::Waveform(samples), _) => Ok(samples),
                    // validate_output pins the answer to the request domain
                    (ModelFrame::Spectrum(_), None) => Ok(frame.to_vec()),
                }
            }
            Err(e) => {
                parts.counters.record_failure();
                let failures = parts.counters.failures();
                if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
                    warn!("Inference failed ({} so far), passing block through: {}", failures, e);
                } else {
                    debug!("Inference failed: {}", e);
                }
                // the hop already sits in the analysis buffer
                Ok(match parts.spectral.as_mut() {
                    Some(stft) => stft.synthesize_dry(),
                    None => frame.to_vec(),
                })
            }
        }
    }

    /// Run one capture-rate block through the whole chain.
    ///
    /// `Ok(None)` means one of the resamplers is still accumulating.
    pub fn process_block(&mut self, capture: &[f32]) -> Result<Option<Vec<f32>>> {
        self.require(SessionPhase::Running)?;
        let hop = self.config.model.hop_size;

        let frame = {
            let parts = self.parts_mut()?;
            match parts.input_resampler.as_mut() {
                Some(rs) => match rs.process(capture, hop) {
                    Some(frame) => frame,
                    None => {
                        trace!(
                            "input resampler filling ({} buffered, phase {:.3})",
                            rs.buffered(),
                            rs.phase()
                        );
                        return Ok(None);
                    }
                },
                None => capture.to_vec(),
            }
        };

        let mut out = self.process_frame(&frame)?;
        self.post.process(&mut out);

        let parts = self.parts_mut()?;
        Ok(match parts.output_resampler.as_mut() {
            Some(rs) => {
                let resampled = rs.process(&out);
                if resampled.is_none() {
                    trace!("output resampler filling ({} buffered)", rs.buffered());
                }
                resampled
            }
            None => Some(out),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::model::{InferenceOutput, PassthroughEngine, StateSlot};

    /// Halves the frame and bumps every state value by one.
    struct HalvingEngine {
        domain: ModelDomain,
    }

    impl InferenceEngine for HalvingEngine {
        fn domain(&self) -> ModelDomain {
            self.domain
        }

        fn infer(
            &mut self,
            request: &InferenceRequest<'_>,
        ) -> std::result::Result<InferenceOutput, InferenceError> {
            let frame = match request.frame {
                ModelFrame::Waveform(x) => ModelFrame::Waveform(x.iter().map(|v| v * 0.5).collect()),
                ModelFrame::Spectrum(s) => {
                    let mut s = s.clone();
                    s.re.iter_mut().chain(s.im.iter_mut()).for_each(|v| *v *= 0.5);
                    ModelFrame::Spectrum(s)
                }
            };
            let mut state = request.state.clone();
            for b in state.buffers_mut() {
                b.data.iter_mut().for_each(|v| *v += 1.0);
            }
            Ok(InferenceOutput { frame, state })
        }
    }

    struct FailingEngine(ModelDomain);

    impl InferenceEngine for FailingEngine {
        fn domain(&self) -> ModelDomain {
            self.0
        }

        fn infer(
            &mut self,
            _request: &InferenceRequest<'_>,
        ) -> std::result::Result<InferenceOutput, InferenceError> {
            Err(InferenceError::Failed("model crashed".into()))
        }
    }

    /// Succeeds once, then answers with a grown state, then with NaN samples.
    struct DegradingEngine {
        calls: usize,
    }

    impl InferenceEngine for DegradingEngine {
        fn domain(&self) -> ModelDomain {
            ModelDomain::Waveform
        }

        fn infer(
            &mut self,
            request: &InferenceRequest<'_>,
        ) -> std::result::Result<InferenceOutput, InferenceError> {
            self.calls += 1;
            let mut state = request.state.clone();
            for b in state.buffers_mut() {
                b.data.iter_mut().for_each(|v| *v += 1.0);
            }
            let mut frame = request.frame.clone();
            match self.calls {
                1 => {}
                2 => state.buffers_mut()[0].data.push(0.0),
                _ => {
                    if let ModelFrame::Waveform(x) = &mut frame {
                        x[0] = f32::NAN;
                    }
                }
            }
            Ok(InferenceOutput { frame, state })
        }
    }

    fn gtcrn_config(vad_threshold_db: f32, hangover_ms: f32) -> SessionConfig {
        SessionConfig {
            vad_threshold_db,
            hangover_ms,
            capture_rate: 16000,
            playback_rate: 16000,
            capture_block: 256,
            playback_block: 256,
            model: ModelSpec::gtcrn(),
            ..SessionConfig::default()
        }
    }

    /// Asserts `out` is `input` delayed by one hop, with silence in front.
    fn assert_one_hop_late(input: &[f32], out: &[f32], hop: usize) {
        assert_eq!(input.len(), out.len());
        for (i, v) in out.iter().enumerate() {
            let expected = if i < hop { 0.0 } else { input[i - hop] };
            assert!(
                (v - expected).abs() < 1e-4,
                "sample {}: got {} expected {}",
                i,
                v,
                expected
            );
        }
    }

    fn small_waveform_config() -> SessionConfig {
        SessionConfig {
            capture_rate: 16000,
            playback_rate: 16000,
            capture_block: 160,
            playback_block: 160,
            model: ModelSpec {
                name: "test_wave".into(),
                domain: ModelDomain::Waveform,
                sample_rate: 16000,
                hop_size: 160,
                fft_size: 0,
                state: vec![StateSlot::new("h", 8)],
            },
            ..SessionConfig::default()
        }
    }

    fn tone(len: usize, amp: f32, offset: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * ((i + offset) as f32 * 0.07).sin())
            .collect()
    }

    fn running(config: SessionConfig, engine: Box<dyn InferenceEngine>) -> DenoisingSession {
        let mut session = DenoisingSession::new(config, engine).expect("valid session");
        session.start().expect("start");
        session
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = DenoisingSession::new(
            small_waveform_config(),
            Box::new(PassthroughEngine::new(ModelDomain::Waveform)),
        )
        .expect("valid session");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(matches!(
            session.reset(),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(session.process_frame(&[0.0; 160]).is_err());

        session.start().expect("start");
        assert!(session.start().is_err());
        session.stop().expect("stop");
        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert!(session.process_block(&[0.0; 160]).is_err());
        assert!(session.stop().is_err());
        assert!(session.recurrent_state().is_none());
    }

    #[test]
    fn test_domain_mismatch_rejected() {
        let result = DenoisingSession::new(
            small_waveform_config(),
            Box::new(PassthroughEngine::new(ModelDomain::Spectral)),
        );
        assert!(matches!(result, Err(SessionError::DomainMismatch { .. })));
    }

    #[test]
    fn test_silence_skips_inference() {
        let mut session = running(
            small_waveform_config(),
            Box::new(HalvingEngine {
                domain: ModelDomain::Waveform,
            }),
        );
        let silent = vec![0.0f32; 160];
        let out = session.process_frame(&silent).expect("frame");
        assert_eq!(out, silent);
        let stats = session.stats();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.vad_bypassed, 1);
    }

    #[test]
    fn test_speech_runs_engine_and_updates_state() {
        let mut session = running(
            small_waveform_config(),
            Box::new(HalvingEngine {
                domain: ModelDomain::Waveform,
            }),
        );
        let loud = tone(160, 0.5, 0);
        let out = session.process_frame(&loud).expect("frame");
        for (o, i) in out.iter().zip(loud.iter()) {
            assert!((o - i * 0.5).abs() < 1e-7);
        }
        let state = session.recurrent_state().expect("running");
        assert!(state.get("h").expect("slot").iter().all(|&v| v == 1.0));
        assert_eq!(session.stats().frame_count, 1);
    }

    #[test]
    fn test_inference_failure_passes_block_through() {
        let mut session = running(
            small_waveform_config(),
            Box::new(FailingEngine(ModelDomain::Waveform)),
        );
        let loud = tone(160, 0.5, 0);
        let before = session.recurrent_state().cloned();
        let out = session.process_frame(&loud).expect("frame");
        assert_eq!(out, loud);
        assert_eq!(session.recurrent_state().cloned(), before);
        let stats = session.stats();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.avg_inference_ms, 0.0);
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(stats.vad_active, 1);
    }

    #[test]
    fn test_gate_changes_keep_spectral_latency() {
        let mut session = running(
            gtcrn_config(-40.0, 0.0),
            Box::new(PassthroughEngine::new(ModelDomain::Spectral)),
        );
        // loud, quiet, loud: both gate edges
        let input: Vec<f32> = (0..12)
            .flat_map(|k| {
                let amp = if (4..8).contains(&k) { 1e-4 } else { 0.5 };
                tone(256, amp, k * 256)
            })
            .collect();
        let mut out = Vec::new();
        for hop in input.chunks(256) {
            out.extend(session.process_frame(hop).expect("frame"));
        }
        assert_one_hop_late(&input, &out, 256);

        let stats = session.stats();
        assert_eq!(stats.vad_bypassed, 4);
        assert_eq!(stats.frame_count, 8);
    }

    #[test]
    fn test_spectral_failure_emits_dry_signal() {
        let mut session = running(
            gtcrn_config(-120.0, 300.0),
            Box::new(FailingEngine(ModelDomain::Spectral)),
        );
        let before = session.recurrent_state().cloned();
        let input = tone(256 * 6, 0.4, 0);
        let mut out = Vec::new();
        for hop in input.chunks(256) {
            out.extend(session.process_frame(hop).expect("frame"));
        }
        assert_one_hop_late(&input, &out, 256);
        assert_eq!(session.recurrent_state().cloned(), before);

        let stats = session.stats();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.inference_failures, 6);
    }

    #[test]
    fn test_malformed_answers_keep_last_good_state() {
        let mut session = running(
            small_waveform_config(),
            Box::new(DegradingEngine { calls: 0 }),
        );
        let loud = tone(160, 0.5, 0);

        session.process_frame(&loud).expect("frame");
        let good = session.recurrent_state().cloned().expect("running");
        assert!(good.get("h").expect("slot").iter().all(|&v| v == 1.0));

        // grown state buffer
        let out = session.process_frame(&loud).expect("frame");
        assert_eq!(out, loud);
        assert_eq!(session.recurrent_state(), Some(&good));
        assert_eq!(session.stats().inference_failures, 1);

        // NaN sample
        let out = session.process_frame(&loud).expect("frame");
        assert_eq!(out, loud);
        assert_eq!(session.recurrent_state(), Some(&good));
        let stats = session.stats();
        assert_eq!(stats.inference_failures, 2);
        assert_eq!(stats.frame_count, 1);
    }

    #[test]
    fn test_wrong_block_size_is_precondition_error() {
        let mut session = running(
            small_waveform_config(),
            Box::new(PassthroughEngine::new(ModelDomain::Waveform)),
        );
        assert!(matches!(
            session.process_frame(&[0.1; 100]),
            Err(SessionError::BlockSize {
                expected: 160,
                got: 100
            })
        ));
    }

    #[test]
    fn test_reset_replays_identically() {
        let config = SessionConfig {
            capture_rate: 44100,
            capture_block: 441,
            playback_rate: 48000,
            model: ModelSpec::gtcrn(),
            ..SessionConfig::default()
        };
        let mut session = running(
            config.clone(),
            Box::new(HalvingEngine {
                domain: ModelDomain::Spectral,
            }),
        );
        let input: Vec<Vec<f32>> = (0..60)
            .map(|n| {
                let amp = if (n / 10) % 2 == 0 { 0.4 } else { 0.0 };
                tone(441, amp, n * 441)
            })
            .collect();

        let run = |s: &mut DenoisingSession| -> Vec<Option<Vec<f32>>> {
            input
                .iter()
                .map(|b| s.process_block(b).expect("block"))
                .collect()
        };

        let first = run(&mut session);
        session.reset().expect("reset");
        assert_eq!(session.stats(), ProcessingStats::default());
        let second = run(&mut session);

        let mut fresh = running(
            config,
            Box::new(HalvingEngine {
                domain: ModelDomain::Spectral,
            }),
        );
        let third = run(&mut fresh);

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert!(first.iter().any(|b| b.is_some()));
    }

    #[test]
    fn test_spectral_passthrough_is_transparent() {
        let config = SessionConfig {
            capture_rate: 16000,
            playback_rate: 16000,
            capture_block: 256,
            playback_block: 256,
            vad_threshold_db: -120.0,
            model: ModelSpec::gtcrn(),
            ..SessionConfig::default()
        };
        let mut session = running(config, Box::new(PassthroughEngine::new(ModelDomain::Spectral)));
        let input = tone(256 * 12, 0.3, 0);
        let mut out = Vec::new();
        for hop in input.chunks(256) {
            out.extend(session.process_frame(hop).expect("frame"));
        }
        for i in 256..input.len() {
            assert!((out[i] - input[i - 256]).abs() < 1e-4, "sample {}", i);
        }
        assert_eq!(session.stats().frame_count, 12);
    }

    #[test]
    fn test_stats_survive_stop() {
        let mut session = running(
            small_waveform_config(),
            Box::new(HalvingEngine {
                domain: ModelDomain::Waveform,
            }),
        );
        session.process_frame(&tone(160, 0.5, 0)).expect("frame");
        session.stop().expect("stop");
        assert_eq!(session.stats().frame_count, 1);
    }
}
