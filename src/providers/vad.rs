//! Voice activity detection.
//!
//! Silero (through `voice_activity_detector`) scores fixed-size chunks of caller audio;
//! `SpeechSegmenter` applies the minimum speech and silence durations to turn the per-frame
//! decisions into utterance boundaries.

use crate::consts::SAMPLE_RATE_HZ;
use crate::error::ProviderError;
use crate::media::AudioFrame;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use voice_activity_detector::VoiceActivityDetector;

const PROVIDER: &str = "silero";

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub sample_rate: u32,
    /// Samples per Silero inference.  512 at 16kHz.
    pub chunk_size: usize,
    /// Speech probability at or above which a chunk counts as speech.
    pub threshold: f32,
    /// Speech shorter than this is ignored as noise.
    pub min_speech: Duration,
    /// Silence this long ends an utterance.
    pub min_silence: Duration,
    /// Utterances are cut here even if the caller keeps talking.
    pub max_utterance: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_HZ,
            chunk_size: 512,
            threshold: 0.5,
            min_speech: Duration::from_millis(100),
            min_silence: Duration::from_millis(300),
            max_utterance: Duration::from_secs(30),
        }
    }
}

impl VadConfig {
    fn samples(&self, d: Duration) -> usize {
        (d.as_secs_f64() * self.sample_rate as f64).round() as usize
    }
}

/// Per-frame speech classifier.
pub trait SpeechDetector: Send {
    fn is_speech(&mut self, frame: &[i16]) -> bool;

    fn reset(&mut self) {}
}

/// Silero detector.  Frames are buffered until a full chunk is available; a frame inherits the
/// probability of the most recent chunk.
pub struct SileroVad {
    vad: VoiceActivityDetector,
    sample_rate: u32,
    chunk_size: usize,
    threshold: f32,
    pending: Vec<i16>,
    probability: f32,
}

impl SileroVad {
    pub fn new(config: &VadConfig) -> Result<Self, ProviderError> {
        let vad = build_detector(config.sample_rate, config.chunk_size)?;
        debug!(
            sample_rate = config.sample_rate,
            chunk_size = config.chunk_size,
            threshold = config.threshold,
            "silero vad ready"
        );
        Ok(Self {
            vad,
            sample_rate: config.sample_rate,
            chunk_size: config.chunk_size,
            threshold: config.threshold,
            pending: Vec::with_capacity(config.chunk_size * 2),
            probability: 0.0,
        })
    }
}

fn build_detector(sample_rate: u32, chunk_size: usize) -> Result<VoiceActivityDetector, ProviderError> {
    VoiceActivityDetector::builder()
        .sample_rate(sample_rate)
        .chunk_size(chunk_size)
        .build()
        .map_err(|e| ProviderError::Init {
            provider: PROVIDER,
            message: e.to_string(),
        })
}

impl SpeechDetector for SileroVad {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        self.pending.extend_from_slice(frame);
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<i16> = self.pending.drain(..self.chunk_size).collect();
            self.probability = self.vad.predict(chunk);
        }
        self.probability >= self.threshold
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.probability = 0.0;
        // The detector keeps recurrent state between chunks and has no reset of its own.
        match build_detector(self.sample_rate, self.chunk_size) {
            Ok(vad) => self.vad = vad,
            Err(e) => error!(error=%e, "failed to reset silero vad"),
        }
    }
}

pub type DetectorFactory =
    Arc<dyn Fn(&VadConfig) -> Result<Box<dyn SpeechDetector>, ProviderError> + Send + Sync>;

/// Segmentation settings plus the detector to build for each call.
#[derive(Clone)]
pub struct Vad {
    config: VadConfig,
    factory: DetectorFactory,
}

impl Vad {
    pub fn silero(config: VadConfig) -> Self {
        Self::with_factory(config, |config| {
            Ok(Box::new(SileroVad::new(config)?) as Box<dyn SpeechDetector>)
        })
    }

    pub fn with_factory<F>(config: VadConfig, factory: F) -> Self
    where
        F: Fn(&VadConfig) -> Result<Box<dyn SpeechDetector>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Arc::new(factory),
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// A fresh segmenter with its own detector state.
    pub fn segmenter(&self) -> Result<SpeechSegmenter, ProviderError> {
        let detector = (self.factory)(&self.config)?;
        Ok(SpeechSegmenter::new(&self.config, detector))
    }
}

/// Sample offsets of one detected utterance, relative to the start of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBoundary {
    pub start_sample: usize,
    pub end_sample: usize,
}

#[derive(Debug, Clone)]
pub struct Utterance {
    pub boundary: SegmentBoundary,
    pub samples: Vec<i16>,
}

pub struct SpeechSegmenter {
    vad: Box<dyn SpeechDetector>,
    min_speech: usize,
    min_silence: usize,
    max_utterance: usize,
    in_speech: bool,
    speech_run: usize,
    silence_run: usize,
    start_sample: usize,
    buffer: Vec<i16>,
    total_samples: usize,
}

impl SpeechSegmenter {
    pub fn new(config: &VadConfig, vad: Box<dyn SpeechDetector>) -> Self {
        Self {
            vad,
            min_speech: config.samples(config.min_speech).max(1),
            min_silence: config.samples(config.min_silence).max(1),
            max_utterance: config.samples(config.max_utterance).max(1),
            in_speech: false,
            speech_run: 0,
            silence_run: 0,
            start_sample: 0,
            buffer: Vec::new(),
            total_samples: 0,
        }
    }

    /// Feed one frame; returns an utterance once its trailing silence is long enough.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<Utterance> {
        let samples = &frame.samples;
        let speech = self.vad.is_speech(samples);
        self.total_samples += samples.len();

        if !self.in_speech {
            if speech {
                if self.speech_run == 0 {
                    self.start_sample = self.total_samples - samples.len();
                }
                self.speech_run += samples.len();
                self.buffer.extend_from_slice(samples);
                if self.speech_run >= self.min_speech {
                    self.in_speech = true;
                    self.silence_run = 0;
                }
            } else {
                self.speech_run = 0;
                self.buffer.clear();
            }
            return None;
        }

        self.buffer.extend_from_slice(samples);
        if speech {
            self.silence_run = 0;
        } else {
            self.silence_run += samples.len();
        }

        if self.silence_run >= self.min_silence || self.buffer.len() >= self.max_utterance {
            return Some(self.emit());
        }
        None
    }

    /// Emit whatever speech is buffered, e.g. when the stream ends mid-utterance.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.in_speech {
            Some(self.emit())
        } else {
            self.reset();
            None
        }
    }

    /// Batch form: segment boundaries of a complete recording.
    pub fn detect(&mut self, frames: &[AudioFrame]) -> Vec<SegmentBoundary> {
        let mut boundaries: Vec<SegmentBoundary> =
            frames.iter().filter_map(|f| self.push(f)).map(|u| u.boundary).collect();
        if let Some(last) = self.flush() {
            boundaries.push(last.boundary);
        }
        boundaries
    }

    fn emit(&mut self) -> Utterance {
        let trailing = self.silence_run.min(self.buffer.len());
        let mut samples = std::mem::take(&mut self.buffer);
        samples.truncate(samples.len() - trailing);
        let boundary = SegmentBoundary {
            start_sample: self.start_sample,
            end_sample: self.start_sample + samples.len(),
        };
        self.reset();
        Utterance { boundary, samples }
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.speech_run = 0;
        self.silence_run = 0;
        self.buffer.clear();
        self.vad.reset();
    }
}
