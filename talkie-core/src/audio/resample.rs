//! Sample-rate conversion for the echo reference path.
//!
//! The speaker runs at whatever rate the server negotiated (commonly
//! 24 or 48 kHz) while the canceller wants its reference at the
//! capture rate (16 kHz). This converter bridges that gap on the audio
//! thread using a rubato `FastFixedIn` session.
//!
//! When the rates already match the converter is a passthrough — no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, TalkieError};

/// Converts i16 mono audio from one fixed sample rate to another.
pub struct ReferenceResampler {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl ReferenceResampler {
    /// # Parameters
    /// - `source_rate`: playback rate of the incoming audio (Hz).
    /// - `target_rate`: capture rate the canceller expects (Hz).
    /// - `chunk_size`: input frame count per rubato call (e.g. `960`).
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| TalkieError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be
    /// empty). Samples are accumulated internally until a full
    /// `chunk_size` block is available; any remainder is kept for the
    /// next call. In passthrough mode, input is returned directly.
    pub fn process(&mut self, pcm: &[i16]) -> Vec<i16> {
        let Some(ref mut resampler) = self.resampler else {
            return pcm.to_vec();
        };

        self.input_buf
            .extend(pcm.iter().map(|&s| f32::from(s) / 32768.0));

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend(
                        self.output_buf[0][..produced]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                    );
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when source rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
