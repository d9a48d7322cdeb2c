use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

// Sample rates on each leg of the pipeline.
pub const CLIENT_SAMPLE_RATE: f64 = 24000.0;
pub const STT_SAMPLE_RATE: f64 = 16000.0;
pub const TTS_SAMPLE_RATE: f64 = 24000.0;

/// A streaming sample-rate converter. The inner resampler consumes fixed
/// input chunks, so samples that do not fill a whole chunk are buffered
/// here and prepended to the next call. No input is ever dropped.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        in_sampling_rate: f64,
        out_sampling_rate: f64,
        chunk_size: usize,
    ) -> anyhow::Result<Self> {
        let inner = FastFixedIn::<f32>::new(
            out_sampling_rate / in_sampling_rate,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )?;
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Resamples `input`, returning the output for every complete chunk.
    /// A trailing partial chunk is held back until later input completes it.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.inner.process(&[chunk], None) {
                Ok(res) => output.extend_from_slice(&res[0]),
                Err(e) => {
                    tracing::warn!(error = %e, "resampler rejected a full chunk");
                    break;
                }
            }
        }
        output
    }

    /// Samples buffered while waiting for a full chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decodes a base64 payload into raw little-endian PCM16 bytes.
pub fn decode_pcm16_base64(fragment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(fragment)
}

/// Encodes raw little-endian PCM16 bytes as base64.
pub fn encode_pcm16_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Reinterprets little-endian byte pairs as i16 samples. A trailing odd
/// byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Serializes i16 samples to little-endian bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect()
}

/// Converts a slice of i16 samples to normalized f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Converts a slice of f32 samples to i16 samples, clamping out-of-range
/// values.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
