use crate::error::SegmentationError;
use crate::DecodedAudio;

pub const FFT_WINDOW_SIZE: usize = 4096;
pub const FFT_HOP_SIZE: usize = 1024;
pub const RMS_WINDOW_MS: u32 = 300;
pub const RMS_HOP_MS: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    pub fft_window_size: usize,
    pub fft_hop_size: usize,
    pub rms_window_ms: u32,
    pub rms_hop_ms: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            fft_window_size: FFT_WINDOW_SIZE,
            fft_hop_size: FFT_HOP_SIZE,
            rms_window_ms: RMS_WINDOW_MS,
            rms_hop_ms: RMS_HOP_MS,
        }
    }
}

/// One channel's frames: every frame has the configured window length,
/// zero-padded at the tail, tagged with its start time in seconds.
#[derive(Debug, Clone)]
pub struct ChannelFrames {
    pub frames: Vec<Vec<f32>>,
    pub timestamps: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FrameSet {
    pub left: ChannelFrames,
    pub right: ChannelFrames,
    pub window_size: usize,
    pub hop_size: usize,
    pub count: usize,
}

/// Frames for FFT (Hann-windowed) and for RMS (rectangular), produced in one
/// pass over the decoded buffer.
#[derive(Debug, Clone)]
pub struct SegmentedAudio {
    pub frames_fft: FrameSet,
    pub frames_rms: FrameSet,
    pub sample_rate: u32,
}

/// Deterministic frame count: every sample covered, tail zero-padded.
pub fn frame_count(len: usize, window: usize, hop: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (len.saturating_sub(window) + hop - 1) / hop + 1
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
        .collect()
}

fn extract_frame(samples: &[f32], start: usize, size: usize) -> Vec<f32> {
    let mut frame = vec![0.0f32; size];
    if start < samples.len() {
        let end = (start + size).min(samples.len());
        frame[..end - start].copy_from_slice(&samples[start..end]);
    }
    frame
}

fn segment_channel(
    samples: &[f32],
    window_size: usize,
    hop_size: usize,
    sample_rate: u32,
    window: Option<&[f32]>,
) -> ChannelFrames {
    let count = frame_count(samples.len(), window_size, hop_size);
    let mut frames = Vec::with_capacity(count);
    let mut timestamps = Vec::with_capacity(count);

    for idx in 0..count {
        let start = idx * hop_size;
        let mut frame = extract_frame(samples, start, window_size);
        if let Some(w) = window {
            for (s, wv) in frame.iter_mut().zip(w) {
                *s *= wv;
            }
        }
        frames.push(frame);
        timestamps.push(start as f64 / sample_rate as f64);
    }

    ChannelFrames { frames, timestamps }
}

pub fn segment(audio: &DecodedAudio, config: &SegmentConfig) -> Result<SegmentedAudio, SegmentationError> {
    if audio.sample_rate == 0 {
        return Err(SegmentationError::InvalidSampleRate(audio.sample_rate));
    }
    if audio.left.len() != audio.right.len() {
        return Err(SegmentationError::ChannelLengthMismatch {
            left: audio.left.len(),
            right: audio.right.len(),
        });
    }
    if audio.left.is_empty() {
        return Err(SegmentationError::EmptyBuffer);
    }

    let sr = audio.sample_rate;
    let hann = hann_window(config.fft_window_size);

    let fft_left = segment_channel(
        &audio.left,
        config.fft_window_size,
        config.fft_hop_size,
        sr,
        Some(&hann),
    );
    let fft_right = segment_channel(
        &audio.right,
        config.fft_window_size,
        config.fft_hop_size,
        sr,
        Some(&hann),
    );

    let rms_window = (config.rms_window_ms as usize * sr as usize) / 1000;
    let rms_hop = (config.rms_hop_ms as usize * sr as usize) / 1000;
    let rms_left = segment_channel(&audio.left, rms_window, rms_hop, sr, None);
    let rms_right = segment_channel(&audio.right, rms_window, rms_hop, sr, None);

    let fft_count = fft_left.frames.len();
    let rms_count = rms_left.frames.len();
    log::debug!(
        "Segmented {} samples: {} FFT frames ({}×{} hop), {} RMS windows ({}ms/{}ms)",
        audio.left.len(),
        fft_count,
        config.fft_window_size,
        config.fft_hop_size,
        rms_count,
        config.rms_window_ms,
        config.rms_hop_ms
    );

    Ok(SegmentedAudio {
        frames_fft: FrameSet {
            left: fft_left,
            right: fft_right,
            window_size: config.fft_window_size,
            hop_size: config.fft_hop_size,
            count: fft_count,
        },
        frames_rms: FrameSet {
            left: rms_left,
            right: rms_right,
            window_size: rms_window,
            hop_size: rms_hop,
            count: rms_count,
        },
        sample_rate: sr,
    })
}
