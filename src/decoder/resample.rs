// src/decoder/resample.rs

use anyhow::Result;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 128usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let chunk_size = 4096;
    let r = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, channels)?;
    Ok(Some(r))
}

/// Offline resample of a mono signal. The resampler's delay is trimmed so
/// output time zero lines up with input time zero.
pub fn resample_mono(mono: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, 1)? else {
        return Ok(mono.to_vec());
    };

    let delay = resampler.output_delay();
    let expected = (mono.len() as f64 * dst_rate as f64 / src_rate as f64).round() as usize;
    let mut out: Vec<f32> = Vec::with_capacity(expected + delay);

    let mut pos = 0usize;
    loop {
        let need = resampler.input_frames_next();
        if mono.len() - pos < need {
            break;
        }
        let block = resampler.process(&[&mono[pos..pos + need]], None)?;
        out.extend_from_slice(&block[0]);
        pos += need;
    }

    if pos < mono.len() {
        let tail: [&[f32]; 1] = [&mono[pos..]];
        let block = resampler.process_partial(Some(&tail[..]), None)?;
        out.extend_from_slice(&block[0]);
    }

    // flush the tail held back by the filter
    while out.len() < expected + delay {
        let block = resampler.process_partial::<Vec<f32>>(None, None)?;
        if block.is_empty() || block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}
