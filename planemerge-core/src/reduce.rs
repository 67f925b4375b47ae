use crate::codec::ConfigError;
use crate::{Frame, Pixel, PIXEL_CEILING, PIXEL_CEILING_BITS};
use rand::Rng;
use std::cmp::min;

/// Requantize a frame from `cbits` down to `tbits` of dynamic range with randomized rounding.
///
/// Both depths may be fractional (binning adds `2·log2(scale)` bits). Every pixel is divided
/// by `div = 2^cbits / 2^tbits`; a threshold drawn uniformly from `[0, div)` per pixel decides
/// whether the quotient is rounded up, so the expected value is preserved. Results saturate
/// at [`depth_ceiling`]`(tbits)`. Thresholds are drawn in row-major order, one per pixel.
///
/// With `cbits == tbits` the frame is returned untouched and no thresholds are drawn.
///
/// # Errors
/// [`ConfigError::BitDepth`] if `tbits` exceeds `cbits` or either depth is not a positive
/// finite number.
pub fn reduce_bits<R: Rng + ?Sized>(
    mut frame: Frame,
    cbits: f64,
    tbits: f64,
    rng: &mut R,
) -> Result<Frame, ConfigError> {
    if !(cbits.is_finite() && tbits.is_finite() && tbits > 0.0 && tbits <= cbits) {
        return Err(ConfigError::BitDepth {
            current: cbits,
            target: tbits,
        });
    }
    let div = 2f64.powf(cbits) / 2f64.powf(tbits);
    if div == 1.0 {
        return Ok(frame);
    }

    // Thresholds are integers in [0, div)
    let span = div as u64;
    let ceiling = depth_ceiling(tbits);
    frame.map_inplace(|p| {
        let threshold = rng.gen_range(0..span);
        *p = quantize(*p, div, threshold, ceiling);
    });
    Ok(frame)
}

/// The largest value a pixel of `bits` dynamic range may take: `2^ceil(bits) - 1`, and never
/// more than [`PIXEL_CEILING`]
#[inline]
pub fn depth_ceiling(bits: f64) -> Pixel {
    let bits = bits.ceil().clamp(0.0, PIXEL_CEILING_BITS) as u32;
    min((1 << bits) - 1, PIXEL_CEILING)
}

/// Divide one pixel by `div`, rounding up when the remainder exceeds `threshold`. The result
/// saturates at `ceiling`.
#[inline]
pub fn quantize(pixel: Pixel, div: f64, threshold: u64, ceiling: Pixel) -> Pixel {
    let value = pixel as f64;
    let quotient = (value / div).floor() as Pixel;
    let round_up = value % div > threshold as f64;
    min(quotient + Pixel::from(round_up), ceiling)
}

/// Map a 10-bit value onto 7 bits with four linear ranges.
///
/// | input      | output         |
/// |------------|----------------|
/// | `[0, 16)`  | `v`            |
/// | `[16, 64)` | `(v >> 2) + 12` |
/// | `[64, 256)`| `(v >> 3) + 20` |
/// | `≥ 256`    | `(v >> 4) + 36` |
///
/// Inputs above [`PIXEL_CEILING`] saturate, so the output never exceeds 99.
#[inline]
pub fn poisson_encode(pixel: Pixel) -> Pixel {
    let v = min(pixel, PIXEL_CEILING);
    match v {
        0..=15 => v,
        16..=63 => (v >> 2) + 12,
        64..=255 => (v >> 3) + 20,
        _ => (v >> 4) + 36,
    }
}

/// Apply [`poisson_encode`] to every pixel of a frame
pub fn poisson_encode_frame(frame: Frame) -> Frame {
    frame.mapv_into(poisson_encode)
}
