use crate::codec::ShapeError;
use crate::{Frame, Pixel, FRAME_SIDE};
use ndarray::{s, Array2, ArrayView2};
use num_traits::AsPrimitive;

/// Bring a square frame of side `128 × scale` down to 128×128.
///
/// Each `scale × scale` tile is replaced by the sum of its cells, then negative sums (sensor
/// noise underflow) are clamped to zero.
///
/// # Errors
/// [`ShapeError::NotSquare`] or [`ShapeError::Side`] if the frame is not a square whose side
/// is a positive multiple of 128.
pub fn normalize<T>(frame: ArrayView2<T>) -> Result<Frame, ShapeError>
where
    T: AsPrimitive<i64>,
{
    let scale = pooling_scale(frame.dim())?;
    Ok(remove_negative(combine_pixels(frame, scale)))
}

/// The pooling factor for a frame of the given `(height, width)`
pub fn pooling_scale((height, width): (usize, usize)) -> Result<usize, ShapeError> {
    if height != width {
        return Err(ShapeError::NotSquare { height, width });
    }
    if height == 0 || height % FRAME_SIDE != 0 {
        return Err(ShapeError::Side(height));
    }
    Ok(height / FRAME_SIDE)
}

/// Sum-pool `scale × scale` tiles. The sums are taken in `i64`, so narrow input types
/// cannot wrap.
pub fn combine_pixels<T>(frame: ArrayView2<T>, scale: usize) -> Array2<i64>
where
    T: AsPrimitive<i64>,
{
    Array2::from_shape_fn((FRAME_SIDE, FRAME_SIDE), |(i, j)| {
        frame
            .slice(s![scale * i..scale * (i + 1), scale * j..scale * (j + 1)])
            .iter()
            .map(|&v| v.as_())
            .sum()
    })
}

/// Clamp negative pixels to zero
pub fn remove_negative(frame: Array2<i64>) -> Frame {
    frame.mapv(|v| v.max(0) as Pixel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn identity_at_native_size() {
        let frame = Array2::from_shape_fn((128, 128), |(i, j)| (i * 128 + j) as u16);
        let out = normalize(frame.view()).unwrap();
        assert_eq!(out[[0, 0]], 0);
        assert_eq!(out[[1, 2]], 130);
        assert_eq!(out[[127, 127]], 128 * 128 - 1);
    }

    #[test]
    fn sum_pools_tiles() {
        let frame = Array2::from_elem((256, 256), 3u8);
        let out = normalize(frame.view()).unwrap();
        assert_eq!(out.dim(), (128, 128));
        assert!(out.iter().all(|&v| v == 12));

        // u8 sums must not wrap
        let frame = Array2::from_elem((512, 512), 255u8);
        let out = normalize(frame.view()).unwrap();
        assert!(out.iter().all(|&v| v == 255 * 16));
    }

    #[test]
    fn clamps_negative_sums() {
        let mut frame = Array2::<i32>::zeros((256, 256));
        // tile (0, 0): -5 + 1 + 1 + 1 = -2
        frame[[0, 0]] = -5;
        frame[[0, 1]] = 1;
        frame[[1, 0]] = 1;
        frame[[1, 1]] = 1;
        // tile (0, 1): -1 + 4 = 3
        frame[[0, 2]] = -1;
        frame[[1, 3]] = 4;
        let out = normalize(frame.view()).unwrap();
        assert_eq!(out[[0, 0]], 0);
        assert_eq!(out[[0, 1]], 3);
    }

    #[test]
    fn rejects_bad_shapes() {
        let frame = Array2::<u16>::zeros((128, 256));
        assert_eq!(
            normalize(frame.view()),
            Err(ShapeError::NotSquare {
                height: 128,
                width: 256
            })
        );

        let frame = Array2::<u16>::zeros((200, 200));
        assert_eq!(normalize(frame.view()), Err(ShapeError::Side(200)));

        let frame = Array2::<u16>::zeros((0, 0));
        assert_eq!(normalize(frame.view()), Err(ShapeError::Side(0)));
    }
}
