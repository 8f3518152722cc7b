//! Synthetic road scenes: a filled trapezoid whose top edge is shifted
//! sideways by a lateral offset while the bottom edge stays centred.

use crate::config::SceneConfig;
use ndarray::Array3;
use rand::Rng;

/// A binary lane mask of shape `(height, width, 1)` and the lateral offset
/// that produced it. The offset is always within `±(width / 3)`.
#[derive(Debug, Clone)]
pub struct Scene {
    pub mask: Array3<u8>,
    pub offset: f32,
}

impl Scene {
    pub fn height(&self) -> usize {
        self.mask.dim().0
    }

    pub fn width(&self) -> usize {
        self.mask.dim().1
    }

    /// Filled column range `(first, last)` of one row, or `None` for an
    /// empty row.
    pub fn row_span(&self, row: usize) -> Option<(usize, usize)> {
        let filled = self
            .mask
            .outer_iter()
            .nth(row)?
            .outer_iter()
            .enumerate()
            .filter(|(_, px)| px[0] != 0)
            .map(|(col, _)| col)
            .collect::<Vec<_>>();
        Some((*filled.first()?, *filled.last()?))
    }
}

/// Lane boundaries of the zero-offset trapezoid. The left edge sits on the
/// whole column `width / 3`, the right edge mirrors it.
fn lane_edges(width: usize) -> (f32, f32) {
    let left_edge = width / 3;
    (left_edge as f32, (width - left_edge) as f32)
}

/// Clamps `offset` to `±(width / 3)`, keeping its sign. Non-finite offsets
/// become 0.
pub fn clamp_offset(offset: f32, width: usize) -> f32 {
    let (left_edge, _) = lane_edges(width);
    if !offset.is_finite() {
        0.0
    } else if offset.abs() > left_edge {
        left_edge.copysign(offset)
    } else {
        offset
    }
}

/// Rasterizes the lane quadrilateral
/// `(0, left+offset) (height, left) (height, right) (0, right+offset)`.
///
/// A pixel is filled when its centre lies inside the polygon or on its
/// boundary. Both slanted sides are straight lines, so each row is filled
/// between the two interpolated side positions.
pub fn create_road(height: usize, width: usize, offset: f32) -> Scene {
    const EDGE_TOLERANCE: f32 = 1e-4;

    let offset = clamp_offset(offset, width);
    let (left_edge, right_edge) = lane_edges(width);
    let mut mask = Array3::<u8>::zeros((height, width, 1));
    if width == 0 {
        return Scene { mask, offset };
    }

    for (row, mut pixels) in mask.outer_iter_mut().enumerate() {
        // Share of the offset left at this row: 1 at the top, 0 at `height`.
        let shift = offset * (1.0 - row as f32 / height as f32);
        let from = (left_edge + shift - EDGE_TOLERANCE).ceil().max(0.0) as usize;
        let to = (right_edge + shift + EDGE_TOLERANCE).floor();
        if to < 0.0 {
            continue;
        }
        let to = (to as usize).min(width - 1);

        for col in from..=to {
            pixels[[col, 0]] = 1;
        }
    }

    Scene { mask, offset }
}

/// Draws a random offset for a scene of `config.width` columns.
pub fn random_offset<R: Rng>(rng: &mut R, config: &SceneConfig) -> f32 {
    let span = config
        .reference_span
        .unwrap_or(2.0 * config.width as f32);
    (rng.random::<f32>() * span - span / 2.0) / 3.0
}

/// Random scene together with its (clamped) offset.
pub fn random_road<R: Rng>(rng: &mut R, config: &SceneConfig) -> Scene {
    let offset = random_offset(rng, config);
    create_road(config.height, config.width, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_small_road_fills_middle_columns() {
        let scene = create_road(4, 6, 0.0);
        assert_eq!(scene.mask.dim(), (4, 6, 1));
        for row in 0..4 {
            assert_eq!(scene.row_span(row), Some((2, 4)), "row {row}");
            let filled = (0..6).filter(|&c| scene.mask[[row, c, 0]] == 1).count();
            assert_eq!(filled, 3);
        }
    }

    #[test]
    fn test_zero_offset_is_rectangle() {
        let scene = create_road(128, 128, 0.0);
        let top = scene.row_span(0).unwrap();
        let bottom = scene.row_span(127).unwrap();
        assert_eq!(top, (42, 86));
        assert_eq!(top, bottom);
    }

    #[test]
    fn test_top_row_follows_offset() {
        let scene = create_road(128, 128, 20.0);
        assert_eq!(scene.row_span(0), Some((62, 106)));
        // The last row keeps 20/128 of the shift.
        assert_eq!(scene.row_span(127), Some((43, 86)));
    }

    #[test]
    fn test_negative_offset_top_row() {
        let scene = create_road(128, 128, -30.0);
        assert_eq!(scene.row_span(0), Some((12, 56)));
    }

    #[test]
    fn test_offset_is_clamped_with_sign() {
        let width = 96;
        assert_eq!(clamp_offset(100.0, width), 32.0);
        assert_eq!(clamp_offset(-100.0, width), -32.0);
        assert_eq!(clamp_offset(-12.5, width), -12.5);
        assert_eq!(clamp_offset(100.0, 128), 42.0);
        assert_eq!(clamp_offset(-42.5, 128), -42.0);

        let scene = create_road(64, width, 500.0);
        assert_eq!(scene.offset, 32.0);
        assert_eq!(scene.row_span(0), Some((64, 95)));
    }

    #[test]
    fn test_non_finite_offset_is_centred() {
        assert_eq!(clamp_offset(f32::NAN, 128), 0.0);
        assert_eq!(clamp_offset(f32::INFINITY, 128), 0.0);

        let scene = create_road(16, 12, f32::NAN);
        assert_eq!(scene.offset, 0.0);
        assert_eq!(scene.row_span(0), Some((4, 8)));
        assert_eq!(scene.mask[[0, 0, 0]], 0);
    }

    #[test]
    fn test_clamped_road_stays_inside_frame() {
        let scene = create_road(32, 30, -1000.0);
        assert_eq!(scene.offset, -10.0);
        assert_eq!(scene.row_span(0), Some((0, 10)));
        assert_eq!(scene.row_span(31).map(|(first, _)| first), Some(10));
    }

    #[test]
    fn test_random_offsets_follow_width() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = SceneConfig {
            height: 64,
            width: 90,
            reference_span: None,
        };
        for _ in 0..500 {
            let offset = random_offset(&mut rng, &config);
            assert!((-30.0..30.0).contains(&offset), "{offset}");
        }
    }

    #[test]
    fn test_fixed_reference_span() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = SceneConfig {
            height: 32,
            width: 512,
            reference_span: Some(256.0),
        };
        let limit = 128.0 / 3.0;
        for _ in 0..500 {
            let scene = random_road(&mut rng, &config);
            assert!(scene.offset.abs() <= limit);
        }
    }
}
