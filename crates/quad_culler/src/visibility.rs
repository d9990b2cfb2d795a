//! Screen-space visibility test.
//!
//! Works on pre-divide clip coordinates: each vertex is transformed with
//! `w = 1` and only the resulting `xy` is looked at. There is no perspective
//! divide and no near-plane handling. The bounds test compares against zero
//! with strict inequalities, so a box touching an axis counts as visible.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::core::CullMode;

/// Outcome of the visibility stage for one quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Visible,
    Culled,
}

impl Visibility {
    #[inline]
    pub fn is_visible(self) -> bool {
        matches!(self, Visibility::Visible)
    }
}

/// Read the position of `vertex_index` from a flat xyz buffer.
///
/// # Panics
/// Panics if the index is past the end of `positions`.
#[inline]
pub fn gather_position(positions: &[f32], vertex_index: u16) -> Vec3 {
    let base = vertex_index as usize * 3;
    Vec3::from_slice(&positions[base..base + 3])
}

/// Transform a world-space position into homogeneous clip space.
#[inline]
pub fn to_clip(view_proj: Mat4, position: Vec3) -> Vec4 {
    view_proj * position.extend(1.0)
}

/// Axis-aligned xy bounds of a transformed triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl ScreenBounds {
    pub fn from_clip_points(points: &[Vec4; 3]) -> Self {
        let [a, b, c] = points.map(|p| p.truncate().truncate());
        Self {
            min: a.min(b).min(c),
            max: a.max(b).max(c),
        }
    }

    /// True when the box lies entirely to one side of zero on either axis.
    #[inline]
    pub fn is_outside(&self) -> bool {
        self.max.x < 0.0 || self.max.y < 0.0 || self.min.x > 0.0 || self.min.y > 0.0
    }
}

/// Classify a quad from the three vertices of its first triangle.
pub fn classify_triangle(positions: [Vec3; 3], view_proj: Mat4, mode: CullMode) -> Visibility {
    let culled = match mode {
        CullMode::ScreenBounds => {
            let clip = positions.map(|p| to_clip(view_proj, p));
            ScreenBounds::from_clip_points(&clip).is_outside()
        }
        CullMode::Reference => positions[0].x > 0.0,
    };
    if culled {
        Visibility::Culled
    } else {
        Visibility::Visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(points: [[f32; 3]; 3], mode: CullMode) -> Visibility {
        classify_triangle(points.map(Vec3::from), Mat4::IDENTITY, mode)
    }

    #[test]
    fn gather_reads_xyz_run() {
        let positions = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(gather_position(&positions, 1), Vec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn clip_transform_skips_divide() {
        let view_proj = Mat4::from_scale(Vec3::splat(2.0));
        let clip = to_clip(view_proj, Vec3::new(1.0, -1.0, 0.5));
        assert_eq!(clip, Vec4::new(2.0, -2.0, 1.0, 1.0));

        let persp = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let clip = to_clip(persp, Vec3::new(1.0, 1.0, -10.0));
        assert!(clip.w > 1.0, "w stays undivided");
    }

    #[test]
    fn triangle_around_origin_is_visible() {
        let tri = [[-0.5, -0.5, 0.0], [0.0, 0.5, 0.0], [0.5, -0.5, 0.0]];
        assert_eq!(classify(tri, CullMode::ScreenBounds), Visibility::Visible);
    }

    #[test]
    fn triangle_right_of_screen_is_culled() {
        let tri = [[1.5, 0.0, 0.0], [2.0, 0.5, 0.0], [1.2, -0.5, 0.0]];
        assert_eq!(classify(tri, CullMode::ScreenBounds), Visibility::Culled);
    }

    #[test]
    fn each_side_culls() {
        let below = [[-0.5, -2.0, 0.0], [0.5, -2.0, 0.0], [0.0, -1.0, 0.0]];
        let above = [[-0.5, 2.0, 0.0], [0.5, 2.0, 0.0], [0.0, 1.0, 0.0]];
        let left = [[-2.0, -0.5, 0.0], [-2.0, 0.5, 0.0], [-1.0, 0.0, 0.0]];
        for tri in [below, above, left] {
            assert_eq!(classify(tri, CullMode::ScreenBounds), Visibility::Culled);
        }
    }

    #[test]
    fn edge_on_zero_counts_as_visible() {
        let touching_right = [[0.0, -0.5, 0.0], [1.0, 0.0, 0.0], [0.5, 0.5, 0.0]];
        let touching_top = [[-0.5, -1.0, 0.0], [0.5, -1.0, 0.0], [0.0, 0.0, 0.0]];
        assert_eq!(classify(touching_right, CullMode::ScreenBounds), Visibility::Visible);
        assert_eq!(classify(touching_top, CullMode::ScreenBounds), Visibility::Visible);
    }

    #[test]
    fn reference_mode_follows_first_vertex_x() {
        let inside = [[0.5, -0.5, 0.0], [0.0, 0.5, 0.0], [-0.5, -0.5, 0.0]];
        assert_eq!(classify(inside, CullMode::Reference), Visibility::Culled);

        let outside = [[-1.0, 5.0, 0.0], [-2.0, 6.0, 0.0], [-3.0, 7.0, 0.0]];
        assert_eq!(classify(outside, CullMode::ScreenBounds), Visibility::Culled);
        assert_eq!(classify(outside, CullMode::Reference), Visibility::Visible);

        let on_zero = [[0.0, 9.0, 0.0], [4.0, 9.0, 0.0], [4.0, 8.0, 0.0]];
        assert_eq!(classify(on_zero, CullMode::Reference), Visibility::Visible);
    }

    #[test]
    fn reference_mode_ignores_view_proj() {
        let tri = [Vec3::new(-1.0, 0.0, 0.0), Vec3::X, Vec3::Y];
        let far_away = Mat4::from_translation(Vec3::new(100.0, 100.0, 0.0));
        assert_eq!(
            classify_triangle(tri, far_away, CullMode::Reference),
            Visibility::Visible
        );
        assert_eq!(
            classify_triangle(tri, far_away, CullMode::ScreenBounds),
            Visibility::Culled
        );
    }
}
