use serde::{Deserialize, Serialize};

use crate::{PointF, RectF, Vector2dF};

/// 2D affine transform in row-major form.
///
/// `concat` and the in-place builders post-multiply, so the most recently
/// appended operation is applied to points first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    m00: f32,
    m01: f32,
    m10: f32,
    m11: f32,
    tx: f32,
    ty: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            m00: 1.0,
            m01: 0.0,
            m10: 0.0,
            m11: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub const fn from_translation(dx: f32, dy: f32) -> Self {
        Self {
            m00: 1.0,
            m01: 0.0,
            m10: 0.0,
            m11: 1.0,
            tx: dx,
            ty: dy,
        }
    }

    pub const fn from_scale(sx: f32, sy: f32) -> Self {
        Self {
            m00: sx,
            m01: 0.0,
            m10: 0.0,
            m11: sy,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn from_rotation_degrees(degrees: f32) -> Self {
        let (sine, cosine) = degrees.to_radians().sin_cos();
        Self {
            m00: cosine,
            m01: -sine,
            m10: sine,
            m11: cosine,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn from_matrix3x3(matrix: [[f32; 3]; 3]) -> Self {
        Self {
            m00: matrix[0][0],
            m01: matrix[0][1],
            m10: matrix[1][0],
            m11: matrix[1][1],
            tx: matrix[0][2],
            ty: matrix[1][2],
        }
    }

    pub fn to_matrix3x3(&self) -> [[f32; 3]; 3] {
        [
            [self.m00, self.m01, self.tx],
            [self.m10, self.m11, self.ty],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Returns `self * other`: `other` is applied to points first.
    pub fn multiply(&self, other: &Transform) -> Transform {
        Transform {
            m00: self.m00 * other.m00 + self.m01 * other.m10,
            m01: self.m00 * other.m01 + self.m01 * other.m11,
            m10: self.m10 * other.m00 + self.m11 * other.m10,
            m11: self.m10 * other.m01 + self.m11 * other.m11,
            tx: self.m00 * other.tx + self.m01 * other.ty + self.tx,
            ty: self.m10 * other.tx + self.m11 * other.ty + self.ty,
        }
    }

    pub fn concat(&mut self, other: &Transform) {
        *self = self.multiply(other);
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.concat(&Transform::from_translation(dx, dy));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.concat(&Transform::from_scale(sx, sy));
    }

    pub fn determinant(&self) -> f32 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > f32::EPSILON
    }

    pub fn inverse(&self) -> Option<Transform> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let inv00 = self.m11 / det;
        let inv01 = -self.m01 / det;
        let inv10 = -self.m10 / det;
        let inv11 = self.m00 / det;
        Some(Transform {
            m00: inv00,
            m01: inv01,
            m10: inv10,
            m11: inv11,
            tx: -(inv00 * self.tx + inv01 * self.ty),
            ty: -(inv10 * self.tx + inv11 * self.ty),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Transform::identity()
    }

    pub fn is_identity_or_translation(&self) -> bool {
        self.m00 == 1.0 && self.m01 == 0.0 && self.m10 == 0.0 && self.m11 == 1.0
    }

    /// True when axis-aligned rects stay axis-aligned rects after mapping.
    pub fn preserves_axis_alignment(&self) -> bool {
        (self.m01 == 0.0 && self.m10 == 0.0) || (self.m00 == 0.0 && self.m11 == 0.0)
    }

    pub fn translation(&self) -> Vector2dF {
        Vector2dF::new(self.tx, self.ty)
    }

    pub fn scale_components(&self) -> Vector2dF {
        Vector2dF::new(
            (self.m00 * self.m00 + self.m10 * self.m10).sqrt(),
            (self.m01 * self.m01 + self.m11 * self.m11).sqrt(),
        )
    }

    pub fn map_point(&self, point: PointF) -> PointF {
        PointF::new(
            self.m00 * point.x + self.m01 * point.y + self.tx,
            self.m10 * point.x + self.m11 * point.y + self.ty,
        )
    }

    pub fn map_vector(&self, vector: Vector2dF) -> Vector2dF {
        Vector2dF::new(
            self.m00 * vector.x + self.m01 * vector.y,
            self.m10 * vector.x + self.m11 * vector.y,
        )
    }

    /// Bounding box of the mapped rect.
    pub fn map_rect(&self, rect: RectF) -> RectF {
        if self.is_identity_or_translation() {
            return rect.offset(self.translation());
        }
        let corners = [
            self.map_point(PointF::new(rect.x, rect.y)),
            self.map_point(PointF::new(rect.right(), rect.y)),
            self.map_point(PointF::new(rect.x, rect.bottom())),
            self.map_point(PointF::new(rect.right(), rect.bottom())),
        ];
        let mut min_x = corners[0].x;
        let mut min_y = corners[0].y;
        let mut max_x = corners[0].x;
        let mut max_y = corners[0].y;
        for corner in &corners[1..] {
            min_x = min_x.min(corner.x);
            min_y = min_y.min(corner.y);
            max_x = max_x.max(corner.x);
            max_y = max_y.max(corner.y);
        }
        RectF::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_applies_right_hand_side_first() {
        let mut transform = Transform::from_translation(10.0, 0.0);
        transform.scale(2.0, 2.0);

        let mapped = transform.map_point(PointF::new(1.0, 1.0));
        assert_eq!(mapped, PointF::new(12.0, 2.0));
    }

    #[test]
    fn inverse_round_trips_points() {
        let mut transform = Transform::from_scale(2.0, 4.0);
        transform.translate(3.0, -5.0);
        let inverse = transform.inverse().expect("invertible");

        let point = PointF::new(7.0, 9.0);
        let round_trip = inverse.map_point(transform.map_point(point));
        assert!((round_trip.x - point.x).abs() < 1e-5);
        assert!((round_trip.y - point.y).abs() < 1e-5);
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(Transform::from_scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn map_rect_returns_bounding_box_for_rotation() {
        let transform = Transform::from_rotation_degrees(90.0);
        let mapped = transform.map_rect(RectF::new(0.0, 0.0, 10.0, 20.0));
        assert!((mapped.x + 20.0).abs() < 1e-4);
        assert!(mapped.y.abs() < 1e-4);
        assert!((mapped.width - 20.0).abs() < 1e-4);
        assert!((mapped.height - 10.0).abs() < 1e-4);
    }

    #[test]
    fn scale_and_translation_preserve_axis_alignment() {
        let mut transform = Transform::from_scale(2.0, 3.0);
        transform.translate(4.0, 4.0);
        assert!(transform.preserves_axis_alignment());
        assert!(!Transform::from_rotation_degrees(30.0).preserves_axis_alignment());
    }
}
