//! Compositor geometry primitives.
//!
//! Integer rects are used for pixel-aligned quantities (damage, occlusion, quad
//! rects); float rects carry transformed bounds before they are snapped.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

mod region;
mod transform;

pub use region::Region;
pub use transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2dF {
    pub x: f32,
    pub y: f32,
}

impl Vector2dF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn dot(&self, other: Vector2dF) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn scaled(&self, scale: f32) -> Self {
        Self::new(self.x * scale, self.y * scale)
    }

    pub fn scaled_xy(&self, scale_x: f32, scale_y: f32) -> Self {
        Self::new(self.x * scale_x, self.y * scale_y)
    }

    pub fn clamp_to_min(&mut self, min: Vector2dF) {
        self.x = self.x.max(min.x);
        self.y = self.y.max(min.y);
    }

    pub fn clamp_to_max(&mut self, max: Vector2dF) {
        self.x = self.x.min(max.x);
        self.y = self.y.min(max.y);
    }

    pub fn floored(&self) -> Vector2d {
        Vector2d::new(self.x.floor() as i32, self.y.floor() as i32)
    }

    pub fn rounded(&self) -> Vector2d {
        Vector2d::new(self.x.round() as i32, self.y.round() as i32)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vector2dF {
    type Output = Vector2dF;

    fn add(self, rhs: Vector2dF) -> Vector2dF {
        Vector2dF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2dF {
    type Output = Vector2dF;

    fn sub(self, rhs: Vector2dF) -> Vector2dF {
        Vector2dF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Vector2dF {
    type Output = Vector2dF;

    fn neg(self) -> Vector2dF {
        Vector2dF::new(-self.x, -self.y)
    }
}

impl AddAssign for Vector2dF {
    fn add_assign(&mut self, rhs: Vector2dF) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Vector2dF {
    fn sub_assign(&mut self, rhs: Vector2dF) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vector2d {
    pub x: i32,
    pub y: i32,
}

impl Vector2d {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    pub fn to_f32(self) -> Vector2dF {
        Vector2dF::new(self.x as f32, self.y as f32)
    }
}

impl Add for Vector2d {
    type Output = Vector2d;

    fn add(self, rhs: Vector2d) -> Vector2d {
        Vector2d::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2d {
    type Output = Vector2d;

    fn sub(self, rhs: Vector2d) -> Vector2d {
        Vector2d::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Vector2d {
    type Output = Vector2d;

    fn neg(self) -> Vector2d {
        Vector2d::new(-self.x, -self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn offset_from_origin(&self) -> Vector2dF {
        Vector2dF::new(self.x, self.y)
    }

    pub fn scaled(&self, scale: f32) -> Self {
        Self::new(self.x * scale, self.y * scale)
    }

    pub fn rounded(&self) -> Point {
        Point::new(self.x.round() as i32, self.y.round() as i32)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add<Vector2dF> for PointF {
    type Output = PointF;

    fn add(self, rhs: Vector2dF) -> PointF {
        PointF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub<Vector2dF> for PointF {
    type Output = PointF;

    fn sub(self, rhs: Vector2dF) -> PointF {
        PointF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Sub for PointF {
    type Output = Vector2dF;

    fn sub(self, rhs: PointF) -> Vector2dF {
        Vector2dF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn to_f32(self) -> PointF {
        PointF::new(self.x as f32, self.y as f32)
    }

    pub fn offset_from_origin(&self) -> Vector2d {
        Vector2d::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn scaled(&self, scale: f32) -> Self {
        Self::new(self.width * scale, self.height * scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        i64::from(self.width) * i64::from(self.height)
    }

    pub fn to_f32(self) -> SizeF {
        SizeF::new(self.width as f32, self.height as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: SizeF) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn origin(&self) -> PointF {
        PointF::new(self.x, self.y)
    }

    pub fn size(&self) -> SizeF {
        SizeF::new(self.width, self.height)
    }

    pub fn bottom_right(&self) -> PointF {
        PointF::new(self.right(), self.bottom())
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains_point(&self, point: PointF) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn intersect(&self, other: &RectF) -> RectF {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if left >= right || top >= bottom {
            return RectF::default();
        }
        RectF::new(left, top, right - left, bottom - top)
    }

    pub fn union(&self, other: &RectF) -> RectF {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        RectF::new(left, top, right - left, bottom - top)
    }

    pub fn offset(&self, delta: Vector2dF) -> RectF {
        RectF::new(self.x + delta.x, self.y + delta.y, self.width, self.height)
    }

    pub fn scaled(&self, scale: f32) -> RectF {
        RectF::new(
            self.x * scale,
            self.y * scale,
            self.width * scale,
            self.height * scale,
        )
    }

    /// Smallest integer rect that contains every partially covered pixel.
    pub fn to_enclosing_rect(&self) -> Rect {
        if self.is_empty() {
            return Rect::default();
        }
        let left = self.x.floor();
        let top = self.y.floor();
        let right = self.right().ceil();
        let bottom = self.bottom().ceil();
        Rect::new(
            left as i32,
            top as i32,
            (right - left) as i32,
            (bottom - top) as i32,
        )
    }

    /// Largest integer rect made only of fully covered pixels.
    pub fn to_enclosed_rect(&self) -> Rect {
        if self.is_empty() {
            return Rect::default();
        }
        let left = self.x.ceil();
        let top = self.y.ceil();
        let right = self.right().floor();
        let bottom = self.bottom().floor();
        if left >= right || top >= bottom {
            return Rect::default();
        }
        Rect::new(
            left as i32,
            top as i32,
            (right - left) as i32,
            (bottom - top) as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.right(), self.bottom())
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        self.size().area()
    }

    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.right() <= self.right()
            && other.y >= self.y
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if left >= right || top >= bottom {
            return Rect::default();
        }
        Rect::new(left, top, right - left, bottom - top)
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, right - left, bottom - top)
    }

    pub fn offset(&self, delta: Vector2d) -> Rect {
        Rect::new(self.x + delta.x, self.y + delta.y, self.width, self.height)
    }

    pub fn inset(&self, left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect::new(
            self.x + left,
            self.y + top,
            (self.width - left - right).max(0),
            (self.height - top - bottom).max(0),
        )
    }

    pub fn to_f32(self) -> RectF {
        RectF::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// Angle between two vectors in degrees, in `[0, 180]`.
///
/// Returns zero when either vector has no length.
pub fn smallest_angle_between_vectors(first: Vector2dF, second: Vector2dF) -> f32 {
    let lengths = first.length() * second.length();
    if lengths == 0.0 || !lengths.is_finite() {
        return 0.0;
    }
    let cosine = (first.dot(second) / lengths).clamp(-1.0, 1.0);
    cosine.acos().to_degrees()
}

/// Projection of `source` onto the direction of `destination`.
pub fn project_vector(source: Vector2dF, destination: Vector2dF) -> Vector2dF {
    let destination_length_squared = destination.length_squared();
    if destination_length_squared == 0.0 {
        return Vector2dF::zero();
    }
    let projected_length = source.dot(destination) / destination_length_squared;
    destination.scaled(projected_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection_and_union_handle_empty_inputs() {
        let first = Rect::new(0, 0, 10, 10);
        let second = Rect::new(5, 5, 10, 10);
        assert_eq!(first.intersect(&second), Rect::new(5, 5, 5, 5));
        assert_eq!(first.union(&second), Rect::new(0, 0, 15, 15));
        assert_eq!(first.union(&Rect::default()), first);
        assert!(first.intersect(&Rect::new(20, 20, 4, 4)).is_empty());
    }

    #[test]
    fn enclosing_and_enclosed_rects_snap_outward_and_inward() {
        let rect = RectF::new(0.5, 1.25, 9.0, 3.5);
        assert_eq!(rect.to_enclosing_rect(), Rect::new(0, 1, 10, 4));
        assert_eq!(rect.to_enclosed_rect(), Rect::new(1, 2, 8, 2));
    }

    #[test]
    fn angle_between_parallel_and_perpendicular_vectors() {
        let right = Vector2dF::new(10.0, 0.0);
        assert!(smallest_angle_between_vectors(right, Vector2dF::new(6.0, 0.0)).abs() < 1e-4);
        assert!(
            (smallest_angle_between_vectors(right, Vector2dF::new(0.0, 3.0)) - 90.0).abs() < 1e-4
        );
        assert_eq!(
            smallest_angle_between_vectors(right, Vector2dF::zero()),
            0.0
        );
    }

    #[test]
    fn projection_keeps_only_the_component_along_destination() {
        let projected = project_vector(Vector2dF::new(3.0, 4.0), Vector2dF::new(0.0, 2.0));
        assert_eq!(projected, Vector2dF::new(0.0, 4.0));
        assert_eq!(
            project_vector(Vector2dF::new(3.0, 4.0), Vector2dF::zero()),
            Vector2dF::zero()
        );
    }

    #[test]
    fn vector_floor_rounds_toward_negative_infinity() {
        assert_eq!(Vector2dF::new(-0.5, 1.9).floored(), Vector2d::new(-1, 1));
    }
}
