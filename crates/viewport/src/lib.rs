//! Pinch-zoom state of the compositor's viewport.
//!
//! The page scale factor is the value last committed from the main context.
//! The page scale delta is what the compositor applied on top of it since,
//! and the sent delta is the part of that delta already reported back.

use geometry::{RectF, SizeF, Transform, Vector2dF};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewportError {
    #[error("viewport value is not finite")]
    NonFiniteValue,
    #[error("page scale must be finite and positive")]
    InvalidScale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinchZoomViewport {
    page_scale_factor: f32,
    page_scale_delta: f32,
    sent_page_scale_delta: f32,
    min_page_scale_factor: f32,
    max_page_scale_factor: f32,
    device_scale_factor: f32,
    zoomed_viewport_offset: Vector2dF,
    layout_viewport_size: SizeF,
}

impl Default for PinchZoomViewport {
    fn default() -> Self {
        Self {
            page_scale_factor: 1.0,
            page_scale_delta: 1.0,
            sent_page_scale_delta: 1.0,
            min_page_scale_factor: 0.0,
            max_page_scale_factor: 0.0,
            device_scale_factor: 1.0,
            zoomed_viewport_offset: Vector2dF::zero(),
            layout_viewport_size: SizeF::default(),
        }
    }
}

impl PinchZoomViewport {
    pub fn page_scale_factor(&self) -> f32 {
        self.page_scale_factor
    }

    pub fn page_scale_delta(&self) -> f32 {
        self.page_scale_delta
    }

    pub fn sent_page_scale_delta(&self) -> f32 {
        self.sent_page_scale_delta
    }

    pub fn min_page_scale_factor(&self) -> f32 {
        self.min_page_scale_factor
    }

    pub fn max_page_scale_factor(&self) -> f32 {
        self.max_page_scale_factor
    }

    pub fn device_scale_factor(&self) -> f32 {
        self.device_scale_factor
    }

    pub fn zoomed_viewport_offset(&self) -> Vector2dF {
        self.zoomed_viewport_offset
    }

    pub fn layout_viewport_size(&self) -> SizeF {
        self.layout_viewport_size
    }

    pub fn total_page_scale_factor(&self) -> f32 {
        self.page_scale_factor * self.page_scale_delta
    }

    /// Sets the delta, clamped so the total scale stays within the limits.
    /// A zero limit means unbounded on that side.
    pub fn set_page_scale_delta(&mut self, delta: f32) -> Result<(), ViewportError> {
        ensure_scale(delta)?;
        let total = self.page_scale_factor * delta;
        let mut clamped = delta;
        if self.min_page_scale_factor != 0.0 && total < self.min_page_scale_factor {
            clamped = self.min_page_scale_factor / self.page_scale_factor;
        } else if self.max_page_scale_factor != 0.0 && total > self.max_page_scale_factor {
            clamped = self.max_page_scale_factor / self.page_scale_factor;
        }
        self.page_scale_delta = clamped;
        Ok(())
    }

    pub fn set_sent_page_scale_delta(&mut self, delta: f32) -> Result<(), ViewportError> {
        ensure_scale(delta)?;
        self.sent_page_scale_delta = delta;
        Ok(())
    }

    /// Returns false when nothing changed and no delta is in flight.
    pub fn set_page_scale_factor_and_limits(
        &mut self,
        page_scale_factor: f32,
        min_page_scale_factor: f32,
        max_page_scale_factor: f32,
    ) -> Result<bool, ViewportError> {
        ensure_scale(page_scale_factor)?;
        if !min_page_scale_factor.is_finite() || !max_page_scale_factor.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        if self.sent_page_scale_delta == 1.0
            && page_scale_factor == self.page_scale_factor
            && min_page_scale_factor == self.min_page_scale_factor
            && max_page_scale_factor == self.max_page_scale_factor
        {
            return Ok(false);
        }
        self.min_page_scale_factor = min_page_scale_factor;
        self.max_page_scale_factor = max_page_scale_factor;
        self.page_scale_factor = page_scale_factor;
        Ok(true)
    }

    pub fn set_device_scale_factor(&mut self, factor: f32) -> Result<(), ViewportError> {
        ensure_scale(factor)?;
        self.device_scale_factor = factor;
        Ok(())
    }

    pub fn set_layout_viewport_size(&mut self, size: SizeF) {
        self.layout_viewport_size = size;
    }

    /// Visible part of the layout viewport, in layout coordinates.
    pub fn bounds(&self) -> RectF {
        RectF::from_size(self.layout_viewport_size)
            .scaled(1.0 / self.total_page_scale_factor())
            .offset(self.zoomed_viewport_offset)
    }

    /// Moves the zoomed viewport inside the layout viewport and returns the
    /// part of `delta` that would have pushed it outside.
    pub fn apply_scroll(&mut self, delta: Vector2dF) -> Result<Vector2dF, ViewportError> {
        if !delta.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        let mut overflow = Vector2dF::zero();
        let mut pinched = self.bounds().offset(delta);

        if pinched.x < 0.0 {
            overflow.x = pinched.x;
            pinched.x = 0.0;
        }
        if pinched.y < 0.0 {
            overflow.y = pinched.y;
            pinched.y = 0.0;
        }
        let layout_width = self.layout_viewport_size.width;
        let layout_height = self.layout_viewport_size.height;
        if pinched.right() > layout_width {
            overflow.x = pinched.right() - layout_width;
            pinched.x += layout_width - pinched.right();
        }
        if pinched.bottom() > layout_height {
            overflow.y = pinched.bottom() - layout_height;
            pinched.y += layout_height - pinched.bottom();
        }
        let offset = pinched.origin().offset_from_origin();
        if !offset.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        self.zoomed_viewport_offset = offset;
        Ok(overflow)
    }

    /// Transform the compositor applies to the root scroll layer. Without
    /// impl-side pinch zoom only the uncommitted delta is applied here.
    pub fn impl_transform(&self, page_scale_pinch_zoom_enabled: bool) -> Transform {
        let mut transform = Transform::identity();
        transform.scale(self.page_scale_delta, self.page_scale_delta);
        if page_scale_pinch_zoom_enabled {
            transform.scale(self.page_scale_factor, self.page_scale_factor);
            let device_offset = self.zoomed_viewport_offset.scaled(self.device_scale_factor);
            transform.translate(-device_offset.x, -device_offset.y);
        }
        transform
    }
}

fn ensure_scale(scale: f32) -> Result<(), ViewportError> {
    if !scale.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    if scale <= 0.0 {
        return Err(ViewportError::InvalidScale);
    }
    Ok(())
}
