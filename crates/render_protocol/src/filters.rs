use geometry::{Rect, Vector2d};
use serde::{Deserialize, Serialize};

use crate::Color;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FilterOperation {
    Grayscale(f32),
    Brightness(f32),
    Opacity(f32),
    Blur {
        std_deviation: f32,
    },
    DropShadow {
        offset: Vector2d,
        std_deviation: f32,
        color: Color,
    },
}

impl FilterOperation {
    fn moves_pixels(&self) -> bool {
        matches!(
            self,
            FilterOperation::Blur { .. } | FilterOperation::DropShadow { .. }
        )
    }

    fn affects_opacity(&self) -> bool {
        match self {
            FilterOperation::Opacity(amount) => *amount != 1.0,
            FilterOperation::Blur { .. } | FilterOperation::DropShadow { .. } => true,
            FilterOperation::Grayscale(_) | FilterOperation::Brightness(_) => false,
        }
    }
}

/// Outsets of a filter chain, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterOutsets {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOperations {
    operations: Vec<FilterOperation>,
}

impl FilterOperations {
    pub fn new(operations: Vec<FilterOperation>) -> Self {
        Self { operations }
    }

    pub fn push(&mut self, operation: FilterOperation) {
        self.operations.push(operation);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[FilterOperation] {
        &self.operations
    }

    pub fn has_filter_that_moves_pixels(&self) -> bool {
        self.operations.iter().any(FilterOperation::moves_pixels)
    }

    pub fn has_filter_that_affects_opacity(&self) -> bool {
        self.operations.iter().any(FilterOperation::affects_opacity)
    }

    pub fn outsets(&self) -> FilterOutsets {
        let mut outsets = FilterOutsets::default();
        for operation in &self.operations {
            match *operation {
                FilterOperation::Blur { std_deviation } => {
                    let spread = spread_for_std_deviation(std_deviation);
                    outsets.top += spread;
                    outsets.right += spread;
                    outsets.bottom += spread;
                    outsets.left += spread;
                }
                FilterOperation::DropShadow {
                    offset,
                    std_deviation,
                    ..
                } => {
                    let spread = spread_for_std_deviation(std_deviation);
                    outsets.top += spread - offset.y;
                    outsets.right += spread + offset.x;
                    outsets.bottom += spread + offset.y;
                    outsets.left += spread - offset.x;
                }
                _ => {}
            }
        }
        outsets
    }

    /// `rect` grown by the filter chain's outsets.
    pub fn expand_rect(&self, rect: Rect) -> Rect {
        if rect.is_empty() {
            return rect;
        }
        let outsets = self.outsets();
        rect.inset(-outsets.left, -outsets.top, -outsets.right, -outsets.bottom)
    }
}

/// Triple box-filter approximation of a gaussian blur's reach.
fn spread_for_std_deviation(std_deviation: f32) -> i32 {
    let box_size = (std_deviation * 3.0 * std::f32::consts::TAU.sqrt() / 4.0 + 0.5).floor();
    (box_size * 3.0 / 2.0).ceil() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_expands_all_sides_equally() {
        let filters = FilterOperations::new(vec![FilterOperation::Blur { std_deviation: 2.0 }]);
        let outsets = filters.outsets();
        assert_eq!(outsets.top, 6);
        assert_eq!(outsets.left, 6);
        assert_eq!(
            filters.expand_rect(Rect::new(10, 10, 10, 10)),
            Rect::new(4, 4, 22, 22)
        );
        assert!(filters.has_filter_that_moves_pixels());
    }

    #[test]
    fn drop_shadow_outsets_follow_the_offset() {
        let filters = FilterOperations::new(vec![FilterOperation::DropShadow {
            offset: Vector2d::new(3, -2),
            std_deviation: 0.0,
            color: Color::BLACK,
        }]);
        assert_eq!(
            filters.outsets(),
            FilterOutsets {
                top: 2,
                right: 3,
                bottom: -2,
                left: -3,
            }
        );
    }

    #[test]
    fn colour_filters_neither_move_pixels_nor_change_opacity() {
        let filters = FilterOperations::new(vec![
            FilterOperation::Grayscale(0.5),
            FilterOperation::Opacity(1.0),
        ]);
        assert!(!filters.has_filter_that_moves_pixels());
        assert!(!filters.has_filter_that_affects_opacity());
        assert_eq!(filters.outsets(), FilterOutsets::default());
    }
}
