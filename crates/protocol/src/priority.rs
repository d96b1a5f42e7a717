//! Resource priorities. Smaller values are more important; a resource is kept
//! when its priority is at or below the active cutoff.

pub const VISIBLE_DRAWS_TO_ROOT_SURFACE: i32 = 0;
pub const RENDER_SURFACE: i32 = 1;
pub const VISIBLE_DOES_NOT_DRAW_TO_ROOT_SURFACE: i32 = 3;
pub const LINGERING: i32 = 1_000_000;
pub const NOT_VISIBLE_BASE: i32 = 1_010_000;
pub const NOT_VISIBLE_LIMIT: i32 = 2_000_000;

pub const ALLOW_NOTHING_CUTOFF: i32 = i32::MIN;
pub const ALLOW_VISIBLE_ONLY_CUTOFF: i32 = 10;
pub const ALLOW_VISIBLE_AND_NEARBY_CUTOFF: i32 = NOT_VISIBLE_BASE + 512;
pub const ALLOW_EVERYTHING_CUTOFF: i32 = i32::MAX;

/// Priority for content at `distance` pixels outside the visible area.
pub fn priority_from_distance(distance: i32, draws_to_root_surface: bool) -> i32 {
    if distance <= 0 {
        return if draws_to_root_surface {
            VISIBLE_DRAWS_TO_ROOT_SURFACE
        } else {
            VISIBLE_DOES_NOT_DRAW_TO_ROOT_SURFACE
        };
    }
    NOT_VISIBLE_BASE
        .saturating_add(distance)
        .min(NOT_VISIBLE_LIMIT)
}

pub fn is_more_important(first: i32, second: i32) -> bool {
    first < second
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_content_outranks_nearby_content() {
        assert_eq!(priority_from_distance(0, true), VISIBLE_DRAWS_TO_ROOT_SURFACE);
        assert_eq!(
            priority_from_distance(-4, false),
            VISIBLE_DOES_NOT_DRAW_TO_ROOT_SURFACE
        );
        let nearby = priority_from_distance(100, true);
        assert!(is_more_important(RENDER_SURFACE, nearby));
        assert!(nearby <= ALLOW_VISIBLE_AND_NEARBY_CUTOFF);
        assert!(priority_from_distance(10_000, true) > ALLOW_VISIBLE_AND_NEARBY_CUTOFF);
        assert_eq!(priority_from_distance(i32::MAX, true), NOT_VISIBLE_LIMIT);
    }
}
