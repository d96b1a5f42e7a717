use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::{Point, Rect, Vector2d};

/// Set of pixels stored as pairwise disjoint, non-empty rects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.union_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |bounds, rect| bounds.union(rect))
    }

    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn contains_point(&self, point: Point) -> bool {
        self.rects.iter().any(|rect| rect.contains_point(point))
    }

    pub fn contains_rect(&self, rect: Rect) -> bool {
        let mut remaining = Region::from_rect(rect);
        remaining.subtract(self);
        remaining.is_empty()
    }

    pub fn intersects_rect(&self, rect: Rect) -> bool {
        self.rects.iter().any(|existing| existing.intersects(&rect))
    }

    pub fn union_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces: Vec<Rect> = vec![rect];
        for existing in &self.rects {
            if pieces.is_empty() {
                return;
            }
            pieces = pieces
                .into_iter()
                .flat_map(|piece| subtract_rect(piece, *existing))
                .collect();
        }
        self.rects.extend(pieces);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() || self.rects.is_empty() {
            return;
        }
        self.rects = self
            .rects
            .iter()
            .flat_map(|existing| subtract_rect(*existing, rect))
            .collect();
    }

    pub fn subtract(&mut self, other: &Region) {
        for rect in &other.rects {
            if self.rects.is_empty() {
                return;
            }
            self.subtract_rect(*rect);
        }
    }

    pub fn intersect_rect(&mut self, rect: Rect) {
        self.rects = self
            .rects
            .iter()
            .map(|existing| existing.intersect(&rect))
            .filter(|clipped| !clipped.is_empty())
            .collect();
    }

    pub fn intersect(&mut self, other: &Region) {
        let mut intersection = Vec::new();
        for existing in &self.rects {
            for rect in &other.rects {
                let clipped = existing.intersect(rect);
                if !clipped.is_empty() {
                    intersection.push(clipped);
                }
            }
        }
        self.rects = intersection;
    }

    pub fn translate(&mut self, delta: Vector2d) {
        for rect in &mut self.rects {
            *rect = rect.offset(delta);
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

/// Splits `minuend` minus `subtrahend` into at most four disjoint bands.
pub(crate) fn subtract_rect(minuend: Rect, subtrahend: Rect) -> SmallVec<[Rect; 4]> {
    let overlap = minuend.intersect(&subtrahend);
    if overlap.is_empty() {
        return smallvec![minuend];
    }
    let mut pieces = SmallVec::new();
    let top = Rect::new(minuend.x, minuend.y, minuend.width, overlap.y - minuend.y);
    let bottom = Rect::new(
        minuend.x,
        overlap.bottom(),
        minuend.width,
        minuend.bottom() - overlap.bottom(),
    );
    let left = Rect::new(minuend.x, overlap.y, overlap.x - minuend.x, overlap.height);
    let right = Rect::new(
        overlap.right(),
        overlap.y,
        minuend.right() - overlap.right(),
        overlap.height,
    );
    for piece in [top, bottom, left, right] {
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }
    pieces
}
