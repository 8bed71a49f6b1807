//! Region of interest chosen by the client in the original's pixel space.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A crop rectangle in original-image pixels.
///
/// Coordinates are unsigned, so non-negativity holds by construction; the
/// upper bounds depend on the original and are checked with [`CropRectangle::fits_within`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle has a non-zero area and lies entirely inside
    /// an image of `width` x `height` pixels.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }
}

impl fmt::Display for CropRectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_fits() {
        assert!(CropRectangle::new(0, 0, 2000, 1500).fits_within(2000, 1500));
        assert!(CropRectangle::new(500, 0, 1500, 1500).fits_within(2000, 1500));
    }

    #[test]
    fn overflowing_edges_are_rejected() {
        assert!(!CropRectangle::new(501, 0, 1500, 1500).fits_within(2000, 1500));
        assert!(!CropRectangle::new(0, 1, 1500, 1500).fits_within(2000, 1500));
        assert!(!CropRectangle::new(u32::MAX, 0, 2, 2).fits_within(2000, 1500));
    }

    #[test]
    fn empty_area_is_rejected() {
        assert!(!CropRectangle::new(0, 0, 0, 10).fits_within(100, 100));
        assert!(!CropRectangle::new(0, 0, 10, 0).fits_within(100, 100));
    }
}
