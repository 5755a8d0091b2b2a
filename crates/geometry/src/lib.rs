//! Pure pixel-space geometry for the planner client.
//!
//! Two coordinate spaces are in play:
//! - *Canonical space*: pixel coordinates of the (server-resized) floorplan.
//! - *Display space*: on-screen coordinates after an aspect-preserving fit of
//!   the floorplan into a bounding square.
//!
//! Everything here is a pure function over value types; canonical points are
//! the only ones ever stored, display points exist transiently for drawing
//! and for interpreting clicks.

/// Pixel dimensions of an image or layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A raster address in canonical space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CanonicalPoint {
    pub col: u32,
    pub row: u32,
}

impl CanonicalPoint {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// A sub-pixel position in display space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DisplayPoint {
    pub x: f64,
    pub y: f64,
}

impl DisplayPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryError {
    InvalidExtent { width: u32, height: u32 },
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::InvalidExtent { width, height } => {
                write!(f, "invalid extent: {width}x{height}")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

fn checked(extent: Extent) -> Result<Extent, GeometryError> {
    if extent.is_degenerate() {
        return Err(GeometryError::InvalidExtent {
            width: extent.width,
            height: extent.height,
        });
    }
    Ok(extent)
}

/// Fits `canonical` into a `bound`-sized square, preserving aspect ratio.
///
/// The longer edge lands exactly on `bound` (both edges for a square input);
/// the shorter edge is rounded. Neither axis ever exceeds `bound`.
pub fn fit_to_bound(canonical: Extent, bound: u32) -> Result<Extent, GeometryError> {
    let canonical = checked(canonical)?;
    if bound == 0 {
        return Err(GeometryError::InvalidExtent {
            width: bound,
            height: bound,
        });
    }

    let w = canonical.width as f64;
    let h = canonical.height as f64;
    let display = if canonical.width > canonical.height {
        Extent::new(bound, (h / w * bound as f64).round() as u32)
    } else {
        Extent::new((w / h * bound as f64).round() as u32, bound)
    };
    Ok(display)
}

/// Maps a display-space position to the canonical pixel containing it.
///
/// `floor`, not `round`: a click belongs to the pixel it lands in.
pub fn to_canonical(
    point: DisplayPoint,
    canonical: Extent,
    display: Extent,
) -> Result<CanonicalPoint, GeometryError> {
    let canonical = checked(canonical)?;
    let display = checked(display)?;

    let col = (point.x * canonical.width as f64 / display.width as f64).floor();
    let row = (point.y * canonical.height as f64 / display.height as f64).floor();
    Ok(CanonicalPoint::new(col.max(0.0) as u32, row.max(0.0) as u32))
}

/// Maps a canonical pixel to its display-space position.
///
/// Sub-pixel output, for drawing only; canonical points are what get stored.
pub fn to_display(
    point: CanonicalPoint,
    canonical: Extent,
    display: Extent,
) -> Result<DisplayPoint, GeometryError> {
    let canonical = checked(canonical)?;
    let display = checked(display)?;

    let x = point.col as f64 * display.width as f64 / canonical.width as f64;
    let y = point.row as f64 * display.height as f64 / canonical.height as f64;
    Ok(DisplayPoint::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::{CanonicalPoint, DisplayPoint, Extent, GeometryError, fit_to_bound, to_canonical, to_display};

    const BOUND: u32 = 512;

    #[test]
    fn wide_image_pins_width_to_bound() {
        let d = fit_to_bound(Extent::new(1024, 768), BOUND).expect("fit");
        assert_eq!(d, Extent::new(512, 384));
    }

    #[test]
    fn tall_image_pins_height_to_bound() {
        let d = fit_to_bound(Extent::new(400, 800), BOUND).expect("fit");
        assert_eq!(d, Extent::new(256, 512));
    }

    #[test]
    fn square_image_pins_both_axes() {
        let d = fit_to_bound(Extent::new(777, 777), BOUND).expect("fit");
        assert_eq!(d, Extent::new(512, 512));
    }

    #[test]
    fn fit_never_exceeds_bound() {
        for (w, h) in [(1, 10_000), (10_000, 1), (513, 511), (3, 2)] {
            let d = fit_to_bound(Extent::new(w, h), BOUND).expect("fit");
            assert!(d.width <= BOUND && d.height <= BOUND, "{w}x{h} -> {d:?}");
            assert_eq!(d.width.max(d.height), BOUND);
        }
    }

    #[test]
    fn fit_rejects_degenerate_extents() {
        assert_eq!(
            fit_to_bound(Extent::new(0, 100), BOUND),
            Err(GeometryError::InvalidExtent {
                width: 0,
                height: 100
            })
        );
        assert!(fit_to_bound(Extent::new(100, 100), 0).is_err());
    }

    #[test]
    fn click_maps_to_containing_pixel() {
        // Canonical 800 high x 400 wide fits to 256x512; a click at (10, 20)
        // lands in canonical column 15, row 31.
        let canonical = Extent::new(400, 800);
        let display = fit_to_bound(canonical, BOUND).expect("fit");
        assert_eq!(display, Extent::new(256, 512));

        let p = to_canonical(DisplayPoint::new(10.0, 20.0), canonical, display).expect("map");
        assert_eq!(p, CanonicalPoint::new(15, 31));
    }

    #[test]
    fn round_trip_is_within_one_pixel() {
        let canonical = Extent::new(1920, 1080);
        let display = fit_to_bound(canonical, BOUND).expect("fit");

        for p in [
            CanonicalPoint::new(0, 0),
            CanonicalPoint::new(1919, 1079),
            CanonicalPoint::new(960, 540),
            CanonicalPoint::new(7, 1033),
        ] {
            let d = to_display(p, canonical, display).expect("to display");
            let back = to_canonical(d, canonical, display).expect("to canonical");
            assert!(
                back.col.abs_diff(p.col) <= 1 && back.row.abs_diff(p.row) <= 1,
                "{p:?} -> {d:?} -> {back:?}"
            );
        }
    }

    #[test]
    fn mapping_rejects_degenerate_extents() {
        let ok = Extent::new(10, 10);
        let bad = Extent::new(10, 0);
        assert!(to_canonical(DisplayPoint::new(0.0, 0.0), bad, ok).is_err());
        assert!(to_canonical(DisplayPoint::new(0.0, 0.0), ok, bad).is_err());
        assert!(to_display(CanonicalPoint::new(0, 0), bad, ok).is_err());
        assert!(to_display(CanonicalPoint::new(0, 0), ok, bad).is_err());
    }
}
