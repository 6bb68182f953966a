use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A point in Level-0 pixel coordinates, (0, 0) at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A width/height pair in pixels. Both dimensions are strictly positive for
/// every `Size` produced by [`Size::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("size dimensions must be positive, got {width}x{height}");
        }
        Ok(Self { width, height })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A rectangle in Level-0 coordinates: top-left corner plus extent, the
/// bottom-right edge exclusive. The canonical representation for every crop
/// request the agent issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("region dimensions must be positive, got {width}x{height}");
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// X coordinate of the right edge (exclusive).
    pub fn right(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    /// Y coordinate of the bottom edge (exclusive).
    pub fn bottom(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn size(&self) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }

    pub fn contains_point(&self, point: Point) -> bool {
        u64::from(point.x) >= u64::from(self.x)
            && u64::from(point.x) < self.right()
            && u64::from(point.y) >= u64::from(self.y)
            && u64::from(point.y) < self.bottom()
    }

    /// Overlap with another region, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if u64::from(x) >= right || u64::from(y) >= bottom {
            return None;
        }
        Some(Region {
            x,
            y,
            width: (right - u64::from(x)) as u32,
            height: (bottom - u64::from(y)) as u32,
        })
    }
}

/// Check that a region lies inside the slide. In strict mode an out-of-bounds
/// region is an error naming the offending edges, the region, and the bounds;
/// otherwise the result is reported as a plain boolean.
pub fn validate(region: Region, bounds: Size, strict: bool) -> Result<bool> {
    let fits = region.right() <= u64::from(bounds.width) && region.bottom() <= u64::from(bounds.height);
    if fits || !strict {
        return Ok(fits);
    }

    let mut violations = Vec::new();
    if region.right() > u64::from(bounds.width) {
        violations.push(format!(
            "right edge ({}) exceeds width ({})",
            region.right(),
            bounds.width
        ));
    }
    if region.bottom() > u64::from(bounds.height) {
        violations.push(format!(
            "bottom edge ({}) exceeds height ({})",
            region.bottom(),
            bounds.height
        ));
    }
    bail!(
        "region out of bounds: {} (region=({}, {}, {}, {}), bounds={}x{})",
        violations.join("; "),
        region.x,
        region.y,
        region.width,
        region.height,
        bounds.width,
        bounds.height
    );
}

/// Force a region inside the slide, preserving at least one pixel per axis.
///
/// The origin is clamped into `[0, bounds - 1]` first, then the extent is
/// clamped to the remaining space. Each axis is handled independently, so the
/// operation is deterministic and idempotent. This is the error-recovery path
/// only; the default policy rejects and re-prompts instead.
pub fn clamp_region(region: Region, bounds: Size) -> Region {
    let x = region.x.min(bounds.width - 1);
    let y = region.y.min(bounds.height - 1);
    let width = region.width.clamp(1, bounds.width - x);
    let height = region.height.clamp(1, bounds.height - y);
    Region {
        x,
        y,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rejects_zero_dimensions() {
        assert!(Region::new(0, 0, 0, 100).is_err());
        assert!(Region::new(0, 0, 100, 0).is_err());
        assert!(Region::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn test_region_derived_edges() {
        let r = Region::new(10, 20, 100, 50).unwrap();
        assert_eq!(r.right(), 110);
        assert_eq!(r.bottom(), 70);
        assert_eq!(r.center(), (60, 45));
        assert_eq!(r.long_side(), 100);
        assert_eq!(r.area(), 5_000);
    }

    #[test]
    fn test_contains_point_edges_exclusive() {
        let r = Region::new(10, 10, 10, 10).unwrap();
        assert!(r.contains_point(Point { x: 10, y: 10 }));
        assert!(r.contains_point(Point { x: 19, y: 19 }));
        assert!(!r.contains_point(Point { x: 20, y: 10 }));
        assert!(!r.contains_point(Point { x: 9, y: 10 }));
    }

    #[test]
    fn test_intersection() {
        let a = Region::new(0, 0, 100, 100).unwrap();
        let b = Region::new(50, 50, 100, 100).unwrap();
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Region::new(50, 50, 50, 50).unwrap());

        let c = Region::new(200, 200, 10, 10).unwrap();
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_validate_in_bounds() {
        let bounds = Size::new(1000, 800).unwrap();
        let r = Region::new(0, 0, 1000, 800).unwrap();
        assert!(validate(r, bounds, true).unwrap());
    }

    #[test]
    fn test_validate_strict_errors_with_context() {
        let bounds = Size::new(1000, 800).unwrap();
        let r = Region::new(900, 700, 200, 200).unwrap();
        let err = validate(r, bounds, true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("right edge (1100)"));
        assert!(msg.contains("bottom edge (900)"));
        assert!(msg.contains("bounds=1000x800"));
    }

    #[test]
    fn test_validate_lenient_returns_false() {
        let bounds = Size::new(1000, 800).unwrap();
        let r = Region::new(900, 0, 200, 100).unwrap();
        assert!(!validate(r, bounds, false).unwrap());
    }

    #[test]
    fn test_clamp_overhanging_region() {
        let bounds = Size::new(1000, 1000).unwrap();
        let clamped = clamp_region(Region::new(900, 900, 200, 200).unwrap(), bounds);
        assert_eq!(clamped, Region::new(900, 900, 100, 100).unwrap());
    }

    #[test]
    fn test_clamp_origin_outside_bounds() {
        let bounds = Size::new(1000, 1000).unwrap();
        let clamped = clamp_region(Region::new(2000, 3000, 50, 50).unwrap(), bounds);
        assert_eq!(clamped.x, 999);
        assert_eq!(clamped.y, 999);
        assert_eq!((clamped.width, clamped.height), (1, 1));
    }

    #[test]
    fn test_clamp_is_idempotent() {
        let bounds = Size::new(777, 555).unwrap();
        for region in [
            Region::new(0, 0, 10_000, 10_000).unwrap(),
            Region::new(770, 550, 50, 50).unwrap(),
            Region::new(100, 100, 10, 10).unwrap(),
        ] {
            let once = clamp_region(region, bounds);
            let twice = clamp_region(once, bounds);
            assert_eq!(once, twice);
            assert!(validate(once, bounds, false).unwrap());
        }
    }
}
