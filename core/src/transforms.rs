//! Coordinate transforms between Level-0 and pyramid levels.
//!
//! Downward transforms divide by the level's downsample factor and floor;
//! size variants keep a minimum of one pixel per axis. A round trip
//! Level-0 → level → Level-0 lands within ±2·d of the original per axis,
//! which callers rely on when reporting regions back to the model.

use anyhow::{Result, bail};

use crate::geometry::{Point, Region, Size};

fn check_downsample(downsample: f64) -> Result<()> {
    if downsample <= 0.0 {
        bail!("downsample factor must be positive, got {downsample}");
    }
    Ok(())
}

/// Transform a Level-0 coordinate into a level's coordinate space.
pub fn level0_to_level(coord: (u32, u32), downsample: f64) -> Result<(u32, u32)> {
    check_downsample(downsample)?;
    Ok((
        (f64::from(coord.0) / downsample).floor() as u32,
        (f64::from(coord.1) / downsample).floor() as u32,
    ))
}

/// Transform a level coordinate back to Level-0.
pub fn level_to_level0(coord: (u32, u32), downsample: f64) -> Result<(u32, u32)> {
    check_downsample(downsample)?;
    Ok((
        (f64::from(coord.0) * downsample).floor() as u32,
        (f64::from(coord.1) * downsample).floor() as u32,
    ))
}

/// Size of a Level-0 extent at a level, floored with a 1 px minimum per axis.
pub fn size_at_level(size: (u32, u32), downsample: f64) -> Result<(u32, u32)> {
    check_downsample(downsample)?;
    Ok((
        ((f64::from(size.0) / downsample).floor() as u32).max(1),
        ((f64::from(size.1) / downsample).floor() as u32).max(1),
    ))
}

/// Level-0 size of an extent expressed in a level's pixels.
pub fn size_to_level0(size: (u32, u32), downsample: f64) -> Result<(u32, u32)> {
    check_downsample(downsample)?;
    Ok((
        (f64::from(size.0) * downsample).floor() as u32,
        (f64::from(size.1) * downsample).floor() as u32,
    ))
}

pub fn point_level0_to_level(point: Point, downsample: f64) -> Result<Point> {
    let (x, y) = level0_to_level((point.x, point.y), downsample)?;
    Ok(Point { x, y })
}

pub fn point_level_to_level0(point: Point, downsample: f64) -> Result<Point> {
    let (x, y) = level_to_level0((point.x, point.y), downsample)?;
    Ok(Point { x, y })
}

/// Transform both origin and extent of a region down to a level.
pub fn region_level0_to_level(region: Region, downsample: f64) -> Result<Region> {
    let (x, y) = level0_to_level((region.x, region.y), downsample)?;
    let (width, height) = size_at_level((region.width, region.height), downsample)?;
    Ok(Region {
        x,
        y,
        width,
        height,
    })
}

/// Transform both origin and extent of a region back to Level-0.
pub fn region_level_to_level0(region: Region, downsample: f64) -> Result<Region> {
    let (x, y) = level_to_level0((region.x, region.y), downsample)?;
    let (width, height) = size_to_level0((region.width, region.height), downsample)?;
    Ok(Region {
        x,
        y,
        width: width.max(1),
        height: height.max(1),
    })
}

pub fn size_level0_to_level(size: Size, downsample: f64) -> Result<Size> {
    let (width, height) = size_at_level((size.width, size.height), downsample)?;
    Ok(Size { width, height })
}
