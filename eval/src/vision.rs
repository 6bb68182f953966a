//! Tissue segmentation and patch sampling for the patch baselines.
//!
//! Segmentation thresholds the HSV saturation channel with Otsu's method
//! (stained tissue is saturated, glass background is not), closes small
//! holes, and drops tiny connected components. The sampler draws patch
//! centers uniformly from tissue pixels with a per-run seed so repeated
//! invocations are reproducible.

use anyhow::{Result, bail};
use giant_core::Region;
use giant_wsi::SlideMetadata;
use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;
use imageproc::region_labelling::{Connectivity, connected_components};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Connected components below this area (in mask pixels) are noise.
const MIN_TISSUE_AREA: u32 = 100;

/// Closing radius for the morphological hole fill.
const CLOSE_RADIUS: u8 = 2;

/// Binary tissue mask (255 = tissue) at thumbnail scale.
pub fn segment_tissue(thumbnail: &RgbImage) -> Result<GrayImage> {
    let (w, h) = thumbnail.dimensions();
    if w == 0 || h == 0 {
        bail!("thumbnail must be non-empty");
    }

    let saturation = saturation_channel(thumbnail);
    let level = otsu_level(&saturation);
    let mask = threshold(&saturation, level, ThresholdType::Binary);
    let mask = close(&mask, Norm::LInf, CLOSE_RADIUS);

    Ok(remove_small_components(&mask))
}

/// HSV saturation per pixel, scaled to 0-255.
fn saturation_channel(image: &RgbImage) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        let [r, g, b] = src.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let sat = if max == 0 {
            0
        } else {
            (u32::from(max - min) * 255 / u32::from(max)) as u8
        };
        dst.0 = [sat];
    }
    out
}

fn remove_small_components(mask: &GrayImage) -> GrayImage {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut areas = vec![0u32; max_label + 1];
    for p in labels.pixels() {
        areas[p.0[0] as usize] += 1;
    }

    let mut out = mask.clone();
    for (label, px) in labels.pixels().zip(out.pixels_mut()) {
        let id = label.0[0] as usize;
        if id == 0 || areas[id] < MIN_TISSUE_AREA {
            px.0 = [0];
        }
    }
    out
}

/// Sample `n_patches` square regions of `patch_size` Level-0 pixels centered
/// on tissue, clamped inside the slide.
pub fn sample_patches(
    mask: &GrayImage,
    metadata: &SlideMetadata,
    n_patches: usize,
    patch_size: u32,
    seed: u64,
) -> Result<Vec<Region>> {
    if n_patches == 0 || patch_size == 0 {
        bail!("n_patches and patch_size must be positive");
    }

    let tissue: Vec<(u32, u32)> = mask
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] > 0)
        .map(|(x, y, _)| (x, y))
        .collect();
    if tissue.is_empty() {
        bail!("no tissue detected in slide");
    }

    let scale_x = f64::from(metadata.width) / f64::from(mask.width());
    let scale_y = f64::from(metadata.height) / f64::from(mask.height());
    let patch_w = patch_size.min(metadata.width);
    let patch_h = patch_size.min(metadata.height);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut patches = Vec::with_capacity(n_patches);
    for _ in 0..n_patches {
        let (tx, ty) = tissue[rng.random_range(0..tissue.len())];
        let cx = (f64::from(tx) * scale_x) as i64;
        let cy = (f64::from(ty) * scale_y) as i64;

        let x = (cx - i64::from(patch_w) / 2)
            .clamp(0, i64::from(metadata.width - patch_w)) as u32;
        let y = (cy - i64::from(patch_h) / 2)
            .clamp(0, i64::from(metadata.height - patch_h)) as u32;
        patches.push(Region::new(x, y, patch_w, patch_h)?);
    }
    Ok(patches)
}

/// Tile patches into a single grid image, `cols` across, black background.
pub fn patch_collage(patches: &[RgbImage], patch_size: u32, cols: u32) -> Result<RgbImage> {
    if patches.is_empty() {
        bail!("patches must not be empty");
    }
    if patch_size == 0 || cols == 0 {
        bail!("patch_size and cols must be positive");
    }

    let rows = (patches.len() as u32).div_ceil(cols);
    let mut collage = RgbImage::new(cols * patch_size, rows * patch_size);
    for (idx, patch) in patches.iter().enumerate() {
        let col = idx as u32 % cols;
        let row = idx as u32 / cols;
        imageops::replace(
            &mut collage,
            patch,
            i64::from(col * patch_size),
            i64::from(row * patch_size),
        );
    }
    Ok(collage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(width: u32, height: u32) -> SlideMetadata {
        SlideMetadata {
            path: "/slides/t.svs".into(),
            width,
            height,
            level_count: 1,
            level_dimensions: vec![(width, height)],
            level_downsamples: vec![1.0],
            vendor: "test".into(),
            mpp: None,
        }
    }

    /// White background with a saturated red block in the top-left quadrant.
    fn synthetic_thumbnail() -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if x < 40 && y < 40 {
                image::Rgb([200, 20, 20])
            } else {
                image::Rgb([250, 250, 250])
            }
        })
    }

    #[test]
    fn test_segmentation_finds_stained_block() {
        let mask = segment_tissue(&synthetic_thumbnail()).unwrap();
        assert!(mask.get_pixel(20, 20).0[0] > 0, "tissue center missed");
        assert_eq!(mask.get_pixel(80, 80).0[0], 0, "background marked as tissue");
    }

    #[test]
    fn test_small_specks_removed() {
        // A 3x3 speck is far below the area threshold.
        let mut img = RgbImage::from_pixel(100, 100, image::Rgb([250, 250, 250]));
        for y in 50..53 {
            for x in 50..53 {
                img.put_pixel(x, y, image::Rgb([200, 20, 20]));
            }
        }
        let mask = segment_tissue(&img).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_sampler_is_deterministic_and_in_bounds() {
        let mask = segment_tissue(&synthetic_thumbnail()).unwrap();
        let meta = metadata(10_000, 10_000);

        let a = sample_patches(&mask, &meta, 8, 224, 7).unwrap();
        let b = sample_patches(&mask, &meta, 8, 224, 7).unwrap();
        assert_eq!(a, b);

        let c = sample_patches(&mask, &meta, 8, 224, 8).unwrap();
        assert_ne!(a, c);

        for patch in &a {
            assert_eq!((patch.width, patch.height), (224, 224));
            assert!(patch.right() <= 10_000);
            assert!(patch.bottom() <= 10_000);
        }
    }

    #[test]
    fn test_sampler_clamps_patches_on_small_slides() {
        let mask = segment_tissue(&synthetic_thumbnail()).unwrap();
        let meta = metadata(100, 100);
        let patches = sample_patches(&mask, &meta, 4, 224, 1).unwrap();
        for patch in patches {
            assert_eq!((patch.x, patch.y), (0, 0));
            assert_eq!((patch.width, patch.height), (100, 100));
        }
    }

    #[test]
    fn test_sampler_errors_without_tissue() {
        let blank = RgbImage::from_pixel(50, 50, image::Rgb([250, 250, 250]));
        let mask = segment_tissue(&blank).unwrap();
        let meta = metadata(1_000, 1_000);
        assert!(sample_patches(&mask, &meta, 4, 224, 1).is_err());
    }

    #[test]
    fn test_collage_layout() {
        let patches: Vec<RgbImage> = (0..7).map(|_| RgbImage::new(32, 32)).collect();
        let collage = patch_collage(&patches, 32, 3).unwrap();
        assert_eq!(collage.dimensions(), (96, 96));
        assert!(patch_collage(&[], 32, 3).is_err());
    }
}
