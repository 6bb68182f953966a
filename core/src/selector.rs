//! Pyramid level selection.
//!
//! Picks the level whose projected region long side is closest to
//! `target_size / bias`; dividing by a bias below one pulls selection toward
//! finer levels so the later resample is a downscale. If the chosen level
//! still projects below `target_size`, selection walks toward level 0 until
//! the target is met.

use anyhow::{Result, bail};
use giant_wsi::SlideMetadata;

use crate::geometry::Region;

/// Outcome of level selection for one crop request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedLevel {
    pub level: usize,
    pub downsample: f64,
}

/// Select the pyramid level to read `region` from.
///
/// Guarantees that either `region.long_side() / downsample >= target_size` or
/// the selected level is 0, so the crop pipeline never has to upsample.
pub fn select_level(
    region: Region,
    metadata: &SlideMetadata,
    target_size: u32,
    bias: f64,
) -> Result<SelectedLevel> {
    if target_size == 0 {
        bail!("target_size must be positive");
    }
    if bias <= 0.0 {
        bail!("bias must be positive, got {bias}");
    }
    if metadata.level_downsamples.is_empty() {
        bail!("slide metadata has no pyramid levels");
    }

    let long_side = f64::from(region.long_side());
    let target_native = f64::from(target_size) / bias;

    // Closest projected size wins; ties go to the finer level, which the
    // ascending iteration order gives us via strict comparison.
    let mut best_k = 0usize;
    let mut best_diff = f64::INFINITY;
    for (k, &ds) in metadata.level_downsamples.iter().enumerate() {
        let size_at_level = long_side / ds;
        let diff = (size_at_level - target_native).abs();
        if diff < best_diff {
            best_diff = diff;
            best_k = k;
        }
    }

    // Undershoot correction: never settle on a level that projects below the
    // target while a finer one exists.
    while best_k > 0 && long_side / metadata.level_downsamples[best_k] < f64::from(target_size) {
        best_k -= 1;
    }

    Ok(SelectedLevel {
        level: best_k,
        downsample: metadata.level_downsamples[best_k],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(downsamples: &[f64]) -> SlideMetadata {
        let width = 100_000u32;
        let height = 80_000u32;
        SlideMetadata {
            path: "/slides/test.svs".into(),
            width,
            height,
            level_count: downsamples.len(),
            level_dimensions: downsamples
                .iter()
                .map(|d| {
                    (
                        (f64::from(width) / d) as u32,
                        (f64::from(height) / d) as u32,
                    )
                })
                .collect(),
            level_downsamples: downsamples.to_vec(),
            vendor: "test".into(),
            mpp: None,
        }
    }

    fn region_with_long_side(side: u32) -> Region {
        Region::new(0, 0, side, side / 2).unwrap()
    }

    #[test]
    fn test_standard_selection() {
        // Long side 10000, downsamples [1, 4, 16], target 1000, bias 0.85:
        // level 1 projects 2500 (>= 1000); level 2 would project 625.
        let meta = metadata(&[1.0, 4.0, 16.0]);
        let selected = select_level(region_with_long_side(10_000), &meta, 1000, 0.85).unwrap();
        assert_eq!(selected.level, 1);
        assert_eq!(selected.downsample, 4.0);
    }

    #[test]
    fn test_undershoot_correction_moves_finer() {
        // Long side 2000 with [1, 4]: level 1 projects 500 < 1000, so the
        // correction walks back to level 0.
        let meta = metadata(&[1.0, 4.0]);
        let selected = select_level(region_with_long_side(2_000), &meta, 1000, 0.85).unwrap();
        assert_eq!(selected.level, 0);
        assert_eq!(selected.downsample, 1.0);
    }

    #[test]
    fn test_small_region_stays_level0() {
        let meta = metadata(&[1.0, 4.0, 16.0]);
        let selected = select_level(region_with_long_side(500), &meta, 1000, 0.85).unwrap();
        assert_eq!(selected.level, 0);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let meta = metadata(&[1.0, 4.0]);
        let region = region_with_long_side(1_000);
        assert!(select_level(region, &meta, 0, 0.85).is_err());
        assert!(select_level(region, &meta, 1000, 0.0).is_err());
        assert!(select_level(region, &meta, 1000, -1.0).is_err());
    }

    #[test]
    fn test_never_upsamples_across_sweep() {
        // For any combination: projected size at the selected level meets the
        // target, or the selected level is 0.
        let pyramids: [&[f64]; 4] = [
            &[1.0],
            &[1.0, 2.0, 4.0, 8.0, 16.0],
            &[1.0, 4.0, 16.0, 64.0],
            &[1.0, 3.0, 9.1, 33.4],
        ];
        let sides = [50u32, 400, 1_000, 2_400, 10_000, 90_000];
        let targets = [250u32, 500, 1000];
        let biases = [0.5, 0.85, 1.0];

        for pyramid in pyramids {
            let meta = metadata(pyramid);
            for &side in &sides {
                for &target in &targets {
                    for &bias in &biases {
                        let sel =
                            select_level(region_with_long_side(side), &meta, target, bias).unwrap();
                        let projected = f64::from(side) / sel.downsample;
                        assert!(
                            projected >= f64::from(target) || sel.level == 0,
                            "upsample required: side={side} target={target} bias={bias} \
                             level={} projected={projected}",
                            sel.level
                        );
                    }
                }
            }
        }
    }
}
