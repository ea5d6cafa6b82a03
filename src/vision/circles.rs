//! Callout circle localization
//!
//! Gradient-voting Hough transform tuned for the circular callout bubbles
//! on construction sheets. Edge pixels vote along their gradient direction
//! across the configured radius band; vote peaks become center candidates,
//! and each center's radius is the mode of supporting edge distances.
//!
//! Parameters are fixed per deployment (see `CircleConfig`), not adaptive:
//! callout bubbles are drawn at a consistent plotted size.

use crate::config::CircleConfig;
use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use tracing::debug;

/// Localize circles in a grayscale image.
///
/// Returns (center_x, center_y, radius) triples ordered by accumulator
/// strength. Never fails: an empty or degenerate input yields an empty
/// list.
pub fn locate_circles(gray: &GrayImage, cfg: &CircleConfig) -> Vec<(i32, i32, i32)> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || cfg.min_radius == 0 || cfg.max_radius < cfg.min_radius {
        return Vec::new();
    }
    // Nothing in the radius band can fit.
    if w < cfg.min_radius || h < cfg.min_radius {
        return Vec::new();
    }

    let high = cfg.edge_threshold;
    let edges = canny(gray, high / 2.0, high);

    // Gradient direction from a lightly smoothed image; raw scan noise
    // scatters the votes otherwise.
    let smoothed = gaussian_blur_f32(gray, 1.4);
    let gx = horizontal_sobel(&smoothed);
    let gy = vertical_sobel(&smoothed);

    let dp = cfg.accumulator_resolution.max(1.0);
    let acc_w = (w as f32 / dp).ceil() as usize + 1;
    let acc_h = (h as f32 / dp).ceil() as usize + 1;
    let mut acc = vec![0u32; acc_w * acc_h];

    let mut edge_points: Vec<(u32, u32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if edges.get_pixel(x, y).0[0] == 0 {
                continue;
            }
            let dx = gx.get_pixel(x, y).0[0] as f32;
            let dy = gy.get_pixel(x, y).0[0] as f32;
            let mag = (dx * dx + dy * dy).sqrt();
            if mag < 1e-3 {
                continue;
            }
            edge_points.push((x, y));

            let (ux, uy) = (dx / mag, dy / mag);
            for r in cfg.min_radius..=cfg.max_radius {
                let rf = r as f32;
                for sign in [-1.0f32, 1.0] {
                    let cx = x as f32 + sign * ux * rf;
                    let cy = y as f32 + sign * uy * rf;
                    if cx < 0.0 || cy < 0.0 || cx >= w as f32 || cy >= h as f32 {
                        continue;
                    }
                    let ax = (cx / dp) as usize;
                    let ay = (cy / dp) as usize;
                    acc[ay * acc_w + ax] += 1;
                }
            }
        }
    }

    // Pool votes over a 3x3 window; gradient-direction jitter spreads a
    // center's votes across adjacent cells and pooling re-concentrates
    // them before thresholding.
    let mut pooled = vec![0u32; acc_w * acc_h];
    for ay in 0..acc_h {
        for ax in 0..acc_w {
            let mut sum = 0u32;
            for ny in ay.saturating_sub(1)..=(ay + 1).min(acc_h - 1) {
                for nx in ax.saturating_sub(1)..=(ax + 1).min(acc_w - 1) {
                    sum += acc[ny * acc_w + nx];
                }
            }
            pooled[ay * acc_w + ax] = sum;
        }
    }

    // Vote peaks: local maxima at or above the accumulator threshold,
    // strongest first.
    let mut peaks: Vec<(u32, usize, usize)> = Vec::new();
    for ay in 0..acc_h {
        for ax in 0..acc_w {
            let votes = pooled[ay * acc_w + ax];
            if votes < cfg.accumulator_threshold {
                continue;
            }
            let mut is_peak = true;
            'nb: for ny in ay.saturating_sub(1)..=(ay + 1).min(acc_h - 1) {
                for nx in ax.saturating_sub(1)..=(ax + 1).min(acc_w - 1) {
                    if (ny, nx) != (ay, ax) && pooled[ny * acc_w + nx] > votes {
                        is_peak = false;
                        break 'nb;
                    }
                }
            }
            if is_peak {
                peaks.push((votes, ax, ay));
            }
        }
    }
    peaks.sort_by(|a, b| b.0.cmp(&a.0));

    // Thin by minimum center distance, strongest candidates win.
    let min_dist_sq = (cfg.min_center_distance as f32).powi(2);
    let mut centers: Vec<(f32, f32)> = Vec::new();
    for (_votes, ax, ay) in peaks {
        let cx = (ax as f32 + 0.5) * dp;
        let cy = (ay as f32 + 0.5) * dp;
        let crowded = centers
            .iter()
            .any(|(ox, oy)| (cx - ox).powi(2) + (cy - oy).powi(2) < min_dist_sq);
        if !crowded {
            centers.push((cx, cy));
        }
    }

    // Radius per center: mode of supporting edge-pixel distances in band.
    let band = (cfg.max_radius - cfg.min_radius + 1) as usize;
    let mut results = Vec::with_capacity(centers.len());
    for (cx, cy) in centers {
        let mut hist = vec![0u32; band];
        for &(ex, ey) in &edge_points {
            let d = ((ex as f32 - cx).powi(2) + (ey as f32 - cy).powi(2)).sqrt();
            let r = d.round() as i64;
            if r >= cfg.min_radius as i64 && r <= cfg.max_radius as i64 {
                hist[(r - cfg.min_radius as i64) as usize] += 1;
            }
        }
        if let Some((idx, _support)) = hist
            .iter()
            .enumerate()
            .max_by_key(|(_, support)| **support)
            .filter(|(_, support)| **support > 0)
        {
            let r = cfg.min_radius as i64 + idx as i64;
            results.push((cx.round() as i32, cy.round() as i32, r as i32));
        }
    }

    debug!("circle localization: {} candidates", results.len());
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    fn canvas(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([255]))
    }

    #[test]
    fn test_empty_image_yields_nothing() {
        let cfg = CircleConfig::default();
        assert!(locate_circles(&GrayImage::new(0, 0), &cfg).is_empty());
    }

    #[test]
    fn test_blank_image_yields_nothing() {
        let cfg = CircleConfig::default();
        assert!(locate_circles(&canvas(300, 300), &cfg).is_empty());
    }

    #[test]
    fn test_locates_single_disc() {
        let cfg = CircleConfig::default();
        let mut img = canvas(400, 400);
        draw_filled_circle_mut(&mut img, (200, 200), 60, Luma([0]));

        let found = locate_circles(&img, &cfg);
        assert!(!found.is_empty(), "disc of radius 60 not detected");
        let (x, y, r) = found[0];
        assert!((x - 200).abs() <= 8, "center x off: {x}");
        assert!((y - 200).abs() <= 8, "center y off: {y}");
        assert!((r - 60).abs() <= 8, "radius off: {r}");
    }

    #[test]
    fn test_radius_band_excludes_small_disc() {
        // Radius 20 is below the configured band; detector must not
        // invent an in-band circle for it.
        let cfg = CircleConfig::default();
        let mut img = canvas(400, 400);
        draw_filled_circle_mut(&mut img, (200, 200), 20, Luma([0]));

        let found = locate_circles(&img, &cfg);
        assert!(found.is_empty(), "out-of-band disc detected: {found:?}");
    }

    #[test]
    fn test_two_discs_both_found() {
        let cfg = CircleConfig::default();
        let mut img = canvas(600, 400);
        draw_filled_circle_mut(&mut img, (150, 200), 55, Luma([0]));
        draw_filled_circle_mut(&mut img, (430, 200), 70, Luma([0]));

        let found = locate_circles(&img, &cfg);
        assert!(found.len() >= 2, "expected two discs, got {found:?}");
        let near = |cx: i32, cy: i32| {
            found
                .iter()
                .any(|&(x, y, _)| (x - cx).abs() <= 10 && (y - cy).abs() <= 10)
        };
        assert!(near(150, 200));
        assert!(near(430, 200));
    }
}
