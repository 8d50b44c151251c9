//! Rule-based scene tags
//!
//! Color share per hue band, edge density, and a circle count, all measured
//! on a copy downscaled to 400px so the percentage thresholds stay meaningful
//! across resolutions. Hue/saturation/value use the 8-bit OpenCV convention
//! (H in 0..=179, S and V in 0..=255).

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::debug;

use crate::error::Result;
use crate::imaging;

pub const ANALYSIS_MAX_DIM: u32 = 400;

/// Inclusive HSV band for one color tag
#[derive(Debug, Clone, Copy)]
pub struct ColorRange {
    pub tag: &'static str,
    pub lower: (u8, u8, u8),
    pub upper: (u8, u8, u8),
}

pub const COLOR_RANGES: &[ColorRange] = &[
    ColorRange { tag: "sky", lower: (90, 50, 50), upper: (130, 255, 255) },
    ColorRange { tag: "grass", lower: (35, 40, 40), upper: (85, 255, 255) },
    ColorRange { tag: "water", lower: (85, 50, 50), upper: (125, 255, 255) },
    ColorRange { tag: "sunset", lower: (0, 100, 100), upper: (25, 255, 255) },
    ColorRange { tag: "foliage", lower: (25, 30, 30), upper: (95, 255, 255) },
];

const COLOR_SHARE: f64 = 0.15;
const EDGE_MAGNITUDE: f64 = 100.0;
const EDGE_SHARE: f64 = 0.10;
const MIN_RADIUS: u32 = 10;
const MAX_RADIUS: u32 = 100;
const MIN_CENTER_DIST: f64 = 20.0;
const ACCUMULATOR_THRESHOLD: u32 = 30;
const CIRCLES_FOR_TAG: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub x: u32,
    pub y: u32,
    pub radius: u32,
}

#[derive(Debug, Default)]
pub struct SceneAnalyzer;

impl SceneAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Tags in fixed order; `general-scene` when nothing qualifies
    pub fn tags(&self, image: &DynamicImage) -> Result<Vec<String>> {
        let small = imaging::downscale_to_max(image, ANALYSIS_MAX_DIM)?;
        let mut tags: Vec<String> = color_tags(&small).into_iter().map(String::from).collect();

        let gray = imaging::to_gray(&small);
        let gradients = Gradients::sobel(&gray);
        let edge_share = gradients.edge_count() as f64 / gradients.len() as f64;
        if edge_share > EDGE_SHARE {
            tags.push("building/structure".to_string());
        }

        let circles = find_circles(&gradients);
        debug!("Scene: edge share {:.3}, {} circles", edge_share, circles.len());
        if circles.len() > CIRCLES_FOR_TAG {
            tags.push("circular-objects".to_string());
        }

        if tags.is_empty() {
            tags.push("general-scene".to_string());
        }
        Ok(tags)
    }
}

/// OpenCV-style 8-bit HSV
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f64, g as f64, b as f64);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;
    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }
    (
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().min(255.0) as u8,
        v as u8,
    )
}

fn color_tags(rgb: &RgbImage) -> Vec<&'static str> {
    let total = (rgb.width() * rgb.height()) as f64;
    if total == 0.0 {
        return Vec::new();
    }
    let mut counts = [0u64; 5];
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        for (count, range) in counts.iter_mut().zip(COLOR_RANGES) {
            if (range.lower.0..=range.upper.0).contains(&h)
                && (range.lower.1..=range.upper.1).contains(&s)
                && (range.lower.2..=range.upper.2).contains(&v)
            {
                *count += 1;
            }
        }
    }
    COLOR_RANGES
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count as f64 / total > COLOR_SHARE)
        .map(|(range, _)| range.tag)
        .collect()
}

/// 3x3 Sobel responses; border pixels stay zero
struct Gradients {
    width: u32,
    height: u32,
    gx: Vec<f64>,
    gy: Vec<f64>,
}

impl Gradients {
    fn sobel(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let mut gx = vec![0.0; (w * h) as usize];
        let mut gy = vec![0.0; (w * h) as usize];
        let p = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let i = (y * w + x) as usize;
                gx[i] = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
                    - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
                gy[i] = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
                    - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
            }
        }
        Self { width: w, height: h, gx, gy }
    }

    fn len(&self) -> usize {
        self.gx.len().max(1)
    }

    fn magnitude(&self, i: usize) -> f64 {
        self.gx[i].hypot(self.gy[i])
    }

    fn is_edge(&self, i: usize) -> bool {
        self.magnitude(i) > EDGE_MAGNITUDE
    }

    fn edge_count(&self) -> usize {
        (0..self.gx.len()).filter(|&i| self.is_edge(i)).count()
    }

    fn edges(&self) -> impl Iterator<Item = (u32, u32, usize)> + '_ {
        (0..self.gx.len())
            .filter(|&i| self.is_edge(i))
            .map(|i| (i as u32 % self.width, i as u32 / self.width, i))
    }
}

/// Hough-gradient circle search over edge pixels
fn find_circles(grad: &Gradients) -> Vec<Circle> {
    let (w, h) = (grad.width as i64, grad.height as i64);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let edges: Vec<(u32, u32, usize)> = grad.edges().collect();

    // Each edge pixel votes along its gradient line, both directions
    let mut acc = vec![0u32; (w * h) as usize];
    for &(x, y, i) in &edges {
        let mag = grad.magnitude(i);
        let (dx, dy) = (grad.gx[i] / mag, grad.gy[i] / mag);
        for sign in [-1.0, 1.0] {
            let mut last = None;
            for r in MIN_RADIUS..=MAX_RADIUS {
                let cx = (x as f64 + sign * dx * r as f64).round() as i64;
                let cy = (y as f64 + sign * dy * r as f64).round() as i64;
                if cx < 0 || cy < 0 || cx >= w || cy >= h {
                    break;
                }
                if last == Some((cx, cy)) {
                    continue;
                }
                last = Some((cx, cy));
                acc[(cy * w + cx) as usize] += 1;
            }
        }
    }

    let mut centers: Vec<(u32, u32, u32)> = Vec::new();
    for cy in 1..h - 1 {
        for cx in 1..w - 1 {
            let votes = acc[(cy * w + cx) as usize];
            if votes <= ACCUMULATOR_THRESHOLD {
                continue;
            }
            let is_peak = (-1..=1).all(|oy: i64| {
                (-1..=1).all(|ox: i64| acc[((cy + oy) * w + cx + ox) as usize] <= votes)
            });
            if is_peak {
                centers.push((cx as u32, cy as u32, votes));
            }
        }
    }
    centers.sort_by(|a, b| b.2.cmp(&a.2));

    let mut circles: Vec<Circle> = Vec::new();
    for (cx, cy, _) in centers {
        let too_close = circles.iter().any(|c| {
            let (ddx, ddy) = (c.x as f64 - cx as f64, c.y as f64 - cy as f64);
            ddx.hypot(ddy) < MIN_CENTER_DIST
        });
        if too_close {
            continue;
        }
        if let Some(radius) = best_radius(&edges, cx, cy) {
            circles.push(Circle { x: cx, y: cy, radius });
        }
    }
    circles
}

/// Radius with the most edge pixels, if it reaches the vote threshold
fn best_radius(edges: &[(u32, u32, usize)], cx: u32, cy: u32) -> Option<u32> {
    let mut hist = vec![0u32; (MAX_RADIUS + 1) as usize];
    for &(x, y, _) in edges {
        let d = (x as f64 - cx as f64).hypot(y as f64 - cy as f64).round() as u32;
        if (MIN_RADIUS..=MAX_RADIUS).contains(&d) {
            hist[d as usize] += 1;
        }
    }
    let (radius, support) = hist
        .iter()
        .enumerate()
        .max_by_key(|(r, count)| (**count, std::cmp::Reverse(*r)))?;
    (*support >= ACCUMULATOR_THRESHOLD).then_some(radius as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn split(top: Rgb<u8>, bottom: Rgb<u8>) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(200, 100, |_, y| if y < 50 { top } else { bottom }))
    }

    #[test]
    fn test_hsv_conversion() {
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
        assert_eq!(rgb_to_hsv(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(128, 128, 128), (0, 0, 128));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
    }

    #[test]
    fn test_uniform_gray_is_general_scene() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([128, 128, 128])));
        assert_eq!(SceneAnalyzer::new().tags(&img).unwrap(), vec!["general-scene"]);
    }

    #[test]
    fn test_blue_over_green() {
        let tags = SceneAnalyzer::new().tags(&split(Rgb([0, 0, 255]), Rgb([0, 200, 0]))).unwrap();
        assert_eq!(tags, vec!["sky", "grass", "water", "foliage"]);
    }

    #[test]
    fn test_small_share_does_not_tag() {
        // 10% orange band
        let img = RgbImage::from_fn(200, 100, |_, y| {
            if y < 10 {
                Rgb([255, 120, 0])
            } else {
                Rgb([128, 128, 128])
            }
        });
        let tags = SceneAnalyzer::new().tags(&DynamicImage::ImageRgb8(img)).unwrap();
        assert!(!tags.contains(&"sunset".to_string()));
    }

    #[test]
    fn test_dense_edges_tag_structure() {
        // 2px stripes make nearly every interior pixel an edge
        let img = RgbImage::from_fn(200, 200, |x, _| {
            if (x / 2) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let tags = SceneAnalyzer::new().tags(&DynamicImage::ImageRgb8(img)).unwrap();
        assert!(tags.contains(&"building/structure".to_string()));
    }

    #[test]
    fn test_discs_tag_circular_objects() {
        let centers = [(60i32, 60i32), (180, 60), (60, 180), (180, 180)];
        let img = RgbImage::from_fn(240, 240, |x, y| {
            let inside = centers.iter().any(|(cx, cy)| {
                let (dx, dy) = (x as i32 - cx, y as i32 - cy);
                dx * dx + dy * dy <= 25 * 25
            });
            if inside {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let gray = imaging::to_gray(&img);
        let circles = find_circles(&Gradients::sobel(&gray));
        assert!(circles.len() >= 4, "found {:?}", circles);
        for (cx, cy) in centers {
            assert!(circles.iter().any(|c| (c.x as i32 - cx).abs() <= 2
                && (c.y as i32 - cy).abs() <= 2
                && (c.radius as i32 - 25).abs() <= 2));
        }

        let tags = SceneAnalyzer::new().tags(&DynamicImage::ImageRgb8(img)).unwrap();
        assert!(tags.contains(&"circular-objects".to_string()));
    }
}
