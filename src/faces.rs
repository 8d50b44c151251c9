//! Face counting with an OpenCV Haar cascade
//!
//! Reads the stock `haarcascade_frontalface_default.xml` (new storage
//! format) and runs the boosted cascade over an image pyramid on a
//! grayscale copy. Detection constants are fixed:
//!
//! - scale factor 1.1 between pyramid levels
//! - at least 5 overlapping hits before a region counts
//! - 30x30 minimum window
//!
//! Windows of one pyramid level are evaluated in parallel across rows.

use image::{imageops, DynamicImage, GrayImage};
use quick_xml::events::Event;
use quick_xml::Reader;
use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::imaging;

pub const SCALE_FACTOR: f64 = 1.1;
pub const MIN_NEIGHBORS: usize = 5;
pub const MIN_WINDOW: u32 = 30;
const GROUP_EPS: f64 = 0.2;
const THRESHOLD_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    weight: f64,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone, Default)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// Loaded cascade, immutable and shareable across threads
pub struct FaceDetector {
    width: u32,
    height: u32,
    stages: Vec<Stage>,
    features: Vec<Vec<WeightedRect>>,
}

impl FaceDetector {
    pub fn load(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        let detector = Self::from_xml(&xml)?;
        debug!(
            "Loaded cascade {} ({} stages, {} features)",
            path.display(),
            detector.stages.len(),
            detector.features.len()
        );
        Ok(detector)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut feature_type = None;
        let mut width = 0u32;
        let mut height = 0u32;
        let mut stages: Vec<Stage> = Vec::new();
        let mut features: Vec<Vec<WeightedRect>> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "_" {
                        match path.last().map(String::as_str) {
                            Some("stages") => stages.push(Stage::default()),
                            Some("weakClassifiers") => stage_mut(&mut stages)?
                                .classifiers
                                .push(WeakClassifier::default()),
                            Some("features") => features.push(Vec::new()),
                            _ => {}
                        }
                    }
                    path.push(name);
                }
                Ok(Event::End(_)) => {
                    path.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(xml_error)?;
                    let text = text.trim();
                    let leaf = path.last().map(String::as_str).unwrap_or("");
                    let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
                    match (parent, leaf) {
                        (Some("cascade"), "featureType") => feature_type = Some(text.to_string()),
                        (Some("cascade"), "width") => width = parse_num(text)?,
                        (Some("cascade"), "height") => height = parse_num(text)?,
                        (Some("_"), "stageThreshold") => {
                            stage_mut(&mut stages)?.threshold = parse_num::<f64>(text)? - THRESHOLD_EPS
                        }
                        (Some("_"), "internalNodes") => {
                            let values = parse_list::<f64>(text)?;
                            if values.len() % 4 != 0 {
                                return Err(cascade_error("internalNodes must hold groups of 4"));
                            }
                            classifier_mut(&mut stages)?.nodes = values
                                .chunks(4)
                                .map(|c| Node {
                                    left: c[0] as i32,
                                    right: c[1] as i32,
                                    feature: c[2] as usize,
                                    threshold: c[3],
                                })
                                .collect();
                        }
                        (Some("_"), "leafValues") => {
                            classifier_mut(&mut stages)?.leaves = parse_list(text)?
                        }
                        (Some("rects"), "_") => {
                            let v = parse_list::<f64>(text)?;
                            if v.len() != 5 {
                                return Err(cascade_error("feature rect needs x y w h weight"));
                            }
                            let rects = features
                                .last_mut()
                                .ok_or_else(|| cascade_error("rect outside feature"))?;
                            rects.push(WeightedRect {
                                x: v[0] as u32,
                                y: v[1] as u32,
                                w: v[2] as u32,
                                h: v[3] as u32,
                                weight: v[4],
                            });
                        }
                        (Some("_"), "tilted") if text != "0" => {
                            return Err(MediaError::Unsupported(
                                "tilted Haar features".to_string(),
                            ))
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(xml_error(e)),
            }
        }

        match feature_type.as_deref() {
            Some("HAAR") => {}
            Some(other) => {
                return Err(MediaError::Unsupported(format!("{} cascade", other)))
            }
            None => return Err(cascade_error("no new-format cascade found")),
        }
        if width < 3 || height < 3 || stages.is_empty() {
            return Err(cascade_error("empty cascade"));
        }
        for classifier in stages.iter().flat_map(|s| &s.classifiers) {
            for node in &classifier.nodes {
                let in_range = |i: i32| {
                    if i > 0 {
                        (i as usize) < classifier.nodes.len()
                    } else {
                        ((-i) as usize) < classifier.leaves.len()
                    }
                };
                if node.feature >= features.len() || !in_range(node.left) || !in_range(node.right)
                {
                    return Err(cascade_error("node references out of range"));
                }
            }
            if classifier.nodes.is_empty() {
                return Err(cascade_error("weak classifier without nodes"));
            }
        }
        for rect in features.iter().flatten() {
            if rect.x + rect.w > width || rect.y + rect.h > height {
                return Err(cascade_error("feature rect outside window"));
            }
        }

        Ok(Self { width, height, stages, features })
    }

    /// Number of grouped detections
    pub fn count_faces(&self, image: &DynamicImage) -> usize {
        self.detect(image).len()
    }

    pub fn detect(&self, image: &DynamicImage) -> Vec<FaceRect> {
        let gray = imaging::to_gray(&image.to_rgb8());
        let (img_w, img_h) = gray.dimensions();
        let mut candidates = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let win_w = (self.width as f64 * factor).round() as u32;
            let win_h = (self.height as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w <= self.width || scaled_h <= self.height {
                break;
            }
            if win_w > img_w || win_h > img_h {
                break;
            }
            if win_w >= MIN_WINDOW && win_h >= MIN_WINDOW {
                let level = if factor == 1.0 {
                    gray.clone()
                } else {
                    imageops::resize(&gray, scaled_w, scaled_h, imageops::FilterType::Triangle)
                };
                candidates.extend(self.scan_level(&level, factor, win_w, win_h));
            }
            factor *= SCALE_FACTOR;
        }

        group_rectangles(&candidates, MIN_NEIGHBORS, GROUP_EPS)
    }

    fn scan_level(&self, level: &GrayImage, factor: f64, win_w: u32, win_h: u32) -> Vec<FaceRect> {
        let integral = Integral::new(level);
        let range_w = level.width() - self.width;
        let range_h = level.height() - self.height;
        let step = if factor > 2.0 { 1 } else { 2 };

        (0..range_h)
            .into_par_iter()
            .filter(|y| y % step == 0)
            .flat_map_iter(|y| {
                let mut hits = Vec::new();
                let mut x = 0;
                while x < range_w {
                    let result = self.evaluate(&integral, x, y);
                    if result > 0 {
                        hits.push(FaceRect {
                            x: (x as f64 * factor).round() as i32,
                            y: (y as f64 * factor).round() as i32,
                            width: win_w as i32,
                            height: win_h as i32,
                        });
                    } else if result == 0 {
                        // rejected by the first stage
                        x += step;
                    }
                    x += step;
                }
                hits
            })
            .collect()
    }

    /// 1 when every stage accepts, otherwise minus the rejecting stage index
    fn evaluate(&self, ii: &Integral, x: u32, y: u32) -> i32 {
        let inner_w = self.width - 2;
        let inner_h = self.height - 2;
        let area = (inner_w * inner_h) as f64;
        let sum = ii.sum(x + 1, y + 1, inner_w, inner_h);
        let sq = ii.sq_sum(x + 1, y + 1, inner_w, inner_h);
        let variance = area * sq - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for (index, stage) in self.stages.iter().enumerate() {
            let mut total = 0.0;
            for classifier in &stage.classifiers {
                let mut idx = 0i32;
                loop {
                    let node = &classifier.nodes[idx as usize];
                    let value = self.feature_value(ii, node.feature, x, y) / norm;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        total += classifier.leaves[(-idx) as usize];
                        break;
                    }
                }
            }
            if total < stage.threshold {
                return -(index as i32);
            }
        }
        1
    }

    fn feature_value(&self, ii: &Integral, feature: usize, x: u32, y: u32) -> f64 {
        self.features[feature]
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.w, r.h))
            .sum()
    }
}

fn stage_mut(stages: &mut [Stage]) -> Result<&mut Stage> {
    stages.last_mut().ok_or_else(|| cascade_error("value outside stage"))
}

fn classifier_mut(stages: &mut [Stage]) -> Result<&mut WeakClassifier> {
    stage_mut(stages)?
        .classifiers
        .last_mut()
        .ok_or_else(|| cascade_error("value outside weak classifier"))
}

fn parse_num<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.parse()
        .map_err(|_| cascade_error(&format!("bad number {:?}", text)))
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Result<Vec<T>> {
    text.split_whitespace().map(parse_num).collect()
}

fn cascade_error(msg: &str) -> MediaError {
    MediaError::ProcessingError(format!("Invalid cascade: {}", msg))
}

fn xml_error(e: quick_xml::Error) -> MediaError {
    MediaError::ProcessingError(format!("Cascade XML error: {}", e))
}

/// Summed-area tables of pixel values and their squares
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = gray.get_pixel(x as u32, y as u32).0[0] as f64;
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn rect(table: &[f64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
            + table[y0 * stride + x0]
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sq, self.stride, x, y, w, h)
    }
}

fn similar(a: &FaceRect, b: &FaceRect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    (a.x - b.x).abs() as f64 <= delta
        && (a.y - b.y).abs() as f64 <= delta
        && (a.x + a.width - b.x - b.width).abs() as f64 <= delta
        && (a.y + a.height - b.y - b.height).abs() as f64 <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster overlapping hits, average each cluster, keep clusters with more
/// than `threshold` members and drop ones nested in a stronger neighbour.
pub fn group_rectangles(rects: &[FaceRect], threshold: usize, eps: f64) -> Vec<FaceRect> {
    if rects.is_empty() {
        return Vec::new();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut totals: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let class = match roots.iter().position(|&x| x == root) {
            Some(c) => c,
            None => {
                roots.push(root);
                totals.push([0.0; 4]);
                counts.push(0);
                roots.len() - 1
            }
        };
        let t = &mut totals[class];
        t[0] += r.x as f64;
        t[1] += r.y as f64;
        t[2] += r.width as f64;
        t[3] += r.height as f64;
        counts[class] += 1;
    }

    let averaged: Vec<FaceRect> = totals
        .iter()
        .zip(&counts)
        .map(|(t, &n)| {
            let s = 1.0 / n as f64;
            FaceRect {
                x: (t[0] * s).round() as i32,
                y: (t[1] * s).round() as i32,
                width: (t[2] * s).round() as i32,
                height: (t[3] * s).round() as i32,
            }
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= threshold {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            grouped.push(*r1);
        }
    }
    grouped
}
