//! Capture metadata extraction for still images
//!
//! Embedded metadata is inconsistent across encoders, so parsing goes through
//! an ordered list of independent parsers; the first one that succeeds wins.
//!
//! ## Parser Priority
//!
//! 1. **kamadak-exif** (primary) - Pure Rust, in-process
//! 2. **ExifTool** (fallback) - External binary, tolerant of odd containers
//!
//! Only `DateTimeOriginal` and GPS position are read. Video containers are
//! never parsed here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::{MediaError, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi"];

// ============================================================================
// Core Metadata Types
// ============================================================================

/// Coarse media category derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = extension_of(path);
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "Image",
            MediaKind::Video => "Video",
            MediaKind::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Image" => MediaKind::Image,
            "Video" => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the path carries one of the supported media extensions
pub fn is_supported(path: &Path) -> bool {
    MediaKind::from_path(path) != MediaKind::Unknown
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// GPS position in signed decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// What the pipeline reads from embedded image metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// `DateTimeOriginal` as stored, `YYYY:MM:DD HH:MM:SS`
    pub captured_at: Option<String>,
    pub gps: Option<GpsCoordinates>,
}

/// Convert degrees/minutes/seconds to signed decimal degrees.
/// South and West references flip the sign.
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
    apply_hemisphere(degrees + minutes / 60.0 + seconds / 3600.0, reference)
}

fn apply_hemisphere(value: f64, reference: &str) -> f64 {
    match reference.trim().trim_matches('"').to_ascii_uppercase().as_str() {
        "S" | "W" => -value.abs(),
        _ => value,
    }
}

// ============================================================================
// Parser Strategies
// ============================================================================

/// One way of reading capture metadata from an image file
pub trait ExifParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, path: &Path) -> Result<CaptureMetadata>;
}

/// Ordered parser list; the first successful result wins
pub struct ExifParserChain {
    parsers: Vec<Box<dyn ExifParser>>,
}

impl ExifParserChain {
    pub fn new(parsers: Vec<Box<dyn ExifParser>>) -> Self {
        Self { parsers }
    }

    /// kamadak-exif first, then the exiftool binary
    pub fn standard(exiftool: impl Into<PathBuf>) -> Self {
        Self::new(vec![
            Box::new(KamadakExifParser),
            Box::new(ExifToolParser::new(exiftool)),
        ])
    }

    pub fn parse(&self, path: &Path) -> Result<CaptureMetadata> {
        let mut failures = Vec::new();
        for parser in &self.parsers {
            match parser.parse(path) {
                Ok(meta) => {
                    debug!("{} parsed metadata for {}", parser.name(), path.display());
                    return Ok(meta);
                }
                Err(e) => {
                    debug!("{} failed on {}: {}", parser.name(), path.display(), e);
                    failures.push(format!("{}: {}", parser.name(), e));
                }
            }
        }
        Err(MediaError::ProcessingError(format!(
            "No metadata parser succeeded ({})",
            failures.join("; ")
        )))
    }
}

// ============================================================================
// kamadak-exif Backend (Pure Rust, primary)
// ============================================================================

pub struct KamadakExifParser;

impl ExifParser for KamadakExifParser {
    fn name(&self) -> &'static str {
        "kamadak-exif"
    }

    fn parse(&self, path: &Path) -> Result<CaptureMetadata> {
        use std::fs::File;
        use std::io::BufReader;

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let exif_data = exif::Reader::new()
            .read_from_container(&mut reader)
            .map_err(|e| MediaError::ProcessingError(format!("EXIF parse error: {}", e)))?;

        // display_value() reformats dates with dashes; keep the raw ASCII
        let captured_at = exif_data
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .and_then(|f| ascii_value(&f.value));

        Ok(CaptureMetadata {
            captured_at,
            gps: parse_exif_gps(&exif_data),
        })
    }
}

fn ascii_value(value: &exif::Value) -> Option<String> {
    match value {
        exif::Value::Ascii(v) if !v.is_empty() => {
            let s = String::from_utf8_lossy(&v[0]).trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        _ => None,
    }
}

/// Parse GPS from EXIF fields
fn parse_exif_gps(exif_data: &exif::Exif) -> Option<GpsCoordinates> {
    let lat = exif_data.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY)?;
    let lon = exif_data.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY)?;
    let lat_ref = exif_data
        .get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY)
        .and_then(|f| ascii_value(&f.value))
        .unwrap_or_else(|| "N".to_string());
    let lon_ref = exif_data
        .get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY)
        .and_then(|f| ascii_value(&f.value))
        .unwrap_or_else(|| "E".to_string());

    let parse_dms = |field: &exif::Field, reference: &str| -> Option<f64> {
        match &field.value {
            exif::Value::Rational(v) if v.len() >= 3 => Some(dms_to_decimal(
                v[0].to_f64(),
                v[1].to_f64(),
                v[2].to_f64(),
                reference,
            )),
            _ => None,
        }
    };

    let latitude = parse_dms(lat, &lat_ref)?;
    let longitude = parse_dms(lon, &lon_ref)?;
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }

    Some(GpsCoordinates { latitude, longitude })
}

// ============================================================================
// ExifTool Backend (fallback)
// ============================================================================

pub struct ExifToolParser {
    program: PathBuf,
}

impl ExifToolParser {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl ExifParser for ExifToolParser {
    fn name(&self) -> &'static str {
        "exiftool"
    }

    fn parse(&self, path: &Path) -> Result<CaptureMetadata> {
        let output = Command::new(&self.program)
            .arg("-j") // JSON output
            .arg("-n") // Numeric values (decimal GPS, raw refs)
            .args([
                "-DateTimeOriginal",
                "-GPSLatitude",
                "-GPSLatitudeRef",
                "-GPSLongitude",
                "-GPSLongitudeRef",
            ])
            .arg(path)
            .output()
            .map_err(|e| MediaError::DependencyNotFound(format!("exiftool: {}", e)))?;

        if !output.status.success() {
            return Err(MediaError::ProcessingError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let parsed: Vec<HashMap<String, serde_json::Value>> =
            serde_json::from_slice(&output.stdout)
                .map_err(|e| MediaError::ProcessingError(format!("JSON parse error: {}", e)))?;

        let tags = parsed
            .into_iter()
            .next()
            .ok_or_else(|| MediaError::ProcessingError("No metadata found".to_string()))?;

        Ok(parse_exiftool_tags(&tags))
    }
}

/// Map ExifTool `-j -n` output onto capture metadata
fn parse_exiftool_tags(tags: &HashMap<String, serde_json::Value>) -> CaptureMetadata {
    let get_str = |key: &str| -> Option<String> {
        tags.get(key).and_then(|v| match v {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    let get_f64 = |key: &str| -> Option<f64> {
        tags.get(key)
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    };

    let gps = match (get_f64("GPSLatitude"), get_f64("GPSLongitude")) {
        (Some(lat), Some(lon)) => Some(GpsCoordinates {
            latitude: apply_hemisphere(lat, &get_str("GPSLatitudeRef").unwrap_or_default()),
            longitude: apply_hemisphere(lon, &get_str("GPSLongitudeRef").unwrap_or_default()),
        }),
        _ => None,
    };

    CaptureMetadata {
        captured_at: get_str("DateTimeOriginal"),
        gps,
    }
}

// ============================================================================
// Tests
// ============================================================================

/// JPEG files with embedded EXIF, shared by tests across the crate
#[cfg(test)]
pub(crate) mod fixtures {
    use exif::experimental::Writer;
    use exif::{Field, In, Rational, Tag, Value};
    use std::io::Cursor;
    use std::path::Path;

    fn ascii(tag: Tag, text: &str) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![text.as_bytes().to_vec()]),
        }
    }

    fn dms(tag: Tag, d: u32, m: u32, s: u32) -> Field {
        let r = |num| Rational { num, denom: 1 };
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: Value::Rational(vec![r(d), r(m), r(s)]),
        }
    }

    /// Write a small JPEG taken at `captured_at` at 40°26'46"S 79°58'56"W
    pub(crate) fn write_tagged_jpeg(path: &Path, captured_at: &str) {
        let fields = [
            ascii(Tag::DateTimeOriginal, captured_at),
            ascii(Tag::GPSLatitudeRef, "S"),
            dms(Tag::GPSLatitude, 40, 26, 46),
            ascii(Tag::GPSLongitudeRef, "W"),
            dms(Tag::GPSLongitude, 79, 58, 56),
        ];
        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();
        let tiff = tiff.into_inner();

        let mut plain = Cursor::new(Vec::new());
        image::RgbImage::from_pixel(48, 32, image::Rgb([200, 120, 40]))
            .write_to(&mut plain, image::ImageFormat::Jpeg)
            .unwrap();
        let plain = plain.into_inner();

        // SOI, then an APP1 "Exif" segment, then the rest of the stream
        let mut jpeg = plain[..2].to_vec();
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend_from_slice(&tiff);
        jpeg.extend_from_slice(&plain[2..]);
        std::fs::write(path, jpeg).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;
    impl ExifParser for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn parse(&self, _path: &Path) -> Result<CaptureMetadata> {
            Err(MediaError::ProcessingError("corrupt".to_string()))
        }
    }

    struct Fixed(&'static str);
    impl ExifParser for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn parse(&self, _path: &Path) -> Result<CaptureMetadata> {
            Ok(CaptureMetadata {
                captured_at: Some(self.0.to_string()),
                gps: None,
            })
        }
    }

    #[test]
    fn test_gps_conversion_south() {
        let lat = dms_to_decimal(40.0, 26.0, 46.0, "S");
        assert!((lat - (-40.446111)).abs() < 1e-4, "got {}", lat);
    }

    #[test]
    fn test_gps_hemisphere_sign() {
        assert!(dms_to_decimal(10.0, 30.0, 0.0, "N") > 0.0);
        assert!(dms_to_decimal(10.0, 30.0, 0.0, "E") > 0.0);
        assert!(dms_to_decimal(10.0, 30.0, 0.0, "W") < 0.0);
        assert!(dms_to_decimal(10.0, 30.0, 0.0, "S") < 0.0);
        assert_eq!(dms_to_decimal(10.0, 30.0, 0.0, "W"), -10.5);
    }

    #[test]
    fn test_media_kind_detection() {
        assert_eq!(MediaKind::from_path(Path::new("a/b/photo.JPG")), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("x.heic")), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("clip.MoV")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), MediaKind::Unknown);
        assert_eq!(MediaKind::from_path(Path::new("no_extension")), MediaKind::Unknown);
        assert!(is_supported(Path::new("holiday.avi")));
        assert!(!is_supported(Path::new("raw.cr2")));
    }

    #[test]
    fn test_chain_falls_back_in_order() {
        let chain = ExifParserChain::new(vec![
            Box::new(Failing),
            Box::new(Fixed("2021:01:01 10:00:00")),
            Box::new(Fixed("2099:01:01 10:00:00")),
        ]);
        let meta = chain.parse(Path::new("whatever.jpg")).unwrap();
        assert_eq!(meta.captured_at.as_deref(), Some("2021:01:01 10:00:00"));
    }

    #[test]
    fn test_chain_all_failing() {
        let chain = ExifParserChain::new(vec![Box::new(Failing), Box::new(Failing)]);
        assert!(chain.parse(Path::new("whatever.jpg")).is_err());
    }

    #[test]
    fn test_exiftool_tag_mapping() {
        let tags: HashMap<String, serde_json::Value> = serde_json::from_str(
            r#"{
                "SourceFile": "x.jpg",
                "DateTimeOriginal": "2023:07:14 20:15:00",
                "GPSLatitude": 40.446111,
                "GPSLatitudeRef": "S",
                "GPSLongitude": 79.982222,
                "GPSLongitudeRef": "W"
            }"#,
        )
        .unwrap();
        let meta = parse_exiftool_tags(&tags);
        assert_eq!(meta.captured_at.as_deref(), Some("2023:07:14 20:15:00"));
        let gps = meta.gps.unwrap();
        assert!(gps.latitude < 0.0 && gps.longitude < 0.0);
    }

    #[test]
    fn test_exiftool_without_gps() {
        let tags: HashMap<String, serde_json::Value> =
            serde_json::from_str(r#"{"GPSLatitude": 12.5}"#).unwrap();
        assert_eq!(parse_exiftool_tags(&tags), CaptureMetadata::default());
    }

    #[test]
    fn test_kamadak_reads_tagged_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.jpg");
        fixtures::write_tagged_jpeg(&path, "2023:05:04 20:00:00");

        let meta = KamadakExifParser.parse(&path).unwrap();
        assert_eq!(meta.captured_at.as_deref(), Some("2023:05:04 20:00:00"));
        let gps = meta.gps.unwrap();
        assert!((gps.latitude + 40.446111).abs() < 1e-5, "got {}", gps.latitude);
        assert!((gps.longitude + 79.982222).abs() < 1e-5, "got {}", gps.longitude);

        let chained = ExifParserChain::standard("/nonexistent/exiftool").parse(&path).unwrap();
        assert_eq!(chained, meta);
    }

    #[test]
    fn test_kamadak_rejects_file_without_exif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0])).save(&path).unwrap();
        assert!(KamadakExifParser.parse(&path).is_err());
    }
}
