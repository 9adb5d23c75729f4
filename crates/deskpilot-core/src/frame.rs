//! Frame codec
//!
//! Raw captures are tightly packed RGB8. [`encode`] downscales anything wider
//! than `max_width` (Lanczos3, aspect preserved) and re-encodes to JPEG.
//! Output is a pure function of the input frame and parameters.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgb};
use serde::{Deserialize, Serialize};

use crate::config::validate_session_name;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_QUALITY: u8 = 85;

/// Screenshots kept per session by [`save_frame`].
const KEEP_SAVED_FRAMES: usize = 20;

// ========== Types ==========

/// One captured bitmap of the remote display.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// RGB8, row-major, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 {
            return Err(Error::Codec(format!("empty frame: {}x{}", width, height)));
        }
        if pixels.len() != expected {
            return Err(Error::Codec(format!(
                "pixel buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A single-colour frame.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Jpeg,
}

impl FrameFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
        }
    }
}

/// A transport-ready image. Produced fresh per request, never cached.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl EncodedFrame {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.payload)
    }
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

// ========== Encoding ==========

/// Output dimensions for a `width`x`height` frame capped at `max_width`.
pub fn scaled_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || max_width == 0 {
        return (width, height);
    }
    let h = (u64::from(height) * u64::from(max_width) + u64::from(width) / 2) / u64::from(width);
    (max_width, h.max(1) as u32)
}

/// Resize (if wider than `max_width`) and JPEG-encode at `quality` (0-100).
pub fn encode(raw: &RawFrame, max_width: u32, quality: u8) -> Result<EncodedFrame> {
    if max_width == 0 {
        return Err(Error::invalid("max_width must be at least 1"));
    }
    if quality > 100 {
        return Err(Error::invalid(format!("quality must be 0-100, got {}", quality)));
    }

    let source: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(raw.width, raw.height, raw.pixels.as_slice()).ok_or_else(|| {
            Error::Codec(format!(
                "pixel buffer does not match {}x{}",
                raw.width, raw.height
            ))
        })?;

    let (width, height) = scaled_size(raw.width, raw.height, max_width);
    let mut payload = Vec::new();
    // The JPEG encoder rejects quality 0
    let encoder = JpegEncoder::new_with_quality(&mut payload, quality.max(1));

    if (width, height) == (raw.width, raw.height) {
        encoder.write_image(source.as_raw(), width, height, ExtendedColorType::Rgb8)?;
    } else {
        let resized = imageops::resize(&source, width, height, FilterType::Lanczos3);
        encoder.write_image(resized.as_raw(), width, height, ExtendedColorType::Rgb8)?;
    }

    Ok(EncodedFrame {
        width,
        height,
        format: FrameFormat::Jpeg,
        payload,
    })
}

// ========== File Output ==========

/// Write an encoded frame to `dir` as `<session>-<millis>.jpg` and prune old ones.
///
/// `session` must be a valid session name; anything that could leave `dir`
/// is rejected.
pub fn save_frame(frame: &EncodedFrame, dir: &Path, session: &str) -> Result<PathBuf> {
    validate_session_name(session)?;
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Codec(format!("create {}: {}", dir.display(), e)))?;

    let timestamp = chrono::Utc::now().timestamp_millis();
    let path = dir.join(format!(
        "{}-{}.{}",
        session,
        timestamp,
        frame.format.extension()
    ));
    std::fs::write(&path, &frame.payload)
        .map_err(|e| Error::Codec(format!("write {}: {}", path.display(), e)))?;

    cleanup_old(dir, session, frame.format.extension(), KEEP_SAVED_FRAMES);
    Ok(path)
}

/// Whether `file_name` is exactly `<session>-<digits>.<extension>`.
fn is_saved_frame(file_name: &str, session: &str, extension: &str) -> bool {
    file_name
        .strip_prefix(session)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_suffix(extension))
        .and_then(|rest| rest.strip_suffix('.'))
        .map_or(false, |stamp| !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit()))
}

fn cleanup_old(dir: &Path, session: &str, extension: &str, keep: usize) {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| is_saved_frame(&e.file_name().to_string_lossy(), session, extension))
        .collect();

    if files.len() <= keep {
        return;
    }

    files.sort_by_key(|e| e.file_name());
    for f in &files[..files.len() - keep] {
        std::fs::remove_file(f.path()).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RawFrame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x * 255 / width.max(1)) as u8);
                pixels.push((y * 255 / height.max(1)) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        RawFrame::new(width, height, pixels).unwrap()
    }

    #[test]
    fn test_raw_frame_validates_length() {
        assert!(RawFrame::new(2, 2, vec![0; 12]).is_ok());
        assert!(RawFrame::new(2, 2, vec![0; 11]).is_err());
        assert!(RawFrame::new(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_solid_and_pixel() {
        let frame = RawFrame::solid(3, 2, [10, 20, 30]);
        assert_eq!(frame.pixels.len(), 18);
        assert_eq!(frame.pixel(2, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size(1024, 768, 800), (800, 600));
        assert_eq!(scaled_size(640, 480, 800), (640, 480));
        assert_eq!(scaled_size(1000, 333, 100), (100, 33));
        assert_eq!(scaled_size(5000, 1, 10), (10, 1));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let raw = gradient(320, 200);
        let a = encode(&raw, 160, 85).unwrap();
        let b = encode(&raw, 160, 85).unwrap();
        assert_eq!(a.payload, b.payload);
        assert_eq!(a.format, FrameFormat::Jpeg);
        assert_eq!(&a.payload[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_encode_caps_width_and_keeps_aspect() {
        let raw = gradient(1024, 768);
        let frame = encode(&raw, 800, 85).unwrap();
        assert!(frame.width <= 800);
        let expected_h = 768.0 * f64::from(frame.width) / 1024.0;
        assert!((f64::from(frame.height) - expected_h).abs() <= 1.0);
    }

    #[test]
    fn test_encode_never_upscales() {
        let raw = gradient(64, 48);
        let frame = encode(&raw, 800, 50).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
    }

    #[test]
    fn test_quality_affects_size() {
        let raw = gradient(200, 200);
        let low = encode(&raw, 800, 10).unwrap();
        let high = encode(&raw, 800, 95).unwrap();
        assert!(low.payload.len() < high.payload.len());
    }

    #[test]
    fn test_encode_rejects_bad_parameters() {
        let raw = gradient(8, 8);
        assert!(encode(&raw, 0, 85).is_err());
        assert!(encode(&raw, 800, 101).is_err());
    }

    #[test]
    fn test_save_frame_prunes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let frame = encode(&gradient(16, 16), 800, 85).unwrap();
        for i in 0..(KEEP_SAVED_FRAMES + 5) {
            let path = dir.path().join(format!("lab-{:013}.jpg", i));
            std::fs::write(path, &frame.payload).unwrap();
        }
        std::fs::write(dir.path().join("other-1.jpg"), b"x").unwrap();

        let saved = save_frame(&frame, dir.path(), "lab").unwrap();
        assert!(saved.exists());

        let lab_files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("lab-"))
            .count();
        assert_eq!(lab_files, KEEP_SAVED_FRAMES);
        assert!(dir.path().join("other-1.jpg").exists());
    }

    #[test]
    fn test_save_frame_leaves_similar_sessions_alone() {
        let dir = tempfile::tempdir().unwrap();
        let frame = encode(&gradient(8, 8), 800, 85).unwrap();
        for i in 0..(KEEP_SAVED_FRAMES + 3) {
            std::fs::write(dir.path().join(format!("lab-2-{:013}.jpg", i)), b"x").unwrap();
        }
        for i in 0..(KEEP_SAVED_FRAMES + 3) {
            std::fs::write(dir.path().join(format!("lab-{:013}.jpg", i)), b"x").unwrap();
        }

        save_frame(&frame, dir.path(), "lab").unwrap();

        let other = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("lab-2-"))
            .count();
        assert_eq!(other, KEEP_SAVED_FRAMES + 3);
    }

    #[test]
    fn test_save_frame_rejects_escaping_names() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("screenshots");
        let frame = encode(&gradient(8, 8), 800, 85).unwrap();

        for name in ["../escaped", "a/b", ".."] {
            let err = save_frame(&frame, &dir, name).unwrap_err();
            assert_eq!(err.code(), "invalid_argument");
        }
        let entries: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_is_saved_frame() {
        assert!(is_saved_frame("lab-1792317994323.jpg", "lab", "jpg"));
        assert!(!is_saved_frame("lab-2-1792317994323.jpg", "lab", "jpg"));
        assert!(!is_saved_frame("lab-.jpg", "lab", "jpg"));
        assert!(!is_saved_frame("lab-123.png", "lab", "jpg"));
    }
}
