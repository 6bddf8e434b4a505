// In-memory scan image with a declared background color and page geometry
//
// Crop and border leave the page origin stale exactly the way the external
// editor's page metadata goes stale; repage resets it so page and buffer
// coordinates agree before any coordinates round-trip through the
// measurement tool.

use image::{imageops, ImageFormat, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::collections::VecDeque;
use std::path::Path;

use crate::core::config::{CropFractions, RotationDirection};
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::CropRect;

/// Degrees either side of level covered by the deskew search
const MAX_SKEW_DEGREES: f32 = 5.0;
/// Detected angles below this are treated as already level
const MIN_CORRECTION_DEGREES: f32 = 0.05;
/// Fraction of the maximum color distance separating content from background
const CONTENT_THRESHOLD: f64 = 0.25;
/// JPEG quality for finished outputs
const JPEG_QUALITY: u8 = 92;

/// Maximum Euclidean distance between two sRGB triples
const MAX_COLOR_DISTANCE: f64 = 441.672_955_930_063_7;

pub struct ScanCanvas {
    image: RgbImage,
    background: Rgb<u8>,
    /// Where the buffer's top-left corner sits in page coordinates
    page_origin: (i64, i64),
}

impl ScanCanvas {
    /// Decode an input image and declare its background color.
    pub fn open(path: &Path, background: Rgb<u8>) -> PipelineResult<Self> {
        let image = image::open(path)
            .map_err(|source| PipelineError::Load {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        Ok(Self::from_image(image, background))
    }

    pub fn from_image(image: RgbImage, background: Rgb<u8>) -> Self {
        Self {
            image,
            background,
            page_origin: (0, 0),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn background(&self) -> Rgb<u8> {
        self.background
    }

    pub fn page_origin(&self) -> (i64, i64) {
        self.page_origin
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Rotate into portrait orientation. Right-angle rotations expose no
    /// canvas, so no fill is needed, and any page offset is meaningless
    /// afterwards.
    pub fn rotate(&mut self, direction: RotationDirection) {
        self.image = match direction {
            RotationDirection::Clockwise => imageops::rotate90(&self.image),
            RotationDirection::CounterClockwise => imageops::rotate270(&self.image),
        };
        self.page_origin = (0, 0);
    }

    /// Remove the configured fraction of each edge:
    /// newWidth = width x (1 - left - right), starting at width x left,
    /// and the same per row.
    pub fn crop_fractions(&mut self, crop: &CropFractions) -> PipelineResult<()> {
        let w = f64::from(self.image.width());
        let h = f64::from(self.image.height());
        let x_start = (w * crop.left) as i64;
        let y_start = (h * crop.top) as i64;
        let new_width = (w - w * crop.left - w * crop.right) as u32;
        let new_height = (h - h * crop.top - h * crop.bottom) as u32;
        self.crop_buffer(x_start, y_start, new_width, new_height)
    }

    /// Crop to a rectangle given in page coordinates, clamped to the canvas.
    pub fn crop_rect(&mut self, rect: CropRect) -> PipelineResult<()> {
        let bx = rect.x - self.page_origin.0;
        let by = rect.y - self.page_origin.1;
        let x0 = bx.max(0);
        let y0 = by.max(0);
        let x1 = (bx + i64::from(rect.width)).min(i64::from(self.image.width()));
        let y1 = (by + i64::from(rect.height)).min(i64::from(self.image.height()));
        if x1 <= x0 || y1 <= y0 {
            return Err(PipelineError::EmptyCrop {
                width: rect.width,
                height: rect.height,
                x: rect.x,
                y: rect.y,
            });
        }
        self.crop_buffer(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }

    fn crop_buffer(&mut self, x: i64, y: i64, width: u32, height: u32) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::EmptyCrop {
                width,
                height,
                x,
                y,
            });
        }
        debug_assert!(x >= 0 && y >= 0);
        debug_assert!(x as u32 + width <= self.image.width());
        debug_assert!(y as u32 + height <= self.image.height());
        self.image = imageops::crop_imm(&self.image, x as u32, y as u32, width, height).to_image();
        self.page_origin = (self.page_origin.0 + x, self.page_origin.1 + y);
        Ok(())
    }

    /// Surround the image with a solid background-colored frame so the
    /// corner pixels the trim measurement keys on are exactly the
    /// background color.
    pub fn add_border(&mut self, thickness: u32) {
        if thickness == 0 {
            return;
        }
        let (w, h) = self.image.dimensions();
        let mut bordered =
            RgbImage::from_pixel(w + 2 * thickness, h + 2 * thickness, self.background);
        imageops::replace(
            &mut bordered,
            &self.image,
            i64::from(thickness),
            i64::from(thickness),
        );
        self.image = bordered;
        self.page_origin = (
            self.page_origin.0 - i64::from(thickness),
            self.page_origin.1 - i64::from(thickness),
        );
    }

    /// Reset the page origin so page and buffer coordinates agree.
    pub fn repage(&mut self) {
        self.page_origin = (0, 0);
    }

    /// Detect and correct small rotational skew. The search is bounded:
    /// at most `effort` candidate angles are scored, coarse half-degree
    /// steps across the whole range first, then a fine pass around the best
    /// coarse hit while budget remains.
    pub fn deskew(&mut self, effort: u32) {
        if effort == 0 {
            return;
        }
        let angle = self.detect_skew(effort);
        if angle.abs() < MIN_CORRECTION_DEGREES {
            return;
        }
        self.image = rotate_about_center(
            &self.image,
            -angle.to_radians(),
            Interpolation::Bilinear,
            self.background,
        );
    }

    fn detect_skew(&self, effort: u32) -> f32 {
        let points = self.content_points();
        // Too little content to say anything about alignment
        if points.len() < 64 {
            return 0.0;
        }
        let rows = self.image.height() as usize;
        let width = self.image.width();
        let mut budget = effort as usize;

        let mut best = 0.0_f32;
        let mut best_score = projection_score(&points, rows, width, 0.0);
        budget = budget.saturating_sub(1);

        for (span, step) in [(MAX_SKEW_DEGREES, 0.5_f32), (0.5_f32, 0.05_f32)] {
            let center = best;
            let count = (2.0 * span / step).round() as i32;
            for i in 0..=count {
                if budget == 0 {
                    return best;
                }
                budget -= 1;
                let angle = center - span + step * i as f32;
                let score = projection_score(&points, rows, width, angle);
                if score > best_score {
                    best_score = score;
                    best = angle;
                }
            }
        }
        best.clamp(-MAX_SKEW_DEGREES, MAX_SKEW_DEGREES)
    }

    /// Sampled positions of pixels that differ markedly from the background.
    fn content_points(&self) -> Vec<(f32, f32)> {
        let (w, h) = self.image.dimensions();
        let stride = (w.max(h) / 1024).max(2);
        let mut points = Vec::new();
        let mut y = 0;
        while y < h {
            let mut x = 0;
            while x < w {
                if color_distance(*self.image.get_pixel(x, y), self.background)
                    > CONTENT_THRESHOLD
                {
                    points.push((x as f32, y as f32));
                }
                x += stride;
            }
            y += stride;
        }
        points
    }

    /// Flood-fill the region connected to the top-left corner whose color is
    /// within `fuzz_percent` of the declared background, painting it with
    /// `replacement`, then declare `replacement` as the new background.
    pub fn recolor_background(&mut self, replacement: Rgb<u8>, fuzz_percent: f64) {
        let (w, h) = self.image.dimensions();
        let tolerance = fuzz_percent / 100.0;
        let matches =
            |pixel: Rgb<u8>, background: Rgb<u8>| color_distance(pixel, background) <= tolerance;

        if w > 0 && h > 0 && matches(*self.image.get_pixel(0, 0), self.background) {
            let mut visited = vec![false; (w as usize) * (h as usize)];
            let mut queue = VecDeque::new();
            visited[0] = true;
            queue.push_back((0u32, 0u32));

            while let Some((x, y)) = queue.pop_front() {
                self.image.put_pixel(x, y, replacement);
                let neighbors = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx >= w || ny >= h {
                        continue;
                    }
                    let index = (ny as usize) * (w as usize) + nx as usize;
                    if !visited[index] && matches(*self.image.get_pixel(nx, ny), self.background) {
                        visited[index] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }
        }

        self.background = replacement;
    }

    /// Serialize the canvas losslessly for the measurement tool.
    pub fn write_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save_with_format(path, ImageFormat::Png)
    }

    /// Encode as JPEG and move into place, so a failed job never leaves a
    /// partial output behind.
    pub fn write_jpeg_atomic(&self, path: &Path) -> PipelineResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::Builder::new()
            .prefix(".scanprep-staging-")
            .tempfile_in(dir)
            .map_err(|source| PipelineError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut staged, JPEG_QUALITY);
        encoder
            .encode_image(&self.image)
            .map_err(|source| PipelineError::EncodeOutput {
                path: path.to_path_buf(),
                source,
            })?;

        staged
            .persist(path)
            .map_err(|error| PipelineError::Write {
                path: path.to_path_buf(),
                source: error.error,
            })?;
        Ok(())
    }
}

/// Normalized Euclidean distance between two colors, 0.0 for equal up to
/// 1.0 for opposite corners of the cube.
pub(crate) fn color_distance(a: Rgb<u8>, b: Rgb<u8>) -> f64 {
    let dr = f64::from(a[0]) - f64::from(b[0]);
    let dg = f64::from(a[1]) - f64::from(b[1]);
    let db = f64::from(a[2]) - f64::from(b[2]);
    (dr * dr + dg * dg + db * db).sqrt() / MAX_COLOR_DISTANCE
}

/// Sum of squared row-projection counts after shearing by `angle_degrees`.
/// Rows of content aligned with the raster maximize it.
fn projection_score(points: &[(f32, f32)], rows: usize, width: u32, angle_degrees: f32) -> f64 {
    let t = f64::from(angle_degrees.to_radians().tan());
    let shift = (f64::from(width) * f64::from(MAX_SKEW_DEGREES.to_radians().tan())).ceil() as i64 + 1;
    let size = rows as i64 + 2 * shift;
    let mut histogram = vec![0u32; size as usize];
    for &(x, y) in points {
        let row = (f64::from(y) - f64::from(x) * t).round() as i64 + shift;
        if (0..size).contains(&row) {
            histogram[row as usize] += 1;
        }
    }
    histogram.iter().map(|&c| f64::from(c) * f64::from(c)).sum()
}
