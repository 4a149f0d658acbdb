//! Decoded source pixels and the color set the kernels cluster.

use image::{DynamicImage, GenericImageView, RgbaImage, imageops::FilterType};
use rustc_hash::FxHashMap;
use tracing::info;

use crate::error::QuantizeError;
use crate::kernels::histogram::{fits_u32, peak_total};
use crate::layout::pack_rgba;
use crate::params::AssignMode;

const RGB_MASK: u32 = 0x00ff_ffff;
const OPAQUE: u32 = 0xff00_0000;

/// RGBA8 pixels packed one per `u32`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl SourceImage {
    pub fn from_rgba8(width: u32, height: u32, raw: &[u8]) -> Result<Self, QuantizeError> {
        if width == 0 || height == 0 {
            return Err(QuantizeError::ZeroDimension);
        }
        if raw.len() as u64 != u64::from(width) * u64::from(height) * 4 {
            return Err(QuantizeError::DimensionMismatch {
                len: raw.len(),
                width,
                height,
            });
        }
        let pixels = raw
            .chunks_exact(4)
            .map(|p| pack_rgba(p[0], p[1], p[2], p[3]))
            .collect();
        Ok(Self { width, height, pixels })
    }

    pub fn from_image(img: &DynamicImage) -> Result<Self, QuantizeError> {
        let (width, height) = img.dimensions();
        Self::from_rgba8(width, height, img.to_rgba8().as_raw())
    }

    /// Decodes an encoded image, optionally shrinking it (nearest neighbour)
    /// so its longest side equals `downscale`.
    pub fn decode(bytes: &[u8], downscale: Option<u32>) -> Result<Self, QuantizeError> {
        let source = Self::from_image(&image::load_from_memory(bytes)?)?;
        match downscale {
            Some(side) => source.shrink_to(side),
            None => Ok(source),
        }
    }

    /// Nearest-neighbour resize so the longest side is at most `side`.
    pub fn shrink_to(self, side: u32) -> Result<Self, QuantizeError> {
        let max_side = self.width.max(self.height) as f32;
        if max_side <= side as f32 {
            return Ok(self);
        }
        let ratio = side as f32 / max_side;
        let w = ((self.width as f32) * ratio).round().max(1.0) as u32;
        let h = ((self.height as f32) * ratio).round().max(1.0) as u32;
        let raw: Vec<u8> = self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        let img = RgbaImage::from_raw(self.width, self.height, raw).ok_or(
            QuantizeError::DimensionMismatch {
                len: self.pixels.len() * 4,
                width: self.width,
                height: self.height,
            },
        )?;
        let resized = image::imageops::resize(&img, w, h, FilterType::Nearest);
        Self::from_image(&DynamicImage::ImageRgba8(resized))
    }

    /// Shrinks the image until its moment and channel totals fit 32-bit
    /// accumulators. Images that already fit are returned unchanged.
    pub fn fit_to_budget(self) -> Result<Self, QuantizeError> {
        let mut source = self;
        loop {
            let peak = peak_total(source.pixels.iter().map(|&p| (p, 1)));
            if peak <= u64::from(u32::MAX) {
                return Ok(source);
            }
            let longest = source.width.max(source.height);
            if longest <= 1 {
                return Err(QuantizeError::MomentOverflow { entries: source.len() });
            }
            // Totals scale with the area; 2% slack absorbs rounding of the sides.
            let scale = (u32::MAX as f64 / peak as f64).sqrt() * 0.98;
            let side = ((f64::from(longest) * scale) as u32).clamp(1, longest - 1);
            info!(
                width = source.width,
                height = source.height,
                side,
                "downscaling to fit 32-bit moment totals"
            );
            source = source.shrink_to(side)?;
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Colors handed to the device, with per-entry weights.
#[derive(Debug, Clone)]
pub struct ColorSet {
    mode: AssignMode,
    colors: Vec<u32>,
    weights: Vec<u32>,
    /// Entry of each pixel; `None` when entries are pixels.
    pixel_entries: Option<Vec<u32>>,
    extent: [u32; 3],
}

impl ColorSet {
    /// Fails with [`QuantizeError::MomentOverflow`] when the image is too
    /// large for 32-bit moment bins.
    pub fn new(image: &SourceImage, mode: AssignMode) -> Result<Self, QuantizeError> {
        let set = match mode {
            AssignMode::Pixels => Self {
                mode,
                colors: image.pixels.clone(),
                weights: vec![1; image.len()],
                pixel_entries: None,
                extent: [image.width, image.height, 1],
            },
            AssignMode::UniqueColors => {
                let mut index: FxHashMap<u32, u32> = FxHashMap::default();
                let mut colors = Vec::new();
                let mut weights: Vec<u32> = Vec::new();
                let mut pixel_entries = Vec::with_capacity(image.len());
                for &pixel in &image.pixels {
                    let rgb = pixel & RGB_MASK;
                    let entry = *index.entry(rgb).or_insert_with(|| {
                        colors.push(rgb | OPAQUE);
                        weights.push(0);
                        (colors.len() - 1) as u32
                    });
                    weights[entry as usize] += 1;
                    pixel_entries.push(entry);
                }
                let extent = [colors.len() as u32, 1, 1];
                Self {
                    mode,
                    colors,
                    weights,
                    pixel_entries: Some(pixel_entries),
                    extent,
                }
            }
        };
        if !fits_u32(set.colors.iter().copied().zip(set.weights.iter().copied())) {
            return Err(QuantizeError::MomentOverflow { entries: set.len() });
        }
        Ok(set)
    }

    pub fn mode(&self) -> AssignMode {
        self.mode
    }

    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Invocation grid of the assign pass: the image plane for pixels, a
    /// line for unique colors.
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    /// Total weight, i.e. the pixel count in either mode.
    pub fn total_weight(&self) -> u64 {
        self.weights.iter().map(|&w| u64::from(w)).sum()
    }

    /// Maps per-entry values back to one value per pixel.
    pub fn expand(&self, per_entry: &[u32]) -> Vec<u32> {
        match &self.pixel_entries {
            Some(entries) => entries.iter().map(|&e| per_entry[e as usize]).collect(),
            None => per_entry.to_vec(),
        }
    }
}
