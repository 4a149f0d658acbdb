//! Turns a quantization back into pixels and a palette report.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};
use kmeans_colors::Sort;
use palette::Srgb;
use serde::Serialize;

use crate::error::QuantizeError;
use crate::layout::Centroid;
use crate::source::SourceImage;

/// One palette color and the share of pixels it covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteEntry {
    pub index: u32,
    pub hex: String,
    /// Share of the image in percent.
    pub percentage: f32,
}

fn centroid_srgb(centroid: &Centroid) -> Srgb {
    Srgb::new(centroid[0] / 255.0, centroid[1] / 255.0, centroid[2] / 255.0)
}

/// Centroids rounded to displayable 8-bit colors.
pub fn palette_colors(centroids: &[Centroid]) -> Vec<Srgb<u8>> {
    centroids
        .iter()
        .map(|c| centroid_srgb(c).into_format::<u8>())
        .collect()
}

pub fn hex(color: Srgb<u8>) -> String {
    format!("{:02X}{:02X}{:02X}", color.red, color.green, color.blue)
}

/// Every pixel replaced by its cluster's color; alpha comes from the source.
pub fn quantized_image(source: &SourceImage, pixel_clusters: &[u32], colors: &[Srgb<u8>]) -> RgbaImage {
    let mut out = RgbaImage::new(source.width(), source.height());
    for ((pixel, &packed), &cluster) in out.pixels_mut().zip(source.pixels()).zip(pixel_clusters) {
        let c = colors[cluster as usize];
        let alpha = (packed >> 24) as u8;
        *pixel = Rgba([c.red, c.green, c.blue, alpha]);
    }
    out
}

/// Height of the swatch strip under an image `width` pixels wide.
pub fn strip_height(width: u32) -> u32 {
    (width / 8).max(1)
}

/// One equally wide swatch per palette color, left to right in cluster order.
pub fn swatch_strip(colors: &[Srgb<u8>], width: u32) -> RgbaImage {
    let k = colors.len().max(1) as u64;
    RgbaImage::from_fn(width, strip_height(width), |x, _| {
        let slot = (u64::from(x) * k / u64::from(width)) as usize;
        match colors.get(slot) {
            Some(c) => Rgba([c.red, c.green, c.blue, 255]),
            None => Rgba([0, 0, 0, 0]),
        }
    })
}

/// Stacks `strip` under `image`.
pub fn compose(image: &RgbaImage, strip: &RgbaImage) -> RgbaImage {
    let mut canvas = RgbaImage::new(
        image.width().max(strip.width()),
        image.height() + strip.height(),
    );
    imageops::replace(&mut canvas, image, 0, 0);
    imageops::replace(&mut canvas, strip, 0, i64::from(image.height()));
    canvas
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, QuantizeError> {
    let mut buf = Vec::new();
    {
        let mut cursor = std::io::Cursor::new(&mut buf);
        DynamicImage::ImageRgba8(image.clone()).write_to(&mut cursor, ImageFormat::Png)?;
    }
    Ok(buf)
}

/// Palette entries with pixel shares, most common first.
///
/// `pixel_clusters` holds one cluster per pixel. Ties keep the luminance
/// order `kmeans_colors` sorts by.
pub fn palette_report(centroids: &[Centroid], pixel_clusters: &[u32]) -> Vec<PaletteEntry> {
    let srgb: Vec<Srgb> = centroids.iter().map(centroid_srgb).collect();
    let indices: Vec<u8> = pixel_clusters.iter().map(|&c| c as u8).collect();
    let colors = palette_colors(centroids);

    let mut sorted = Srgb::sort_indexed_colors(&srgb, &indices);
    sorted.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
    sorted
        .into_iter()
        .map(|data| {
            let index = u32::from(data.index);
            PaletteEntry {
                index,
                hex: hex(colors[index as usize]),
                percentage: data.percentage * 100.0,
            }
        })
        .collect()
}
