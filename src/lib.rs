//! K-means palette quantization on the GPU.
//!
//! An image is reduced to a 33³ grid of cumulative color moments, split into
//! `k` boxes of low variance, and the box means are refined with Lloyd
//! iterations. On a [`GpuContext`] every step is a wgpu compute pass recorded
//! into one command buffer; [`CpuBackend`] runs the same kernels on rayon.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Object, Promise, Reflect, Uint8Array};
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

pub mod backend;
pub mod error;
pub mod gpu;
pub mod kernels;
pub mod layout;
pub mod params;
pub mod render;
pub mod session;
pub mod source;

pub use backend::{Backend, CpuBackend, Quantization};
pub use error::QuantizeError;
pub use gpu::GpuContext;
pub use layout::{Centroid, Cube};
pub use params::{AssignMode, Params};
pub use render::PaletteEntry;
pub use session::Session;
pub use source::{ColorSet, SourceImage};

/// Output of [`quantize_bytes`].
#[derive(Debug, Clone)]
pub struct QuantizedImage {
    /// PNG of the quantized image with the palette strip beneath it.
    pub png: Vec<u8>,
    /// Palette, most common color first.
    pub palette: Vec<PaletteEntry>,
    pub quantization: Quantization,
}

// ------------------------------------------------------------
// Native entry points
// ------------------------------------------------------------

/// Decodes `input` and builds the color set for `params.mode`.
///
/// Images whose moment totals would overflow 32-bit bins are shrunk
/// (nearest neighbour) until they fit.
pub fn prepare(input: &[u8], params: &Params) -> Result<(SourceImage, ColorSet), QuantizeError> {
    params.validate()?;
    let source = SourceImage::decode(input, params.downscale)?.fit_to_budget()?;
    let colors = ColorSet::new(&source, params.mode)?;
    debug!(
        width = source.width(),
        height = source.height(),
        pixels = colors.total_weight(),
        entries = colors.len(),
        mode = ?colors.mode(),
        "color set ready"
    );
    Ok((source, colors))
}

/// Recolors `source` with the final centroids and appends the palette strip.
pub fn render_result(
    source: &SourceImage,
    colors: &ColorSet,
    quantization: Quantization,
) -> Result<QuantizedImage, QuantizeError> {
    let pixel_clusters = quantization.pixel_clusters(colors);
    let swatches = render::palette_colors(&quantization.centroids);
    let quantized = render::quantized_image(source, &pixel_clusters, &swatches);
    let strip = render::swatch_strip(&swatches, source.width());
    let png = render::encode_png(&render::compose(&quantized, &strip))?;
    let palette = render::palette_report(&quantization.centroids, &pixel_clusters);

    Ok(QuantizedImage {
        png,
        palette,
        quantization,
    })
}

/// Decodes `input`, quantizes it to `params.k` colors on `backend` and
/// renders the result.
pub fn quantize_bytes<B: Backend + ?Sized>(
    backend: &mut B,
    input: &[u8],
    params: &Params,
) -> Result<QuantizedImage, QuantizeError> {
    let (source, colors) = prepare(input, params)?;
    let quantization = backend.quantize(&colors, params)?;
    render_result(&source, &colors, quantization)
}

/// Palette of `input` without rendering an image.
pub fn extract_palette_bytes<B: Backend + ?Sized>(
    backend: &mut B,
    input: &[u8],
    params: &Params,
) -> Result<Vec<PaletteEntry>, QuantizeError> {
    let (_, colors) = prepare(input, params)?;
    let quantization = backend.quantize(&colors, params)?;
    Ok(render::palette_report(
        &quantization.centroids,
        &quantization.pixel_clusters(&colors),
    ))
}

// ------------------------------------------------------------
// wasm API
// ------------------------------------------------------------

fn js_error(err: QuantizeError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Browser handle. Keeps one GPU context alive across images; one image is
/// processed at a time.
#[wasm_bindgen]
pub struct Quantizer {
    context: Rc<RefCell<GpuContext>>,
}

#[wasm_bindgen]
impl Quantizer {
    /// Opens the GPU and compiles the kernels. Resolves to a `Quantizer`.
    pub async fn create() -> Result<Quantizer, JsValue> {
        let context = GpuContext::new().await.map_err(js_error)?;
        Ok(Quantizer {
            context: Rc::new(RefCell::new(context)),
        })
    }

    /// Quantizes an encoded image.
    ///
    /// Resolves to `{ image, palette, percentages }`: a PNG as `Uint8Array`,
    /// hex strings, and the share of pixels per color in percent, both most
    /// common first.
    pub fn quantize(
        &self,
        input: Vec<u8>,
        k: u32,
        iterations: u32,
        unique_colors: bool,
        downscale: Option<u32>,
    ) -> Promise {
        let context = Rc::clone(&self.context);
        future_to_promise(async move {
            let mode = if unique_colors {
                AssignMode::UniqueColors
            } else {
                AssignMode::Pixels
            };
            let params = Params::new()
                .with_k(k)
                .with_iterations(iterations)
                .with_mode(mode)
                .with_downscale(downscale);
            let (source, colors) = prepare(&input, &params).map_err(js_error)?;
            let quantization = {
                let mut ctx = context
                    .try_borrow_mut()
                    .map_err(|_| JsValue::from_str("quantizer is busy with another image"))?;
                ctx.quantize_async(&colors, &params).await.map_err(js_error)?
            };
            let out = render_result(&source, &colors, quantization).map_err(js_error)?;

            let palette_js = Array::new();
            let percentages_js = Array::new();
            for entry in &out.palette {
                palette_js.push(&JsValue::from_str(&entry.hex));
                percentages_js.push(&JsValue::from_f64(f64::from(entry.percentage)));
            }

            let result = Object::new();
            Reflect::set(&result, &JsValue::from_str("image"), &Uint8Array::from(out.png.as_slice()))?;
            Reflect::set(&result, &JsValue::from_str("palette"), &palette_js)?;
            Reflect::set(&result, &JsValue::from_str("percentages"), &percentages_js)?;
            Ok(result.into())
        })
    }

    /// Resolves to the palette as `[{ index, hex, percentage }]` JSON.
    #[wasm_bindgen(js_name = extractPalette)]
    pub fn extract_palette(&self, input: Vec<u8>, params_json: String) -> Promise {
        let context = Rc::clone(&self.context);
        future_to_promise(async move {
            let params = Params::from_json(&params_json).map_err(js_error)?;
            let (_, colors) = prepare(&input, &params).map_err(js_error)?;
            let quantization = {
                let mut ctx = context
                    .try_borrow_mut()
                    .map_err(|_| JsValue::from_str("quantizer is busy with another image"))?;
                ctx.quantize_async(&colors, &params).await.map_err(js_error)?
            };
            let palette = render::palette_report(
                &quantization.centroids,
                &quantization.pixel_clusters(&colors),
            );
            let json = serde_json::to_string(&palette).map_err(|e| js_error(e.into()))?;
            Ok(JsValue::from_str(&json))
        })
    }
}
