//! PDF rasterisation: render pages to `DynamicImage` via pdfium for OCR.
//!
//! Pages are rendered at the configured OCR resolution (points / 72 × DPI).
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! so an oversized scan cannot exhaust memory.

use crate::error::InvoiceError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

/// Pixel size of a page rendered at `dpi`, longest edge capped at `max_pixels`.
pub fn target_size(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    let mut w = (width_pt * scale).max(1.0);
    let mut h = (height_pt * scale).max(1.0);
    let longest = w.max(h);
    if longest > max_pixels as f32 {
        let factor = max_pixels as f32 / longest;
        w *= factor;
        h *= factor;
    }
    (w.round().max(1.0) as u32, h.round().max(1.0) as u32)
}

/// Render one page at the OCR resolution.
pub(crate) fn render_page(
    page: &PdfPage<'_>,
    page_num: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, InvoiceError> {
    let (w, h) = target_size(page.width().value, page.height().value, dpi, max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(w as i32)
        .set_maximum_height(h as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| InvoiceError::RasterisationFailed {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_num,
        image.width(),
        image.height()
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_at_400_dpi() {
        // A4 is 595 × 842 pt.
        let (w, h) = target_size(595.0, 842.0, 400, 6000);
        assert_eq!((w, h), (3306, 4678));
    }

    #[test]
    fn longest_edge_is_capped() {
        let (w, h) = target_size(2384.0, 3370.0, 400, 6000);
        assert_eq!(h, 6000);
        assert!(w < 6000);
    }

    #[test]
    fn degenerate_page_still_has_one_pixel() {
        assert_eq!(target_size(0.0, 0.0, 72, 6000), (1, 1));
    }
}
