//! Single-page composition: scale a screenshot onto a page-sized canvas.
//!
//! The geometry lives in [`plan_layout`], a pure function over pixel sizes,
//! so the scaling and centring rules can be tested without decoding images.
//! [`compose_page`] applies a plan to real pixels.
//!
//! The page never paginates and never crops: if the scaled image plus its
//! margins is taller than the configured page, the page grows.

use crate::config::ConversionConfig;
use crate::error::NewsletterError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::debug;

/// Smallest scale ever applied.
const MIN_SCALE: f64 = 0.01;

/// Narrowest content box, in pixels, however large the margins.
const MIN_CONTENT_WIDTH: i64 = 10;

/// Where and how large the screenshot lands on the page. All sizes in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub page_width: u32,
    pub page_height: u32,
    pub margin: u32,
    pub scale: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Plan the placement of an `image_width` × `image_height` screenshot.
pub fn plan_layout(image_width: u32, image_height: u32, config: &ConversionConfig) -> Layout {
    let dpi = f64::from(config.dpi.max(1));
    let page_width = ((config.page_width_in * dpi).floor() as i64).max(1);
    let mut page_height = ((config.page_height_in * dpi).floor() as i64).max(1);
    let margin = ((config.margin_in * dpi).floor() as i64).max(0);

    let content_width = (page_width - 2 * margin).max(MIN_CONTENT_WIDTH);
    let width_ratio = (content_width as f64 / f64::from(image_width.max(1))).max(MIN_SCALE);

    let ceiling = if config.allow_scale_up {
        config.max_scale
    } else {
        1.0
    };
    let max_allowed = width_ratio.min(ceiling);
    let desired = config.manual_scale.max(MIN_SCALE).min(ceiling);
    let scale = max_allowed.min(desired).max(MIN_SCALE);

    let scaled_width = ((f64::from(image_width) * scale).floor() as i64).max(1);
    let scaled_height = ((f64::from(image_height) * scale).floor() as i64).max(1);

    let required_height = scaled_height + 2 * margin;
    if required_height > page_height {
        page_height = required_height;
    }

    let offset_x = centred_offset(page_width, scaled_width, margin);
    let offset_y = centred_offset(page_height, scaled_height, margin);

    Layout {
        page_width: clamp_u32(page_width),
        page_height: clamp_u32(page_height),
        margin: clamp_u32(margin),
        scale,
        image_width: clamp_u32(scaled_width),
        image_height: clamp_u32(scaled_height),
        offset_x: clamp_u32(offset_x),
        offset_y: clamp_u32(offset_y),
    }
}

/// Centre `size` within `page`, keeping at least `margin` from the near edge.
fn centred_offset(page: i64, size: i64, margin: i64) -> i64 {
    let available = page - size;
    let centred = margin + (available.div_euclid(2) - margin).max(0);
    centred.min(page - size - margin).max(margin)
}

fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, i64::from(u32::MAX)) as u32
}

/// Decode `screenshot` and paint it onto a page per `config`.
///
/// CPU-bound; call from `spawn_blocking` in async code.
pub fn compose_page(
    screenshot: &[u8],
    config: &ConversionConfig,
) -> Result<(RgbImage, Layout), NewsletterError> {
    let decoded = image::load_from_memory(screenshot)
        .map_err(|e| NewsletterError::ImageDecode(e.to_string()))?
        .to_rgb8();

    let layout = plan_layout(decoded.width(), decoded.height(), config);
    debug!(
        "Composing {}x{} screenshot at scale {:.3} onto {}x{} page",
        decoded.width(),
        decoded.height(),
        layout.scale,
        layout.page_width,
        layout.page_height
    );

    let scaled = if (layout.image_width, layout.image_height) == decoded.dimensions() {
        decoded
    } else {
        imageops::resize(
            &decoded,
            layout.image_width,
            layout.image_height,
            FilterType::Lanczos3,
        )
    };

    let mut canvas = RgbImage::from_pixel(layout.page_width, layout.page_height, Rgb(config.background));
    imageops::overlay(
        &mut canvas,
        &scaled,
        i64::from(layout.offset_x),
        i64::from(layout.offset_y),
    );
    Ok((canvas, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn no_scale_up() -> ConversionConfig {
        ConversionConfig {
            allow_scale_up: false,
            ..Default::default()
        }
    }

    fn png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn tall_image_grows_the_page() {
        let layout = plan_layout(1000, 2000, &no_scale_up());
        assert_eq!(layout.page_width, 1275);
        assert_eq!(layout.margin, 37);
        assert!(layout.scale <= 1.0);
        assert!(layout.image_width <= 1275 - 2 * 37);
        assert_eq!(layout.image_width, 1000);
        assert_eq!(layout.page_height, 2000 + 2 * 37);
        assert_eq!(layout.offset_x, 137);
        assert_eq!(layout.offset_y, 37);
    }

    #[test]
    fn short_image_keeps_configured_height_and_is_centred() {
        let layout = plan_layout(600, 400, &no_scale_up());
        assert_eq!(layout.page_height, 1650);
        assert_eq!(layout.scale, 1.0);
        assert_eq!(layout.offset_x, (1275 - 600) / 2);
        assert_eq!(layout.offset_y, (1650 - 400) / 2);
    }

    #[test]
    fn wide_image_without_scale_up_shrinks_to_content_width() {
        let layout = plan_layout(3000, 100, &no_scale_up());
        let content = 1275 - 2 * 37;
        assert!(layout.image_width <= content);
        assert!(layout.image_width >= content - 1);
        assert!(layout.offset_x >= layout.margin);
        assert!(layout.offset_x + layout.image_width <= layout.page_width - layout.margin);
    }

    #[test]
    fn manual_scale_is_clamped_to_max_scale() {
        let config = ConversionConfig {
            manual_scale: 5.0,
            max_scale: 2.0,
            ..Default::default()
        };
        let layout = plan_layout(300, 100, &config);
        assert_eq!(layout.scale, 2.0);
        assert_eq!(layout.image_width, 600);

        let layout = plan_layout(300, 100, &ConversionConfig { manual_scale: 5.0, ..no_scale_up() });
        assert_eq!(layout.scale, 1.0);
    }

    #[test]
    fn scale_up_never_exceeds_content_width() {
        let config = ConversionConfig {
            manual_scale: 2.0,
            ..Default::default()
        };
        let layout = plan_layout(1000, 100, &config);
        assert!(layout.image_width <= 1275 - 2 * 37);
    }

    #[test]
    fn scale_never_reaches_zero() {
        let config = ConversionConfig {
            manual_scale: 0.0,
            ..no_scale_up()
        };
        let layout = plan_layout(1_000_000, 10, &config);
        assert!(layout.scale >= 0.01);
        assert!(layout.image_width >= 1 && layout.image_height >= 1);
    }

    #[test]
    fn huge_margins_still_leave_a_content_box() {
        let config = ConversionConfig {
            margin_in: 10.0,
            ..no_scale_up()
        };
        let layout = plan_layout(50, 50, &config);
        assert!(layout.offset_x >= layout.margin);
        assert!(layout.offset_y >= layout.margin);
    }

    #[test]
    fn canvas_uses_background_and_paints_image() {
        let config = ConversionConfig {
            background: [255, 0, 0],
            dpi: 20,
            ..no_scale_up()
        };
        let (canvas, layout) = compose_page(&png(40, 30, [0, 0, 255]), &config).unwrap();
        assert_eq!(canvas.dimensions(), (layout.page_width, layout.page_height));
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([255, 0, 0]));
        let centre = canvas.get_pixel(layout.offset_x + 5, layout.offset_y + 5);
        assert_eq!(centre, &Rgb([0, 0, 255]));
    }

    #[test]
    fn undecodable_bytes_are_an_image_error() {
        let err = compose_page(b"not an image", &ConversionConfig::default()).unwrap_err();
        assert!(matches!(err, NewsletterError::ImageDecode(_)));
    }
}
