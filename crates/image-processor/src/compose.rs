//! Placing a scaled image on the white paper canvas.

use image::{Rgba, RgbaImage};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Create a blank white canvas.
pub fn blank_canvas(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, WHITE)
}

/// Overlay `top` image onto `base` at the given position.
///
/// The `top` image is alpha-composited over the base. Pixels falling
/// outside `base` are clipped.
pub fn overlay(base: &mut RgbaImage, top: &RgbaImage, x: i64, y: i64) {
    for (dx, dy, pixel) in top.enumerate_pixels() {
        let target_x = x + i64::from(dx);
        let target_y = y + i64::from(dy);
        if target_x < 0
            || target_y < 0
            || target_x >= i64::from(base.width())
            || target_y >= i64::from(base.height())
        {
            continue;
        }
        let (tx, ty) = (target_x as u32, target_y as u32);
        let alpha = pixel[3] as f32 / 255.0;
        if alpha > 0.99 {
            base.put_pixel(tx, ty, *pixel);
        } else if alpha > 0.01 {
            let bg = base.get_pixel(tx, ty);
            let blended = blend_pixel(bg, pixel, alpha);
            base.put_pixel(tx, ty, blended);
        }
    }
}

/// Left offset that centres `content_width` within `canvas_width`.
pub fn center_offset(canvas_width: u32, content_width: u32) -> i64 {
    (i64::from(canvas_width) - i64::from(content_width)) / 2
}

/// Place `img` horizontally centred and top-aligned on a white canvas.
pub fn center_on_canvas(img: &RgbaImage, canvas_width: u32, canvas_height: u32) -> RgbaImage {
    let mut canvas = blank_canvas(canvas_width, canvas_height);
    overlay(&mut canvas, img, center_offset(canvas_width, img.width()), 0);
    canvas
}

fn blend_pixel(bg: &Rgba<u8>, fg: &Rgba<u8>, alpha: f32) -> Rgba<u8> {
    let inv = 1.0 - alpha;
    Rgba([
        (fg[0] as f32 * alpha + bg[0] as f32 * inv) as u8,
        (fg[1] as f32 * alpha + bg[1] as f32 * inv) as u8,
        (fg[2] as f32 * alpha + bg[2] as f32 * inv) as u8,
        255,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_does_not_panic_on_out_of_bounds() {
        let mut base = RgbaImage::new(100, 100);
        let top = RgbaImage::new(50, 50);
        overlay(&mut base, &top, 80, 80); // partially out of bounds
        overlay(&mut base, &top, -20, -20);
    }

    #[test]
    fn overlay_blends_translucent_pixels_over_white() {
        let mut base = blank_canvas(1, 1);
        let top = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        overlay(&mut base, &top, 0, 0);
        let v = base.get_pixel(0, 0).0;
        assert!(v[0] > 120 && v[0] < 135, "{v:?}");
        assert_eq!(v[3], 255);
    }

    #[test]
    fn overlay_skips_transparent_pixels() {
        let mut base = blank_canvas(2, 2);
        overlay(&mut base, &RgbaImage::new(2, 2), 0, 0);
        assert!(base.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn center_on_canvas_leaves_equal_margins() {
        let img = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        let canvas = center_on_canvas(&img, 16, 2);
        for x in 0..16 {
            let black = canvas.get_pixel(x, 0).0[0] == 0;
            assert_eq!(black, (6..10).contains(&x), "x={x}");
        }
    }
}
