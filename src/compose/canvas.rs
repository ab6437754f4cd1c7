//! Off-screen RGBA canvas with a transform stack.
//!
//! Transforms are scoped: [`Canvas::save`] returns a guard that restores the
//! previous transform when it goes out of scope, so a mirrored draw can never
//! leak into later draws of the same composition.

use std::ops::{Deref, DerefMut};

use image::{Rgba, RgbaImage};
use kurbo::{Affine, Point, Rect};

pub struct Canvas {
    pixels: RgbaImage,
    transform: Affine,
}

impl Canvas {
    /// Transparent canvas of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            transform: Affine::IDENTITY,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    /// Save the current transform; it is restored when the guard drops.
    pub fn save(&mut self) -> SavedTransform<'_> {
        let saved = self.transform;
        SavedTransform {
            canvas: self,
            saved,
        }
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.transform *= Affine::translate((dx, dy));
    }

    pub fn scale(&mut self, sx: f64, sy: f64) {
        self.transform *= Affine::scale_non_uniform(sx, sy);
    }

    /// Flip horizontally around the canvas' vertical centre axis
    pub fn mirror_horizontally(&mut self) {
        self.translate(f64::from(self.width()), 0.0);
        self.scale(-1.0, 1.0);
    }

    /// Draw `image` stretched over `dest` (user space), blended source-over.
    ///
    /// Sampling is nearest-neighbour at pixel centres, so axis-aligned
    /// integer placements and flips copy pixels exactly.
    pub fn draw_image(&mut self, image: &RgbaImage, dest: Rect) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 || dest.width() <= 0.0 || dest.height() <= 0.0 {
            return;
        }
        if self.transform.determinant() == 0.0 {
            return;
        }

        let inverse = self.transform.inverse();
        let bounds = self.transform.transform_rect_bbox(dest);
        let (cw, ch) = self.pixels.dimensions();
        let x0 = bounds.x0.floor().clamp(0.0, f64::from(cw)) as u32;
        let x1 = bounds.x1.ceil().clamp(0.0, f64::from(cw)) as u32;
        let y0 = bounds.y0.floor().clamp(0.0, f64::from(ch)) as u32;
        let y1 = bounds.y1.ceil().clamp(0.0, f64::from(ch)) as u32;

        let sx = f64::from(iw) / dest.width();
        let sy = f64::from(ih) / dest.height();

        for py in y0..y1 {
            for px in x0..x1 {
                let p = inverse * Point::new(f64::from(px) + 0.5, f64::from(py) + 0.5);
                if !dest.contains(p) {
                    continue;
                }
                let u = (((p.x - dest.x0) * sx) as u32).min(iw - 1);
                let v = (((p.y - dest.y0) * sy) as u32).min(ih - 1);
                let dst = self.pixels.get_pixel_mut(px, py);
                *dst = over(*dst, *image.get_pixel(u, v));
            }
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }
}

/// Transform scope opened by [`Canvas::save`]
pub struct SavedTransform<'a> {
    canvas: &'a mut Canvas,
    saved: Affine,
}

impl Deref for SavedTransform<'_> {
    type Target = Canvas;

    fn deref(&self) -> &Canvas {
        self.canvas
    }
}

impl DerefMut for SavedTransform<'_> {
    fn deref_mut(&mut self) -> &mut Canvas {
        self.canvas
    }
}

impl Drop for SavedTransform<'_> {
    fn drop(&mut self) {
        self.canvas.transform = self.saved;
    }
}

/// Straight-alpha source-over
fn over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = u32::from(src[3]);
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let da = u32::from(dst[3]);
    let inv = 255 - sa;
    // Output alpha scaled by 255
    let out_a = sa * 255 + da * inv;
    if out_a == 0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = u32::from(src[i]) * sa * 255 + u32::from(dst[i]) * da * inv;
        out[i] = ((c + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| Rgba([x as u8 * 10, 0, 0, 255]))
    }

    #[test]
    fn test_identity_draw_copies_pixels() {
        let src = stripes(8, 4);
        let mut canvas = Canvas::new(8, 4);
        canvas.draw_image(&src, Rect::new(0.0, 0.0, 8.0, 4.0));
        assert_eq!(canvas.pixels(), &src);
    }

    #[test]
    fn test_mirrored_draw_flips_columns() {
        let src = stripes(8, 4);
        let mut canvas = Canvas::new(8, 4);
        {
            let mut scoped = canvas.save();
            scoped.mirror_horizontally();
            scoped.draw_image(&src, Rect::new(0.0, 0.0, 8.0, 4.0));
        }
        for x in 0..8 {
            assert_eq!(canvas.pixels().get_pixel(x, 2), src.get_pixel(7 - x, 2));
        }
    }

    #[test]
    fn test_guard_restores_transform() {
        let mut canvas = Canvas::new(10, 10);
        canvas.translate(1.0, 2.0);
        let before = canvas.transform();
        {
            let mut outer = canvas.save();
            outer.mirror_horizontally();
            {
                let mut inner = outer.save();
                inner.scale(3.0, 3.0);
            }
            assert_ne!(outer.transform(), before);
        }
        assert_eq!(canvas.transform(), before);
    }

    #[test]
    fn test_draw_clips_to_canvas() {
        let src = RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255]));
        let mut canvas = Canvas::new(6, 6);
        canvas.draw_image(&src, Rect::new(4.0, 4.0, 8.0, 8.0));
        assert_eq!(*canvas.pixels().get_pixel(5, 5), Rgba([0, 255, 0, 255]));
        assert_eq!(*canvas.pixels().get_pixel(3, 3), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_over() {
        let dst = Rgba([10, 20, 30, 255]);
        assert_eq!(over(dst, Rgba([200, 200, 200, 0])), dst);
        assert_eq!(over(dst, Rgba([1, 2, 3, 255])), Rgba([1, 2, 3, 255]));

        let half = over(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 128]));
        assert_eq!(half[3], 255);
        assert!((126..=130).contains(&half[0]));
    }
}
