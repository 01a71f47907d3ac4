//! RGBA drawing surface with a 2D transform stack.
//!
//! Transforms compose like an HTML canvas context: each call is applied to
//! the user-space coordinates of subsequent draws. [`Canvas::save`] returns
//! a guard that restores the transform when it goes out of scope, so a
//! drawing step cannot leak its transform into the next one.

use std::ops::{Deref, DerefMut};

use image::RgbaImage;
use rayon::prelude::*;

/// Row-major affine map: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// `self ∘ other`: applies `other` first.
    pub fn then_local(self, other: Affine) -> Affine {
        Affine {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Affine {
        Affine {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(angle: f32) -> Affine {
        let (sin, cos) = angle.sin_cos();
        Affine {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn scaling(sx: f32, sy: f32) -> Affine {
        Affine {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

/// Borrowed RGBA8 pixels to draw from.
#[derive(Clone, Copy, Debug)]
pub struct SourceImage<'a> {
    pub rgba: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> From<&'a RgbaImage> for SourceImage<'a> {
    fn from(image: &'a RgbaImage) -> Self {
        SourceImage {
            rgba: image.as_raw(),
            width: image.width(),
            height: image.height(),
        }
    }
}

impl SourceImage<'_> {
    fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() >= self.width as usize * self.height as usize * 4
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let idx = (y * self.width as usize + x) * 4;
        let px = &self.rgba[idx..idx + 4];
        [px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32]
    }

    /// Bilinear sample at `(u, v)` in source pixel units, pixel centers at +0.5.
    fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let fx = u - 0.5;
        let fy = v - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let c00 = self.texel(x0, y0);
        let c10 = self.texel(x0 + 1, y0);
        let c01 = self.texel(x0, y0 + 1);
        let c11 = self.texel(x0 + 1, y0 + 1);

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let mut out = [0.0; 4];
        for ch in 0..4 {
            out[ch] = lerp(lerp(c00[ch], c10[ch], tx), lerp(c01[ch], c11[ch], tx), ty);
        }
        out
    }
}

pub struct Canvas {
    image: RgbaImage,
    transform: Affine,
    saved: Vec<Affine>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            transform: Affine::IDENTITY,
            saved: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[cfg(test)]
    pub fn transform(&self) -> Affine {
        self.transform
    }

    /// Reallocates the surface if the size changed. Returns whether it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.width() == width && self.height() == height {
            return false;
        }
        self.image = RgbaImage::new(width, height);
        true
    }

    pub fn clear(&mut self) {
        self.image.fill(0);
    }

    /// Pushes the current transform; the guard pops it when dropped.
    pub fn save(&mut self) -> CanvasGuard<'_> {
        self.saved.push(self.transform);
        CanvasGuard { canvas: self }
    }

    pub fn translate(&mut self, tx: f32, ty: f32) {
        self.transform = self.transform.then_local(Affine::translation(tx, ty));
    }

    pub fn rotate(&mut self, angle: f32) {
        self.transform = self.transform.then_local(Affine::rotation(angle));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.transform = self.transform.then_local(Affine::scaling(sx, sy));
    }

    /// Draws `source` into the user-space rectangle `(dx, dy, dw, dh)`,
    /// blending source-over with bilinear sampling.
    pub fn draw_image(&mut self, source: SourceImage<'_>, dx: f32, dy: f32, dw: f32, dh: f32) {
        if !source.is_valid() || dw == 0.0 || dh == 0.0 {
            return;
        }

        let to_device = self.transform.then_local(
            Affine::translation(dx, dy).then_local(Affine::scaling(
                dw / source.width as f32,
                dh / source.height as f32,
            )),
        );
        let Some(to_source) = to_device.invert() else {
            return;
        };

        let (sw, sh) = (source.width as f32, source.height as f32);
        let corners = [(0.0, 0.0), (sw, 0.0), (0.0, sh), (sw, sh)].map(|(x, y)| to_device.apply(x, y));
        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

        let width = self.width();
        let height = self.height();
        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(width);
        let y1 = (max_y.ceil().max(0.0) as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let stride = width as usize * 4;
        let raw: &mut [u8] = &mut self.image;
        raw.par_chunks_exact_mut(stride)
            .enumerate()
            .skip(y0 as usize)
            .take((y1 - y0) as usize)
            .for_each(|(y, row)| {
                let cy = y as f32 + 0.5;
                for x in x0..x1 {
                    let (u, v) = to_source.apply(x as f32 + 0.5, cy);
                    if u < 0.0 || v < 0.0 || u >= sw || v >= sh {
                        continue;
                    }
                    let idx = x as usize * 4;
                    blend_over(&mut row[idx..idx + 4], source.sample(u, v));
                }
            });
    }
}

fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let sa = src[3] / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for ch in 0..3 {
        let value = (src[ch] * sa + dst[ch] as f32 * da * (1.0 - sa)) / out_a;
        dst[ch] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

pub struct CanvasGuard<'a> {
    canvas: &'a mut Canvas,
}

impl Deref for CanvasGuard<'_> {
    type Target = Canvas;

    fn deref(&self) -> &Canvas {
        self.canvas
    }
}

impl DerefMut for CanvasGuard<'_> {
    fn deref_mut(&mut self) -> &mut Canvas {
        self.canvas
    }
}

impl Drop for CanvasGuard<'_> {
    fn drop(&mut self) {
        if let Some(transform) = self.canvas.saved.pop() {
            self.canvas.transform = transform;
        }
    }
}
