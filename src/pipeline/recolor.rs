//! Dark-mode recolouring.
//!
//! Exact matches only: pure white paper becomes dark grey and pure black ink
//! becomes white. Anti-aliased edges, images and coloured text keep their
//! original pixels, so photos are not inverted.

use image::{Rgb, RgbImage};

/// Replacement for pure white pixels.
pub const DARK_BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);
/// Replacement for pure black pixels.
pub const LIGHT_FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Apply the dark-mode remap in place.
pub fn apply_dark_mode(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        if *pixel == WHITE {
            *pixel = DARK_BACKGROUND;
        } else if *pixel == BLACK {
            *pixel = LIGHT_FOREGROUND;
        }
    }
}
