use std::path::{Path, PathBuf};

use image::{imageops::FilterType, RgbImage};
use tracing::debug;

use super::{Canvas, Color};

/// Errors loading an image file
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// The file could not be read or decoded
    #[error("open {}: {source}", .path.display())]
    Load {
        /// Image file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: image::ImageError,
    },
}

/// Loads an image file (png, jpeg or bmp).
pub fn load_image(path: &Path) -> Result<RgbImage, ImageError> {
    let image = image::open(path).map_err(|source| ImageError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), w = image.width(), h = image.height(), "loaded image");
    Ok(image.into_rgb8())
}

/// Size of `image` scaled to fit into `(width, height)`, keeping the aspect ratio.
fn fit(image: (u32, u32), width: u32, height: u32) -> (u32, u32) {
    let (iw, ih) = (u64::from(image.0.max(1)), u64::from(image.1.max(1)));
    let (w, h) = (u64::from(width), u64::from(height));
    if w * ih <= h * iw {
        (width, ((w * ih) / iw).max(1) as u32)
    } else {
        (((h * iw) / ih).max(1) as u32, height)
    }
}

/// Draws `image` scaled to fit and centered on black.
pub fn draw_image(canvas: &mut Canvas, image: &RgbImage) {
    let (width, height) = (canvas.width(), canvas.height());
    canvas.fill_rect(0, 0, width, height, Color::BLACK);

    let (w, h) = fit(image.dimensions(), width, height);
    let scaled = image::imageops::resize(image, w, h, FilterType::Triangle);
    let (x0, y0) = ((width - w) / 2, (height - h) / 2);
    for (x, y, pixel) in scaled.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        canvas.put(x0 + x, y0 + y, Color::from_rgb8(r, g, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitting() {
        assert_eq!(fit((640, 480), 1024, 768), (1024, 768));
        assert_eq!(fit((100, 100), 1920, 1080), (1080, 1080));
        assert_eq!(fit((200, 50), 100, 100), (100, 25));
        assert_eq!(fit((1, 1000), 1000, 10), (1, 10));
    }

    #[test]
    fn centered() {
        let image = RgbImage::from_pixel(10, 10, image::Rgb([255, 255, 255]));
        let mut canvas = Canvas::new(40, 20);
        draw_image(&mut canvas, &image);
        assert_eq!(canvas.pixel(9, 10), Color::BLACK);
        assert_eq!(canvas.pixel(10, 0), Color::WHITE);
        assert_eq!(canvas.pixel(29, 19), Color::WHITE);
        assert_eq!(canvas.pixel(30, 10), Color::BLACK);
    }

    #[test]
    fn missing_file() {
        let err = load_image(Path::new("/nonexistent/image.png")).unwrap_err();
        assert!(err.to_string().starts_with("open /nonexistent/image.png: "));
    }
}
