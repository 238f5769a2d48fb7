//! Blank driver for dry runs and testing.
//!
//! This driver renders a plain white page of the requested size as a PNG,
//! without calling any API. It lets us exercise the whole pipeline offline.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::prelude::*;

use super::{Driver, GeneratedImage, ImageSize};

/// Blank page driver.
#[derive(Debug)]
pub struct BlankDriver {
    size: ImageSize,
}

impl BlankDriver {
    /// Create a new blank driver.
    pub fn new(size: ImageSize) -> Self {
        Self { size }
    }

    /// Render a blank page as PNG data.
    fn render_png(&self) -> Result<Vec<u8>> {
        let page = RgbImage::from_pixel(self.size.width, self.size.height, Rgb([255, 255, 255]));
        let mut data = Cursor::new(vec![]);
        page.write_to(&mut data, ImageFormat::Png)
            .context("Failed to encode blank page")?;
        Ok(data.into_inner())
    }
}

#[async_trait]
impl Driver for BlankDriver {
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        debug!(prompt_length = prompt.chars().count(), "Rendering blank page");
        Ok(GeneratedImage::Inline {
            mime_type: "image/png".to_owned(),
            data: self.render_png()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use image::GenericImageView as _;

    use super::*;

    #[tokio::test]
    async fn renders_png_of_requested_size() {
        let driver = BlankDriver::new(ImageSize { width: 40, height: 30 });
        let GeneratedImage::Inline { mime_type, data } =
            driver.generate_image("anything").await.unwrap()
        else {
            panic!("expected inline image");
        };
        assert_eq!(mime_type, "image/png");
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
    }
}
