use std::borrow::Cow;
use std::path::Path;

/// CPU-side pixel data as handed over by the asset importer.
///
/// `bitcount` is the number of bits per pixel and `pitch` the number of bytes
/// between the starts of two consecutive rows. Rows may be padded.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub bitcount: u32,
    pub pitch: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, bitcount: u32, data: Vec<u8>) -> Self {
        let pitch = width * bitcount.div_ceil(8);
        Self {
            width,
            height,
            bitcount,
            pitch,
            data,
        }
    }

    pub fn solid_rgba(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(width, height, 32, data)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let decoded = image::open(path.as_ref())?;
        log::info!(
            "Loaded image {:?} ({}x{})",
            path.as_ref(),
            decoded.width(),
            decoded.height()
        );
        Ok(Self::from_dynamic(&decoded))
    }

    /// Keeps 8-bit grey, 16-bit grey and 8-bit RGB as they are, everything
    /// else is converted to RGBA8.
    pub fn from_dynamic(source: &image::DynamicImage) -> Self {
        let (width, height) = (source.width(), source.height());
        match source {
            image::DynamicImage::ImageLuma8(buffer) => {
                Self::new(width, height, 8, buffer.as_raw().clone())
            }
            image::DynamicImage::ImageLuma16(buffer) => {
                Self::new(width, height, 16, bytemuck::cast_slice(buffer.as_raw()).to_vec())
            }
            image::DynamicImage::ImageRgb8(buffer) => {
                Self::new(width, height, 24, buffer.as_raw().clone())
            }
            other => Self::new(width, height, 32, other.to_rgba8().into_raw()),
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bitcount.div_ceil(8).max(1)
    }

    /// Pixel rows with the pitch padding removed.
    pub fn tight_rows(&self) -> Cow<'_, [u8]> {
        let row = (self.width * self.bytes_per_pixel()) as usize;
        let pitch = self.pitch as usize;
        if pitch <= row {
            return Cow::Borrowed(&self.data);
        }

        let mut packed = Vec::with_capacity(row * self.height as usize);
        for chunk in self.data.chunks(pitch).take(self.height as usize) {
            packed.extend_from_slice(&chunk[..row.min(chunk.len())]);
        }
        Cow::Owned(packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_defaults_to_tight_rows() {
        let image = Image::new(3, 2, 24, vec![0; 18]);
        assert_eq!(image.pitch, 9);
        assert_eq!(image.tight_rows().len(), 18);
    }

    #[test]
    fn padded_rows_are_packed() {
        let mut image = Image::new(1, 2, 8, vec![1, 0, 0, 0, 2, 0, 0, 0]);
        image.pitch = 4;
        assert_eq!(image.tight_rows().as_ref(), &[1, 2]);
    }

    #[test]
    fn solid_color_fills_every_pixel() {
        let image = Image::solid_rgba(2, 2, [1, 2, 3, 4]);
        assert_eq!(image.data.len(), 16);
        assert_eq!(&image.data[12..], &[1, 2, 3, 4]);
    }
}
