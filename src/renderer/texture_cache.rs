//! Texture uploads deduplicated by asset key.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::scene::Image;

use super::backend::{
    GraphicsBackend, PixelFormat, TextureDescriptor, TextureDimension, TextureRegion, TextureUsage,
};
use super::error::RenderError;
use super::handles::TextureHandle;

/// Texel format for an image of `bitcount` bits per pixel. Anything outside
/// the 8/16/24 buckets is treated as 4-channel 8-bit.
pub fn infer_format(bitcount: u32) -> PixelFormat {
    match bitcount {
        8 => PixelFormat::R8,
        16 => PixelFormat::R16,
        24 => PixelFormat::Rgb8,
        _ => PixelFormat::Rgba8,
    }
}

/// Sole owner of the textures it uploads.
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: BTreeMap<String, TextureHandle>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TextureHandle> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the texture cached under `key`, uploading `image` only on a miss.
    pub fn ensure_uploaded<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        key: &str,
        image: &Image,
    ) -> Result<TextureHandle, RenderError> {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let format = infer_format(image.bitcount);
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(key),
            width: image.width,
            height: image.height,
            layers: 1,
            mip_levels: 1,
            format,
            dimension: TextureDimension::D2,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        })?;
        let region = TextureRegion {
            mip_level: 0,
            layer: 0,
            width: image.width,
            height: image.height,
        };
        if let Err(err) = backend.write_texture(texture, region, &texel_rows(image, format)) {
            backend.release_texture(texture);
            return Err(err);
        }

        log::info!(
            "Uploaded texture '{}' ({}x{}, {:?})",
            key,
            image.width,
            image.height,
            format
        );
        self.entries.insert(key.to_string(), texture);
        Ok(texture)
    }

    /// Takes ownership of a texture produced elsewhere, e.g. by a compute pass.
    /// A texture already cached under `key` is released.
    pub fn insert<B: GraphicsBackend>(&mut self, backend: &mut B, key: &str, texture: TextureHandle) {
        if let Some(previous) = self.entries.insert(key.to_string(), texture) {
            if previous != texture {
                backend.release_texture(previous);
            }
        }
    }

    /// Drops `key` from the cache and releases its texture.
    pub fn remove<B: GraphicsBackend>(&mut self, backend: &mut B, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(texture) => {
                backend.release_texture(texture);
                true
            }
            None => false,
        }
    }

    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if !self.entries.is_empty() {
            log::info!("Releasing {} cached textures", self.entries.len());
        }
        for (_, texture) in std::mem::take(&mut self.entries) {
            backend.release_texture(texture);
        }
    }
}

/// Tightly packed rows in `format`. Images coerced into RGBA8 have every
/// pixel padded or cut to four bytes.
pub(crate) fn texel_rows(image: &Image, format: PixelFormat) -> Cow<'_, [u8]> {
    let rows = image.tight_rows();
    let source = image.bytes_per_pixel() as usize;
    let target = format.texel_size() as usize;
    if source == target {
        return rows;
    }

    let mut packed = Vec::with_capacity(image.width as usize * image.height as usize * target);
    for pixel in rows.chunks(source) {
        let len = pixel.len().min(target);
        packed.extend_from_slice(&pixel[..len]);
        packed.extend(std::iter::repeat(u8::MAX).take(target - len));
    }
    Cow::Owned(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    #[test]
    fn bit_depth_picks_the_format() {
        assert_eq!(infer_format(8), PixelFormat::R8);
        assert_eq!(infer_format(16), PixelFormat::R16);
        assert_eq!(infer_format(24), PixelFormat::Rgb8);
        assert_eq!(infer_format(32), PixelFormat::Rgba8);
        assert_eq!(infer_format(48), PixelFormat::Rgba8);
    }

    #[test]
    fn same_key_uploads_once() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let image = Image::solid_rgba(4, 4, [9; 4]);

        let first = cache.ensure_uploaded(&mut backend, "bricks", &image).unwrap();
        let second = cache.ensure_uploaded(&mut backend, "bricks", &image).unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.stats().textures_created, 1);
        assert_eq!(backend.stats().texture_writes, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn odd_bit_depths_are_coerced_to_rgba() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let image = Image::new(2, 1, 48, vec![0; 12]);

        let texture = cache.ensure_uploaded(&mut backend, "hdr", &image).unwrap();
        assert_eq!(backend.texture(texture).map(|t| t.format), Some(PixelFormat::Rgba8));
        assert_eq!(texel_rows(&image, PixelFormat::Rgba8).len(), 8);
    }

    #[test]
    fn failed_uploads_leave_nothing_behind() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let truncated = Image::new(4, 4, 8, vec![0; 3]);

        assert!(cache.ensure_uploaded(&mut backend, "broken", &truncated).is_err());
        assert!(cache.is_empty());
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn removed_keys_upload_again() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let image = Image::new(1, 1, 8, vec![1]);
        cache.ensure_uploaded(&mut backend, "a", &image).unwrap();

        assert!(cache.remove(&mut backend, "a"));
        assert!(!cache.remove(&mut backend, "a"));
        assert_eq!(backend.live_textures(), 0);

        cache.ensure_uploaded(&mut backend, "a", &image).unwrap();
        assert_eq!(backend.stats().textures_created, 2);
    }

    #[test]
    fn release_all_empties_the_cache() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        cache
            .ensure_uploaded(&mut backend, "a", &Image::new(1, 1, 8, vec![1]))
            .unwrap();
        cache
            .ensure_uploaded(&mut backend, "b", &Image::new(1, 1, 24, vec![1, 2, 3]))
            .unwrap();
        cache.release_all(&mut backend);
        cache.release_all(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_textures(), 0);
    }
}
