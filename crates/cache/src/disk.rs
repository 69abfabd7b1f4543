//! Disk tier: one folder per document, one image file per page
//!
//! Pages are stored as encoded images named after their index. Writes go to
//! a temporary file that is renamed into place, so a reader sees either the
//! whole image or nothing. The folder is created when the document is opened
//! and never recreated by a write: once a strategy deletes it, late writes
//! fail with [`CacheError::FolderMissing`].

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use pdf_viewer_render::Bitmap;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use crate::error::{CacheError, CacheResult};
use crate::identity::CacheIdentifier;

/// Default JPEG quality for lossy page files
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Encoding of page files on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskEncoding {
    /// Lossless; a disk hit returns exactly the bytes that were rendered
    #[default]
    Png,
    /// Lossy, smaller files
    Jpeg { quality: u8 },
}

impl DiskEncoding {
    /// File extension for page files
    pub fn extension(self) -> &'static str {
        match self {
            DiskEncoding::Png => "png",
            DiskEncoding::Jpeg { .. } => "jpg",
        }
    }

    fn encode(self, page: usize, bitmap: &Bitmap) -> CacheResult<Vec<u8>> {
        let encode_err = |reason: String| CacheError::Encode { page, reason };
        let image = RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.pixels().to_vec())
            .ok_or_else(|| encode_err("pixel data does not match dimensions".to_string()))?;

        let mut output = Vec::new();
        match self {
            DiskEncoding::Png => DynamicImage::ImageRgba8(image)
                .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                .map_err(|e| encode_err(e.to_string()))?,
            DiskEncoding::Jpeg { quality } => {
                let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
                JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100))
                    .encode_image(&rgb)
                    .map_err(|e| encode_err(e.to_string()))?
            }
        }
        Ok(output)
    }
}

/// One document's folder in the disk tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTier {
    dir: PathBuf,
    encoding: DiskEncoding,
}

impl DiskTier {
    /// Disk tier for `identifier` under `cache_root`
    ///
    /// Nothing is created until [`DiskTier::create_dir`].
    pub fn new(cache_root: &Path, identifier: &CacheIdentifier, encoding: DiskEncoding) -> Self {
        Self {
            dir: cache_root.join(identifier.as_str()),
            encoding,
        }
    }

    /// The document's folder
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn encoding(&self) -> DiskEncoding {
        self.encoding
    }

    /// Create the document's folder if it does not exist
    pub fn create_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// File a page is stored in
    pub fn page_path(&self, page: usize) -> PathBuf {
        self.dir.join(format!("{page}.{}", self.encoding.extension()))
    }

    /// Whether a page file exists, without decoding it
    pub fn exists(&self, page: usize) -> bool {
        self.page_path(page).is_file()
    }

    /// Decode a page file
    ///
    /// Returns `Ok(None)` when the page is not on disk.
    pub fn read(&self, page: usize) -> CacheResult<Option<Bitmap>> {
        let path = self.page_path(page);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let decoded = image::load_from_memory(&bytes).map_err(|e| CacheError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let bitmap = Bitmap::from_rgba(width, height, rgba.into_raw()).ok_or(CacheError::Decode {
            path,
            reason: "decoded size mismatch".to_string(),
        })?;
        Ok(Some(bitmap))
    }

    /// Encode and store a page, replacing any previous file
    ///
    /// Fails with [`CacheError::FolderMissing`] when the document folder is
    /// gone.
    pub fn write(&self, page: usize, bitmap: &Bitmap) -> CacheResult<()> {
        let encoded = self.encoding.encode(page, bitmap)?;

        let path = self.page_path(page);
        let temp = path.with_extension(format!("{}.tmp", self.encoding.extension()));
        fs::write(&temp, &encoded).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CacheError::FolderMissing(self.dir.clone()),
            _ => e.into(),
        })?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        tracing::trace!(page, bytes = encoded.len(), dir = %self.dir.display(), "page written to disk");
        Ok(())
    }

}
