//! Pixel buffers and the pool that recycles them
//!
//! A render borrows a [`PixelBuffer`] from the [`BitmapPool`], the backend
//! draws into it, and the finished buffer is frozen into an immutable,
//! cheaply cloneable [`Bitmap`]. Once every clone of a bitmap has been
//! dropped except one, that last handle can be handed back to the pool.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::{RenderError, RenderResult};

/// Pixel layout of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8 bits per channel, RGBA order
    #[default]
    Rgba8888,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
        }
    }
}

/// Mutable render target
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer
    ///
    /// Allocation failure is reported as [`RenderError::OutOfMemory`] instead
    /// of aborting, so callers can retry with a smaller target size.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> RenderResult<Self> {
        let bytes = Self::byte_len(width, height, format)
            .ok_or(RenderError::OutOfMemory { bytes: usize::MAX })?;

        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| RenderError::OutOfMemory { bytes })?;
        data.resize(bytes, 0);

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    fn byte_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.bytes_per_pixel())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Row stride in bytes
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Fill every pixel with one RGBA color
    pub fn erase(&mut self, rgba: [u8; 4]) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }

    /// Size of the pixel data in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Freeze the buffer into a shareable bitmap
    pub fn into_bitmap(self) -> Bitmap {
        Bitmap {
            width: self.width,
            height: self.height,
            format: self.format,
            pixels: Arc::new(self.data),
        }
    }
}

/// Rendered page image
///
/// Clones share the same pixel storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Arc<Vec<u8>>,
}

impl Bitmap {
    /// Wrap raw RGBA pixels
    ///
    /// Returns `None` when `pixels` does not hold exactly `width * height`
    /// pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = PixelBuffer::byte_len(width, height, PixelFormat::Rgba8888)?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format: PixelFormat::Rgba8888,
            pixels: Arc::new(pixels),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel data in bytes (the memory-tier cost of this bitmap)
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Recover the underlying buffer if this is the only handle left
    pub fn try_into_buffer(self) -> Result<PixelBuffer, Bitmap> {
        let Bitmap {
            width,
            height,
            format,
            pixels,
        } = self;
        match Arc::try_unwrap(pixels) {
            Ok(data) => Ok(PixelBuffer {
                width,
                height,
                format,
                data,
            }),
            Err(pixels) => Err(Bitmap {
                width,
                height,
                format,
                pixels,
            }),
        }
    }
}

/// Bitmap pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitmapPoolStats {
    /// Checkouts served from a pooled buffer
    pub reused: u64,
    /// Checkouts that had to allocate
    pub allocated: u64,
    /// Returned buffers dropped because the pool was full
    pub dropped: u64,
    /// Buffers currently pooled
    pub pooled: usize,
    /// Bytes currently pooled
    pub pooled_bytes: usize,
}

struct PoolState {
    slots: VecDeque<PixelBuffer>,
    pooled_bytes: usize,
    stats: BitmapPoolStats,
}

/// Bounded pool of reusable pixel buffers
///
/// The pool is limited both by slot count and by a byte budget; a buffer
/// returned to a full pool is simply dropped.
#[derive(Clone)]
pub struct BitmapPool {
    state: Arc<Mutex<PoolState>>,
    max_slots: usize,
    max_bytes: usize,
}

impl BitmapPool {
    /// Create a pool holding at most `max_slots` buffers and `max_bytes` bytes
    pub fn new(max_slots: usize, max_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                slots: VecDeque::new(),
                pooled_bytes: 0,
                stats: BitmapPoolStats::default(),
            })),
            max_slots,
            max_bytes,
        }
    }

    /// Borrow a buffer of the given size, reusing a pooled one when possible
    pub fn checkout(&self, width: u32, height: u32, format: PixelFormat) -> RenderResult<PixelBuffer> {
        {
            let mut state = self.state.lock();
            let found = state
                .slots
                .iter()
                .position(|b| b.width == width && b.height == height && b.format == format);
            if let Some(pos) = found {
                if let Some(buffer) = state.slots.remove(pos) {
                    state.pooled_bytes = state.pooled_bytes.saturating_sub(buffer.byte_size());
                    state.stats.reused += 1;
                    state.stats.pooled = state.slots.len();
                    state.stats.pooled_bytes = state.pooled_bytes;
                    return Ok(buffer);
                }
            }
            state.stats.allocated += 1;
        }

        PixelBuffer::new(width, height, format)
    }

    /// Return a buffer to the pool
    ///
    /// Returns `false` if the buffer was dropped because the pool is full.
    pub fn checkin(&self, buffer: PixelBuffer) -> bool {
        let mut state = self.state.lock();
        let size = buffer.byte_size();
        if state.slots.len() >= self.max_slots || state.pooled_bytes + size > self.max_bytes {
            state.stats.dropped += 1;
            return false;
        }
        state.pooled_bytes += size;
        state.slots.push_back(buffer);
        state.stats.pooled = state.slots.len();
        state.stats.pooled_bytes = state.pooled_bytes;
        true
    }

    /// Return a consumed bitmap's storage to the pool if no other handle
    /// still references it
    pub fn recycle(&self, bitmap: Bitmap) -> bool {
        match bitmap.try_into_buffer() {
            Ok(buffer) => self.checkin(buffer),
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> BitmapPoolStats {
        self.state.lock().stats
    }
}
