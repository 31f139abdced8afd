//! Frame pipeline: validate the request, borrow the level's index, compose
//! every frame and re-encode the sequence
//!
//! The pipeline owns no global state. It is constructed once per process
//! around a shared [`IndexCache`] and may serve any number of concurrent
//! requests.

use crate::algorithm::cache::IndexCache;
use crate::algorithm::composer::compose_frame;
use crate::index::{HnswIndex, NearestNeighborIndex};
use crate::io::configuration::MosaicConfig;
use crate::io::error::{MosaicError, Result, invalid_request};
use crate::io::image::{
    EncodedImage, OutputFrame, SourceImage, decode_image, encode_animation, encode_static,
    frame_duration, loop_count_or_default,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// States a request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Level and payload checks
    Validate,
    /// Borrowing the level's index and library
    Acquire,
    /// Decomposing and composing one frame
    PerFrame,
    /// Encoding the output sequence
    Reassemble,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Acquire => "acquire",
            Self::PerFrame => "per_frame",
            Self::Reassemble => "reassemble",
        };
        f.write_str(name)
    }
}

/// Receives per-frame progress for a request
pub trait FrameObserver: Send + Sync {
    /// Called once the frame count is known
    fn frames_started(&self, _total: usize) {}

    /// Called after frame `index` (zero-based) has been composed
    fn frame_completed(&self, index: usize, total: usize);
}

/// Per-request cancellation flag and optional progress observer
#[derive(Default, Clone)]
pub struct RequestContext<'a> {
    cancelled: Arc<AtomicBool>,
    observer: Option<&'a dyn FrameObserver>,
}

impl<'a> RequestContext<'a> {
    /// Context with no observer that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a progress observer
    #[must_use]
    pub const fn with_observer(mut self, observer: &'a dyn FrameObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share a cancellation flag owned elsewhere
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Request that processing stop before the next frame
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn started(&self, total: usize) {
        if let Some(observer) = self.observer {
            observer.frames_started(total);
        }
    }

    fn completed(&self, index: usize, total: usize) {
        if let Some(observer) = self.observer {
            observer.frame_completed(index, total);
        }
    }
}

/// Turns source images into mosaics at a requested block size
pub struct FramePipeline<I = HnswIndex> {
    cache: Arc<IndexCache<I>>,
    levels: Vec<u32>,
    max_image_pixels: u64,
}

impl<I: NearestNeighborIndex + 'static> FramePipeline<I> {
    /// Create a pipeline over a shared cache
    pub fn new(cache: Arc<IndexCache<I>>, max_image_pixels: u64) -> Self {
        let levels = cache.levels();
        Self {
            cache,
            levels,
            max_image_pixels,
        }
    }

    /// Create a pipeline and its cache from the service configuration
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self::new(
            Arc::new(IndexCache::from_config(config)),
            config.max_image_pixels,
        )
    }

    /// Shared index cache
    pub const fn cache(&self) -> &Arc<IndexCache<I>> {
        &self.cache
    }

    /// Supported block sizes, ascending
    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    /// Provision every configured level once
    ///
    /// # Errors
    ///
    /// Returns the first provisioning error; the service should not start.
    pub fn verify_levels(&self) -> Result<()> {
        for &level in &self.levels {
            let handle = self.cache.acquire(level)?;
            info!(
                level,
                shape = ?handle.library().shape(),
                "patch library ready"
            );
        }
        Ok(())
    }

    /// Turn an encoded image into a mosaic at block size `level`
    ///
    /// # Errors
    ///
    /// See [`FramePipeline::caterise_with`].
    pub fn caterise(&self, bytes: &[u8], level: u32) -> Result<EncodedImage> {
        self.caterise_with(bytes, level, &RequestContext::new())
    }

    /// Turn an encoded image into a mosaic, honouring cancellation and
    /// reporting progress through `context`
    ///
    /// # Errors
    ///
    /// Returns an invalid request error for an unsupported level or an
    /// undecodable payload (before any provisioning),
    /// [`MosaicError::DecodeBombGuard`] for oversized images, the provisioning
    /// error if the level cannot be made resident,
    /// [`MosaicError::Cancelled`] if the request is cancelled, or an encoding
    /// error.
    pub fn caterise_with(
        &self,
        bytes: &[u8],
        level: u32,
        context: &RequestContext<'_>,
    ) -> Result<EncodedImage> {
        self.validate_level(level)?;

        let source = decode_image(bytes, self.max_image_pixels)?;
        info!(
            level,
            format = ?source.format,
            frames = source.frames.len(),
            bytes = bytes.len(),
            "request decoded"
        );

        self.process(&source, level, context)
    }

    /// Compose every frame of a decoded source and encode the result
    ///
    /// # Errors
    ///
    /// See [`FramePipeline::caterise_with`].
    pub fn process(
        &self,
        source: &SourceImage,
        level: u32,
        context: &RequestContext<'_>,
    ) -> Result<EncodedImage> {
        let started = Instant::now();

        debug!(stage = %PipelineStage::Validate, level);
        self.validate_level(level)?;
        validate_frames(source, level)?;

        debug!(stage = %PipelineStage::Acquire, level);
        let handle = self.cache.acquire(level)?;

        let total = source.frames.len();
        context.started(total);
        let mut outputs = Vec::with_capacity(total);

        for (index, frame) in source.frames.iter().enumerate() {
            if context.is_cancelled() {
                info!(level, frame = index, "request cancelled");
                return Err(MosaicError::Cancelled);
            }

            debug!(stage = %PipelineStage::PerFrame, level, frame = index);
            let rgb = frame.image.to_rgb8();
            let composed = compose_frame(&rgb, handle.entry())?;
            outputs.push(OutputFrame {
                image: composed.image,
                delay_ms: frame_duration(frame.delay_ms),
            });
            context.completed(index, total);
        }
        drop(handle);

        debug!(stage = %PipelineStage::Reassemble, level, frames = outputs.len());
        let encoded = match outputs.as_slice() {
            [single] => encode_static(&single.image, source.format)?,
            _ => encode_animation(
                &outputs,
                loop_count_or_default(source.loop_count),
                source.format,
            )?,
        };

        info!(
            level,
            frames = outputs.len(),
            format = ?encoded.format,
            bytes = encoded.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mosaic complete"
        );
        Ok(encoded)
    }

    fn validate_level(&self, level: u32) -> Result<()> {
        if self.levels.binary_search(&level).is_err() {
            return Err(invalid_request(&format!(
                "level {level} is not supported (expected one of {:?})",
                self.levels
            )));
        }
        Ok(())
    }
}

fn validate_frames(source: &SourceImage, level: u32) -> Result<()> {
    if source.frames.is_empty() {
        return Err(invalid_request(&"image contains no frames"));
    }
    for frame in &source.frames {
        let (width, height) = (frame.image.width(), frame.image.height());
        if width < level || height < level {
            return Err(invalid_request(&format!(
                "image of {width}x{height} is smaller than the {level}x{level} block size"
            )));
        }
    }
    Ok(())
}
