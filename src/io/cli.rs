//! Command-line interface: batch rendering, library packing, envelope mode

use crate::algorithm::executor::{FramePipeline, RequestContext};
use crate::index::HnswIndex;
use crate::io::configuration::{
    DEFAULT_PATCH_SIZE, MosaicConfig, OUTPUT_SUFFIX, patches_object_name, parse_levels,
};
use crate::io::envelope::handle_json;
use crate::io::error::{Result, file_system_error, invalid_request};
use crate::io::image::{animated_output_format, decode_image};
use crate::io::progress::ProgressManager;
use crate::spatial::tiles::{PatchLibrary, square_tile};
use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use rayon::prelude::*;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(name = "patchmosaic")]
#[command(
    author,
    version,
    about = "Rebuild images out of library tiles chosen by nearest-neighbour search"
)]
/// Command-line arguments for the mosaic tool
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Overrides for environment configuration
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Configuration overrides; anything unset falls back to the environment
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Supported block sizes, comma separated
    #[arg(long, global = true)]
    pub levels: Option<String>,

    /// Local cache directory for patch arrays
    #[arg(long, global = true)]
    pub cache_path: Option<PathBuf>,

    /// Local cache directory for serialized indices
    #[arg(long, global = true)]
    pub index_path: Option<PathBuf>,

    /// Remote bucket holding patch arrays and indices
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Object endpoint (`https://...` or `file://<dir>`)
    #[arg(long, global = true)]
    pub blob_endpoint: Option<String>,

    /// Prefix of every object name
    #[arg(long, global = true)]
    pub object_prefix: Option<String>,

    /// Candidate list size while searching
    #[arg(long, global = true)]
    pub ef_search: Option<usize>,

    /// Candidate list size while building indices
    #[arg(long, global = true)]
    pub ef_construction: Option<usize>,

    /// Neighbours kept per graph node
    #[arg(long, global = true)]
    pub max_connections: Option<usize>,

    /// Refinement passes after an index build
    #[arg(long, global = true)]
    pub post_passes: Option<usize>,

    /// Sort and compact neighbour lists after an index build
    #[arg(long, global = true)]
    pub optimize_index: bool,

    /// Worker threads for index builds (0 uses every core)
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Largest image, in pixels, accepted for decoding
    #[arg(long, global = true)]
    pub max_image_pixels: Option<u64>,
}

impl ConfigArgs {
    /// Environment configuration with these overrides applied
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the environment or an override is
    /// invalid.
    pub fn resolve(&self) -> Result<MosaicConfig> {
        self.apply(MosaicConfig::from_env()?)
    }

    /// Apply these overrides to `config` and validate the result
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an override is invalid.
    pub fn apply(&self, mut config: MosaicConfig) -> Result<MosaicConfig> {
        if let Some(ref levels) = self.levels {
            config.levels = parse_levels(levels)?;
        }
        if let Some(ref path) = self.cache_path {
            config.patches_path.clone_from(path);
        }
        if let Some(ref path) = self.index_path {
            config.index_path.clone_from(path);
        }
        if let Some(ref bucket) = self.bucket {
            config.bucket = Some(bucket.clone());
        }
        if let Some(ref endpoint) = self.blob_endpoint {
            config.blob_endpoint.clone_from(endpoint);
        }
        if let Some(ref prefix) = self.object_prefix {
            config.object_prefix.clone_from(prefix);
        }
        if let Some(ef) = self.ef_search {
            config.query.ef_search = ef;
        }
        if let Some(ef) = self.ef_construction {
            config.construction.ef_construction = ef;
        }
        if let Some(m) = self.max_connections {
            config.construction.max_connections = m;
        }
        if let Some(passes) = self.post_passes {
            config.construction.post_passes = passes;
        }
        if self.optimize_index {
            config.construction.skip_optimized_index = false;
        }
        if let Some(threads) = self.threads {
            config.construction.threads = threads;
        }
        if let Some(pixels) = self.max_image_pixels {
            config.max_image_pixels = pixels;
        }
        config.validate()
    }
}

/// Operations offered by the binary
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Turn an image, or every image in a directory, into a mosaic
    Render {
        /// Input image file or directory to process
        #[arg(value_name = "TARGET")]
        target: PathBuf,

        /// Block size in pixels
        #[arg(short = 's', long, default_value_t = DEFAULT_PATCH_SIZE)]
        patch_size: u32,

        /// Process files even if output exists
        #[arg(short, long)]
        no_skip: bool,
    },

    /// Build a patch array for one level from a directory of images
    Pack {
        /// Directory of tile source images
        #[arg(value_name = "SOURCE_DIR")]
        source: PathBuf,

        /// Block size of the produced tiles
        #[arg(short, long)]
        level: u32,

        /// Output `.npy` path (defaults to the configured cache location)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a JSON request from stdin and write the JSON response to stdout
    Envelope {
        /// Provision every configured level before handling the request
        #[arg(long)]
        verify: bool,
    },

    /// Provision every configured level and report each library
    Verify,
}

impl Cli {
    /// Tracing level named by `--log-level`
    pub fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Check if progress should be displayed
    pub const fn should_show_progress(&self) -> bool {
        !self.quiet
    }

    /// Run the selected command
    ///
    /// # Errors
    ///
    /// Returns the first configuration, provisioning, request or file system
    /// error encountered.
    pub fn run(self) -> Result<()> {
        let config = self.config.resolve()?;
        let show_progress = self.should_show_progress();

        match self.command {
            Command::Render {
                target,
                patch_size,
                no_skip,
            } => {
                let mut processor = FileProcessor::new(
                    FramePipeline::from_config(&config),
                    patch_size,
                    !no_skip,
                    show_progress,
                );
                processor.process(&target)
            }
            Command::Pack {
                source,
                level,
                output,
            } => {
                let output = output.unwrap_or_else(|| {
                    config
                        .patches_path
                        .join(patches_object_name(&config.object_prefix, level))
                });
                pack_directory(&source, level, &output)
            }
            Command::Envelope { verify } => {
                let pipeline = FramePipeline::from_config(&config);
                if verify {
                    pipeline.verify_levels()?;
                }
                run_envelope(&pipeline)
            }
            Command::Verify => FramePipeline::<HnswIndex>::from_config(&config).verify_levels(),
        }
    }
}

/// Orchestrates batch rendering of image files with progress tracking
pub struct FileProcessor {
    pipeline: FramePipeline,
    patch_size: u32,
    skip_existing: bool,
    progress_manager: Option<ProgressManager>,
}

impl FileProcessor {
    /// Create a processor rendering at `patch_size`
    pub fn new(
        pipeline: FramePipeline,
        patch_size: u32,
        skip_existing: bool,
        show_progress: bool,
    ) -> Self {
        Self {
            pipeline,
            patch_size,
            skip_existing,
            progress_manager: show_progress.then(ProgressManager::new),
        }
    }

    /// Render `target`, a single image or a directory of images
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not an image or directory, or any
    /// file fails to render.
    pub fn process(&mut self, target: &Path) -> Result<()> {
        let files = self.collect_files(target)?;

        if files.is_empty() {
            return Ok(());
        }

        if let Some(ref mut pm) = self.progress_manager {
            pm.initialize(files.len());
        }

        for (index, file) in files.iter().enumerate() {
            self.process_file(file, index)?;
        }

        if let Some(ref pm) = self.progress_manager {
            pm.finish();
        }

        Ok(())
    }

    fn collect_files(&self, target: &Path) -> Result<Vec<PathBuf>> {
        if target.is_file() {
            if !is_image_path(target) {
                return Err(invalid_request(&format!(
                    "'{}' is not a recognised image file",
                    target.display()
                )));
            }
            return Ok(if self.should_process_file(target) {
                vec![target.to_path_buf()]
            } else {
                vec![]
            });
        }

        if target.is_dir() {
            let mut files = Vec::new();
            let entries =
                std::fs::read_dir(target).map_err(file_system_error(target, "read directory"))?;
            for entry in entries {
                let path = entry
                    .map_err(file_system_error(target, "read directory entry"))?
                    .path();
                if is_image_path(&path) && !is_output_path(&path) && self.should_process_file(&path)
                {
                    files.push(path);
                }
            }
            files.sort();
            return Ok(files);
        }

        Err(invalid_request(&format!(
            "'{}' must be an image file or directory",
            target.display()
        )))
    }

    fn should_process_file(&self, input_path: &Path) -> bool {
        if !self.skip_existing {
            return true;
        }

        // Animations may have been written in another format than the source
        let animated_format = ImageFormat::from_path(input_path)
            .ok()
            .and_then(animated_output_format);
        let exists = output_path(input_path, None).exists()
            || animated_format.is_some_and(|format| output_path(input_path, Some(format)).exists());

        if exists {
            info!(input = %input_path.display(), "skipping; output exists");
        }
        !exists
    }

    fn process_file(&self, input_path: &Path, index: usize) -> Result<()> {
        let start_time = Instant::now();

        if let Some(ref pm) = self.progress_manager {
            pm.start_file(index, input_path);
        }

        let bytes =
            std::fs::read(input_path).map_err(file_system_error(input_path, "read image"))?;

        let observer = self.progress_manager.as_ref().map(|pm| pm.observer(index));
        let context = match observer {
            Some(ref observer) => RequestContext::new().with_observer(observer),
            None => RequestContext::new(),
        };
        let encoded = self.pipeline.caterise_with(&bytes, self.patch_size, &context)?;

        let output_path = output_path(input_path, Some(encoded.format));
        std::fs::write(&output_path, &encoded.bytes)
            .map_err(file_system_error(&output_path, "write mosaic"))?;

        if let Some(ref pm) = self.progress_manager {
            pm.complete_file(index);
        }

        info!(
            input = %input_path.display(),
            output = %output_path.display(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "mosaic written"
        );
        Ok(())
    }
}

fn is_image_path(path: &Path) -> bool {
    ImageFormat::from_path(path).is_ok()
}

fn is_output_path(path: &Path) -> bool {
    path.file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(OUTPUT_SUFFIX))
}

/// Output path beside `input_path`, with the extension of `format` when the
/// mosaic was written in a different format than the source
pub fn output_path(input_path: &Path, format: Option<ImageFormat>) -> PathBuf {
    let stem = input_path.file_stem().unwrap_or_default();
    let source_extension = input_path.extension().unwrap_or_default().to_string_lossy();

    let extension = match format {
        Some(format) if ImageFormat::from_path(input_path).ok() != Some(format) => format
            .extensions_str()
            .first()
            .map_or_else(|| source_extension.to_string(), ToString::to_string),
        _ => source_extension.to_string(),
    };

    let output_name = format!("{}{}.{}", stem.to_string_lossy(), OUTPUT_SUFFIX, extension);
    input_path.parent().map_or_else(
        || PathBuf::from(&output_name),
        |parent| parent.join(&output_name),
    )
}

/// Pack every decodable image in `source` into a patch array at `output`
///
/// # Errors
///
/// Returns an error if `level` is zero, the directory cannot be read, no
/// image decodes, or the array cannot be written.
pub fn pack_directory(source: &Path, level: u32, output: &Path) -> Result<()> {
    if level == 0 {
        return Err(invalid_request(&"tile size must be positive"));
    }

    let mut paths = Vec::new();
    let entries = std::fs::read_dir(source).map_err(file_system_error(source, "read directory"))?;
    for entry in entries {
        let path = entry
            .map_err(file_system_error(source, "read directory entry"))?
            .path();
        if is_image_path(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let tiles: Vec<_> = paths
        .par_iter()
        .filter_map(|path| {
            let decoded = std::fs::read(path)
                .map_err(file_system_error(path, "read image"))
                .and_then(|bytes| decode_image(&bytes, u64::MAX));
            match decoded {
                Ok(image) => image
                    .frames
                    .first()
                    .map(|frame| square_tile(&frame.image, level)),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping tile source");
                    None
                }
            }
        })
        .collect();

    if tiles.is_empty() {
        return Err(invalid_request(&format!(
            "no decodable images in '{}'",
            source.display()
        )));
    }

    let library = PatchLibrary::from_tiles(level, &tiles)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(file_system_error(parent, "create directory"))?;
    }
    std::fs::write(output, library.to_npy()).map_err(file_system_error(output, "write library"))?;

    info!(
        level,
        tiles = library.len(),
        output = %output.display(),
        "patch library packed"
    );
    Ok(())
}

fn run_envelope(pipeline: &FramePipeline) -> Result<()> {
    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .map_err(file_system_error("<stdin>", "read request"))?;

    let (response, _) = handle_json(pipeline, &body, &RequestContext::new());

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{response}").map_err(file_system_error("<stdout>", "write response"))
}
