//! Multi-file progress tracking with automatic batching for large sets

use crate::algorithm::executor::FrameObserver;
use crate::io::configuration::MAX_INDIVIDUAL_PROGRESS_BARS;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::LazyLock;

/// Display state of one file: name, frames composed, total frames
#[derive(Debug, Clone, Default)]
struct FileState {
    name: String,
    frames_done: usize,
    frames_total: usize,
}

/// Coordinates progress display for batch operations
///
/// Automatically switches between individual progress bars (for small batches)
/// and a single batch progress bar (for large batches) based on file count
pub struct ProgressManager {
    multi_progress: MultiProgress,
    batch_bar: Option<ProgressBar>,
    file_bars: Vec<ProgressBar>,
    /// Rolling window source, indexed by file position
    file_states: Mutex<Vec<FileState>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{msg} [{bar:30.cyan/blue}] {prefix}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

static BATCH_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] Files: [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
});

impl ProgressManager {
    /// Create a new progress manager
    pub fn new() -> Self {
        Self {
            multi_progress: MultiProgress::new(),
            batch_bar: None,
            file_bars: Vec::new(),
            file_states: Mutex::new(Vec::new()),
        }
    }

    /// Initialize progress bars based on file count
    pub fn initialize(&mut self, file_count: usize) {
        // Switch to batch mode for large file sets to avoid terminal spam
        if file_count > MAX_INDIVIDUAL_PROGRESS_BARS + 1 {
            let batch_bar = ProgressBar::new(file_count as u64);
            batch_bar.set_style(BATCH_STYLE.clone());
            self.batch_bar = Some(self.multi_progress.add(batch_bar));
        }

        let bars_to_create = file_count.min(MAX_INDIVIDUAL_PROGRESS_BARS);
        for _ in 0..bars_to_create {
            let pb = ProgressBar::new(0);
            pb.set_style(PROGRESS_STYLE.clone());
            self.file_bars.push(self.multi_progress.add(pb));
        }
    }

    /// Register a file before its frame count is known
    pub fn start_file(&self, index: usize, path: &Path) {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        {
            let mut states = self.file_states.lock();
            if index >= states.len() {
                states.resize(index + 1, FileState::default());
            }
            if let Some(state) = states.get_mut(index) {
                *state = FileState {
                    name,
                    frames_done: 0,
                    frames_total: 0,
                };
            }
        }
        self.update_bars();
    }

    /// Observer reporting frame progress for the file at `index`
    pub const fn observer(&self, index: usize) -> FileProgress<'_> {
        FileProgress {
            manager: self,
            index,
        }
    }

    /// Mark file as completed and update batch progress
    pub fn complete_file(&self, index: usize) {
        if let Some(ref batch_bar) = self.batch_bar {
            batch_bar.inc(1);
        }

        if let Some(state) = self.file_states.lock().get_mut(index) {
            state.name = format!("✓ {}", state.name);
            state.frames_done = state.frames_total;
        }
        self.update_bars();
    }

    /// Clean up all progress displays
    pub fn finish(&self) {
        if let Some(ref batch_bar) = self.batch_bar {
            batch_bar.finish_with_message("All files processed");
        }
        let _ = self.multi_progress.clear();
    }

    fn update_frames(&self, index: usize, frames_done: usize, frames_total: usize) {
        if let Some(state) = self.file_states.lock().get_mut(index) {
            state.frames_done = frames_done;
            state.frames_total = frames_total;
        }
        self.update_bars();
    }

    /// Update all progress bars to show the last N active files
    fn update_bars(&self) {
        let states = self.file_states.lock();
        let active: Vec<&FileState> = states.iter().filter(|s| !s.name.is_empty()).collect();

        let start_idx = active.len().saturating_sub(MAX_INDIVIDUAL_PROGRESS_BARS);
        let visible = active.get(start_idx..).unwrap_or(&[]);

        for (bar, state) in self.file_bars.iter().zip(visible) {
            bar.set_length(state.frames_total as u64);
            bar.set_position(state.frames_done as u64);
            let width = state.frames_total.to_string().len();
            bar.set_message(format!(
                "{:>width$}/{} frames",
                state.frames_done, state.frames_total
            ));
            bar.set_prefix(state.name.clone());
        }

        // Clear any unused bars
        for bar in self.file_bars.iter().skip(visible.len()) {
            bar.set_length(0);
            bar.set_position(0);
            bar.set_message(String::new());
            bar.set_prefix(String::new());
        }
    }
}

/// Frame progress of one file, fed by the pipeline
pub struct FileProgress<'a> {
    manager: &'a ProgressManager,
    index: usize,
}

impl FrameObserver for FileProgress<'_> {
    fn frames_started(&self, total: usize) {
        self.manager.update_frames(self.index, 0, total);
    }

    fn frame_completed(&self, index: usize, total: usize) {
        self.manager.update_frames(self.index, index + 1, total);
    }
}
