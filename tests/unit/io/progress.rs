//! Tests for progress tracking across files and frames

#[cfg(test)]
mod tests {
    use patchmosaic::algorithm::executor::FrameObserver;
    use patchmosaic::io::configuration::MAX_INDIVIDUAL_PROGRESS_BARS;
    use patchmosaic::io::progress::ProgressManager;
    use std::path::Path;

    // Tests the full lifecycle of a single file
    // Verified by panicking on an empty batch
    #[test]
    fn test_progress_manager_lifecycle() {
        let mut pm = ProgressManager::new();

        pm.initialize(0);
        pm.finish();

        pm.initialize(1);
        pm.start_file(0, Path::new("cat.gif"));
        let observer = pm.observer(0);
        observer.frames_started(3);
        for frame in 0..3 {
            observer.frame_completed(frame, 3);
        }
        pm.complete_file(0);
        pm.finish();
    }

    // Tests batch mode with more files than individual bars
    // Verified by indexing bars by file position instead of the rolling window
    #[test]
    fn test_batch_mode_rolling_window() {
        let mut pm = ProgressManager::default();
        let file_count = MAX_INDIVIDUAL_PROGRESS_BARS + 3;
        pm.initialize(file_count);

        for index in 0..file_count {
            pm.start_file(index, Path::new(&format!("frame_{index}.png")));
            let observer = pm.observer(index);
            observer.frames_started(1);
            observer.frame_completed(0, 1);
            pm.complete_file(index);
        }
        pm.finish();
    }

    // Tests updates for files never started are ignored
    // Verified by indexing file states without bounds checks
    #[test]
    fn test_unknown_file_index_is_ignored() {
        let mut pm = ProgressManager::new();
        pm.initialize(1);

        pm.observer(4).frame_completed(0, 2);
        pm.complete_file(9);
        pm.finish();
    }
}
