//! Tests for command-line parsing, overrides and batch file handling

#[cfg(test)]
mod tests {
    use crate::support::{checker_image, encode_png, palette_library, publish_library, test_config};
    use clap::Parser;
    use image::ImageFormat;
    use patchmosaic::algorithm::executor::FramePipeline;
    use patchmosaic::io::cli::{
        Cli, Command, ConfigArgs, FileProcessor, output_path, pack_directory,
    };
    use patchmosaic::io::configuration::{DEFAULT_PATCH_SIZE, MosaicConfig};
    use patchmosaic::spatial::tiles::PatchLibrary;
    use std::path::{Path, PathBuf};
    use tracing::Level;

    // Tests the render subcommand with defaults
    // Verified by changing the default patch size
    #[test]
    fn test_parse_render_defaults() {
        let cli = Cli::parse_from(["patchmosaic", "render", "photo.png"]);

        match cli.command {
            Command::Render {
                ref target,
                patch_size,
                no_skip,
            } => {
                assert_eq!(*target, PathBuf::from("photo.png"));
                assert_eq!(patch_size, DEFAULT_PATCH_SIZE);
                assert!(!no_skip);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(cli.should_show_progress());
        assert_eq!(cli.log_level(), Level::INFO);
    }

    // Tests global flags are accepted after the subcommand
    // Verified by removing global from the quiet flag
    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from([
            "patchmosaic",
            "pack",
            "tiles/",
            "--level",
            "16",
            "--quiet",
            "--log-level",
            "debug",
            "--levels",
            "8,16",
            "--ef-search",
            "300",
        ]);

        assert!(matches!(cli.command, Command::Pack { level: 16, .. }));
        assert!(!cli.should_show_progress());
        assert_eq!(cli.log_level(), Level::DEBUG);
        assert_eq!(cli.config.levels.as_deref(), Some("8,16"));
        assert_eq!(cli.config.ef_search, Some(300));
    }

    // Tests overrides replace configuration values and revalidate
    // Verified by applying overrides without validation
    #[test]
    fn test_config_args_apply() {
        let args = ConfigArgs {
            levels: Some("32,8".to_string()),
            bucket: Some("patch-data".to_string()),
            max_connections: Some(12),
            optimize_index: true,
            ..ConfigArgs::default()
        };

        let config = args.apply(MosaicConfig::default()).expect("apply");

        assert_eq!(config.levels, vec![8, 32]);
        assert_eq!(config.bucket.as_deref(), Some("patch-data"));
        assert_eq!(config.construction.max_connections, 12);
        assert!(!config.construction.skip_optimized_index);

        let bad = ConfigArgs {
            ef_search: Some(0),
            ..ConfigArgs::default()
        };
        assert!(bad.apply(MosaicConfig::default()).is_err());
    }

    // Tests output naming keeps or switches the extension
    // Verified by always keeping the source extension
    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("dir/photo.png"), None),
            PathBuf::from("dir/photo_mosaic.png")
        );
        assert_eq!(
            output_path(Path::new("dir/photo.png"), Some(ImageFormat::Png)),
            PathBuf::from("dir/photo_mosaic.png")
        );
        assert_eq!(
            output_path(Path::new("anim.webp"), Some(ImageFormat::Gif)),
            PathBuf::from("anim_mosaic.gif")
        );
    }

    // Tests packing a directory yields one square tile per decodable image
    // Verified by resizing without the centre crop
    #[test]
    fn test_pack_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("tiles");
        std::fs::create_dir_all(&source).expect("source dir");
        for (index, size) in [(0, (12, 8)), (1, (6, 6)), (2, (5, 9))] {
            let image = checker_image(size.0, size.1, 64, 0);
            std::fs::write(source.join(format!("tile_{index}.png")), encode_png(&image))
                .expect("write tile");
        }
        std::fs::write(source.join("notes.txt"), "ignored").expect("write text");
        let output = dir.path().join("out").join("patches-4.npy");

        pack_directory(&source, 4, &output).expect("pack");

        let library =
            PatchLibrary::from_npy(4, &std::fs::read(&output).expect("read")).expect("library");
        assert_eq!(library.len(), 3);
        assert_eq!(library.level(), 4);
        assert!(pack_directory(&source, 0, &output).is_err());
        assert!(pack_directory(&dir.path().join("missing"), 4, &output).is_err());
    }

    // Tests directory rendering writes outputs and skips them on the next run
    // Verified by collecting previous outputs as inputs
    #[test]
    fn test_file_processor_renders_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        publish_library(root.path(), &palette_library(4));
        let config = test_config(root.path(), &[4]);
        let images = root.path().join("images");
        std::fs::create_dir_all(&images).expect("images dir");
        std::fs::write(images.join("a.png"), encode_png(&checker_image(8, 8, 4, 0)))
            .expect("write a");
        std::fs::write(images.join("b.png"), encode_png(&checker_image(12, 4, 4, 0)))
            .expect("write b");

        let mut processor = FileProcessor::new(FramePipeline::from_config(&config), 4, true, false);
        processor.process(&images).expect("render");

        assert!(images.join("a_mosaic.png").exists());
        assert!(images.join("b_mosaic.png").exists());

        // Outputs are neither re-rendered nor treated as inputs
        processor.process(&images).expect("second render");
        assert!(!images.join("a_mosaic_mosaic.png").exists());
    }

    // Tests an animated WebP whose mosaic was written as GIF is skipped on rerun
    // Verified by checking only the source extension for existing outputs
    #[test]
    fn test_file_processor_skips_animation_written_in_other_format() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = test_config(root.path(), &[4]);
        let images = root.path().join("images");
        std::fs::create_dir_all(&images).expect("images dir");
        // Undecodable, so rendering it would fail
        std::fs::write(images.join("anim.webp"), b"RIFF....WEBP").expect("write webp");
        std::fs::write(images.join("anim_mosaic.gif"), b"GIF89a").expect("write output");

        let mut processor = FileProcessor::new(FramePipeline::from_config(&config), 4, true, false);
        processor.process(&images).expect("skip existing");

        let mut rerender = FileProcessor::new(FramePipeline::from_config(&config), 4, false, false);
        assert!(rerender.process(&images).is_err());
    }

    // Tests a non-image file target is rejected
    // Verified by passing any file to the pipeline
    #[test]
    fn test_file_processor_rejects_non_image() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = test_config(root.path(), &[4]);
        let notes = root.path().join("notes.txt");
        std::fs::write(&notes, "text").expect("write");

        let mut processor = FileProcessor::new(FramePipeline::from_config(&config), 4, true, false);

        assert!(processor.process(&notes).is_err());
    }
}
