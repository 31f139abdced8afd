//! Layout guard: every source file has a mirrored unit test file and every
//! test file holds at least one test

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::io;
    use std::path::Path;

    const SRC_DIR: &str = "src";
    const UNIT_DIR: &str = "tests/unit";
    const TESTS_DIR: &str = "tests";

    /// Relative paths of `.rs` files and directories below `root`, or an
    /// empty set when `root` does not exist
    fn paths_under(root: &str) -> HashSet<String> {
        let root = Path::new(root);
        collect_relative_paths(root, root).unwrap_or_else(|error| {
            assert!(!root.exists(), "Failed to read {}: {error}", root.display());
            HashSet::new()
        })
    }

    /// Files that organise modules rather than hold logic
    fn is_module_file(path: &str) -> bool {
        path == "main.rs" || path == "lib.rs" || path.ends_with("mod.rs")
    }

    // Tests each source file and directory has a unit test counterpart
    // Verified by adding a source file without a test file
    #[test]
    fn test_all_src_files_have_unit_tests() {
        let test_paths = paths_under(UNIT_DIR);

        let mut missing: Vec<_> = paths_under(SRC_DIR)
            .into_iter()
            .filter(|path| !is_module_file(path) && !test_paths.contains(path))
            .collect();
        missing.sort();

        assert!(
            missing.is_empty(),
            "Source files/directories without unit tests:\n{}",
            missing
                .iter()
                .map(|path| format!("  - {SRC_DIR}/{path} -> {UNIT_DIR}/{path}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    // Tests no unit test file outlives its source file
    // Verified by deleting a source file and keeping its test
    #[test]
    fn test_all_unit_tests_have_src_counterparts() {
        let src_paths = paths_under(SRC_DIR);

        let mut orphaned: Vec<_> = paths_under(UNIT_DIR)
            .into_iter()
            .filter(|path| !path.ends_with("mod.rs") && !src_paths.contains(path))
            .collect();
        orphaned.sort();

        assert!(
            orphaned.is_empty(),
            "Unit test files/directories without a source counterpart:\n{}",
            orphaned
                .iter()
                .map(|path| format!("  - {UNIT_DIR}/{path} -> {SRC_DIR}/{path} (missing)"))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    fn collect_relative_paths(dir: &Path, base: &Path) -> Result<HashSet<String>, io::Error> {
        let mut paths = HashSet::new();
        if !dir.is_dir() {
            return Ok(paths);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let relative = path
                .strip_prefix(base)
                .map_err(io::Error::other)?
                .to_string_lossy()
                .to_string();

            if path.is_dir() {
                paths.insert(relative);
                paths.extend(collect_relative_paths(&path, base)?);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("rs") {
                paths.insert(relative);
            }
        }

        Ok(paths)
    }

    // Tests every test file other than harness and module files declares a test
    // Verified by adding an empty test file
    #[test]
    fn test_all_test_files_contain_tests() {
        let base = Path::new(TESTS_DIR);
        let mut without_tests = Vec::new();

        if let Err(error) = check_test_files(base, base, &mut without_tests) {
            assert!(!base.exists(), "Failed to scan {TESTS_DIR}: {error}");
        }
        without_tests.sort();

        assert!(
            without_tests.is_empty(),
            "Test files without any #[test] functions:\n{}",
            without_tests.join("\n")
        );
    }

    fn check_test_files(dir: &Path, base: &Path, without_tests: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                check_test_files(&path, base, without_tests)?;
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("rs") {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let is_harness = path.parent() == Some(base) && file_name == "main.rs";
            if is_harness || file_name == "mod.rs" {
                continue;
            }

            if !fs::read_to_string(&path)?.contains("#[test]") {
                without_tests.push(format!("  - {}", path.display()));
            }
        }

        Ok(())
    }
}
