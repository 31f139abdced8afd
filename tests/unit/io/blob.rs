//! Tests for blob stores and transfer length checks

#[cfg(test)]
mod tests {
    use patchmosaic::io::blob::{
        BlobError, BlobStore, DirectoryBlobStore, HttpBlobStore, check_length, store_for_endpoint,
    };

    // Tests the directory store maps bucket and object onto the file tree
    // Verified by joining object before bucket
    #[test]
    fn test_directory_store_reads_objects() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("bucket")).expect("bucket dir");
        std::fs::write(root.path().join("bucket").join("patches-4.npy"), b"payload")
            .expect("write object");
        let store = DirectoryBlobStore::new(root.path());

        assert_eq!(store.get("bucket", "patches-4.npy").expect("get"), b"payload");
        assert_eq!(store.root(), root.path());
    }

    // Tests a missing object is reported as NotFound
    // Verified by mapping every I/O error to Transport
    #[test]
    fn test_directory_store_missing_object() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = DirectoryBlobStore::new(root.path());

        let error = store.get("bucket", "absent.npy").expect_err("missing");

        assert!(matches!(error, BlobError::NotFound));
    }

    // Tests file endpoints select the directory store
    // Verified by always building the HTTP store
    #[test]
    fn test_store_for_file_endpoint() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("b")).expect("bucket dir");
        std::fs::write(root.path().join("b").join("o"), b"x").expect("write");

        let store = store_for_endpoint(&format!("file://{}", root.path().display()));

        assert_eq!(store.get("b", "o").expect("get"), b"x");
    }

    // Tests object URLs ignore a trailing slash on the endpoint
    // Verified by keeping the trailing slash
    #[test]
    fn test_http_object_url() {
        let store = HttpBlobStore::new("https://storage.googleapis.com/");

        assert_eq!(
            store.object_url("patch-data", "patches-8.npy"),
            "https://storage.googleapis.com/patch-data/patches-8.npy"
        );
    }

    // Tests short bodies are detected as truncated transfers
    // Verified by comparing with less-than-or-equal
    #[test]
    fn test_check_length() {
        assert!(check_length(None, 10).is_ok());
        assert!(check_length(Some(10), 10).is_ok());
        assert!(matches!(
            check_length(Some(10), 4),
            Err(BlobError::Truncated {
                expected: 10,
                received: 4
            })
        ));
    }
}
