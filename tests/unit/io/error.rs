//! Tests for error classification, source chaining and message formatting

#[cfg(test)]
mod tests {
    use patchmosaic::MosaicError;
    use patchmosaic::io::blob::BlobError;
    use patchmosaic::io::error::{
        ErrorKind, configuration_error, file_system_error, invalid_request, provisioning_error,
    };
    use std::error::Error;

    // Tests error source chaining works correctly
    // Verified by breaking source chain
    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = file_system_error("/tmp/patches-8.npy", "read patch array")(io_error);

        assert!(error.source().is_some());
        assert!(error.to_string().contains("/tmp/patches-8.npy"));
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    // Tests that storage failures name the bucket and object and chain the blob error
    // Verified by omitting the object name from the message
    #[test]
    fn test_storage_error_message() {
        let error = MosaicError::Storage {
            bucket: "patch-data".to_string(),
            object: "patches-16.npy".to_string(),
            source: BlobError::Truncated {
                expected: 100,
                received: 40,
            },
        };

        let message = error.to_string();
        assert!(message.contains("patches-16.npy"));
        assert!(message.contains("patch-data"));
        assert!(message.contains("40 of 100"));
        assert!(error.source().is_some());
    }

    // Tests the kind mapping that separates caller, operator and transient failures
    // Verified by classifying provisioning errors as internal
    #[test]
    fn test_error_kinds() {
        assert_eq!(configuration_error("levels", &"empty").kind(), ErrorKind::Configuration);
        assert_eq!(provisioning_error(8, "load index", &"corrupt").kind(), ErrorKind::Provisioning);
        assert_eq!(invalid_request(&"level 7").kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            MosaicError::DecodeBombGuard {
                width: 100_000,
                height: 100_000,
                limit: 1_000,
            }
            .kind(),
            ErrorKind::DecodeBombGuard
        );
        assert_eq!(MosaicError::Cancelled.kind().as_str(), "cancelled");
    }

    // Tests that only provisioning failures are retryable
    // Verified by marking every error retryable
    #[test]
    fn test_retryable() {
        assert!(provisioning_error(4, "fetch library", &"timeout").is_retryable());
        assert!(!configuration_error("bucket", &"missing").is_retryable());
        assert!(!invalid_request(&"bad image").is_retryable());
    }
}
