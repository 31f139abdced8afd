/// Blob storage interface and its HTTP and directory implementations
pub mod blob;
/// Command-line argument parsing and batch file processing
pub mod cli;
/// Service constants and typed runtime configuration
pub mod configuration;
/// JSON request and response envelope
pub mod envelope;
/// Error types and result aliases
pub mod error;
/// Image decoding and encoding for static and animated formats
pub mod image;
/// NumPy array wire format for patch libraries
pub mod npy;
/// Progress bar management for batch operations
pub mod progress;
