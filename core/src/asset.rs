//! The asset download seam.
//!
//! Textures and other object-path assets come from an external asset
//! manager; the engine only names the file it wants and polls the returned
//! handle. Implementations may hit the network, a disk cache or (in tests)
//! an in-memory map.

use crate::task::TaskHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    /// No such file under the object path; the caller tries its next
    /// candidate name.
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset transfer failed: {0}")]
    Transfer(String),
}

pub type AssetResult = Result<Vec<u8>, AssetError>;

/// Asynchronous asset fetching against an object path.
pub trait AssetSource {
    /// Starts downloading `filename` relative to `object_path`. The
    /// password, when given, authorizes protected object paths.
    /// Implementations own the transport: they assemble the final URL
    /// (including the escaped `?password=` query where it applies); the
    /// engine only ever names files.
    fn download_asset(
        &self,
        object_path: &str,
        filename: &str,
        password: Option<&str>,
    ) -> TaskHandle<AssetResult>;
}
