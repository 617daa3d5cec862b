//! Embedded web server collaborator.
//!
//! Playlist materialisation needs somewhere to host generated M3U files;
//! the control point only depends on this contract, not on an
//! implementation.

use crate::errors::ControlError;

/// File host for generated playlists.
pub trait PlaylistHost: Send + Sync {
    /// Make a virtual directory available under the web root. Idempotent.
    fn add_virtual_directory(&self, name: &str);

    /// Publish a file in a virtual directory.
    fn add_file(
        &self,
        directory: &str,
        filename: &str,
        content_type: &str,
        body: &str,
    ) -> Result<(), ControlError>;

    /// Drop every file previously published in the directory.
    fn clear_files(&self, directory: &str);

    /// Base URL of the web root, with a trailing slash
    /// (e.g. `http://192.168.1.10:8080/`).
    fn web_root_url(&self) -> String;
}
