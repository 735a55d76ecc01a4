//! Host application contract.

use crate::error::UpdateError;
use crate::version::Version;

/// Capabilities the embedding application provides to the session.
///
/// Besides this trait the host owns one more duty: at startup, before any
/// code from the live artifact is loaded, it must move a staged update
/// into place with [`apply_staged_update`](crate::staging::apply_staged_update).
pub trait Host: Send + Sync {
    /// Version of the currently installed application artifact.
    fn app_version(&self) -> Version;

    /// Version of the long-lived entry/shell that loads the artifact.
    fn entry_version(&self) -> Version;

    /// Quit and relaunch the application.
    fn relaunch(&self) -> Result<(), UpdateError>;
}
