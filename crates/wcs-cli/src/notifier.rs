//! Shell notifiers used by the commands.
//!
//! The cache reports visible status changes synchronously from whichever
//! thread noticed them (usually a crawler worker). [`ChannelNotifier`] hands
//! them to the async watch loop; [`LogNotifier`] just traces them.

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wcs_cache::ShellNotifier;

/// Forwards changed paths to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Utf8PathBuf>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Utf8PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ShellNotifier for ChannelNotifier {
    fn notify(&self, path: &Utf8Path) {
        if self.tx.send(path.to_owned()).is_err() {
            trace!(path = %path, "Notification receiver dropped");
        }
    }
}

/// Logs changed paths at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ShellNotifier for LogNotifier {
    fn notify(&self, path: &Utf8Path) {
        debug!(path = %path, "Status changed");
    }
}
