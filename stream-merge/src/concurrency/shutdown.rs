//! Cooperative shutdown signaling.
//!
//! Abstracts tokio's watch channels into a shutdown signal the engine checks
//! at every discovery iteration and every row-processing iteration. The signal
//! carries no payload - observing a change means "stop producing rows".

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Sending on a [`ShutdownTx`] asks the engine to abandon further row
/// production. Resource release still runs; rows already emitted downstream
/// remain valid.
pub type ShutdownTx = watch::Sender<()>;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
///
/// The receiver starts in the "not signaled" state; [`is_shutdown`] becomes
/// true once the transmitter sends or is dropped.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(())
}

/// Returns whether shutdown has been requested on the channel.
///
/// A dropped transmitter counts as a shutdown request, so an engine whose
/// owner went away stops instead of spinning forever.
pub fn is_shutdown(rx: &ShutdownRx) -> bool {
    rx.has_changed().unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_shutdown_initially() {
        let (_tx, rx) = create_shutdown_channel();

        assert!(!is_shutdown(&rx));
    }

    #[test]
    fn test_shutdown_after_send() {
        let (tx, rx) = create_shutdown_channel();

        tx.send(()).expect("receiver is alive");

        assert!(is_shutdown(&rx));
    }

    #[test]
    fn test_shutdown_after_transmitter_drop() {
        let (tx, rx) = create_shutdown_channel();

        drop(tx);

        assert!(is_shutdown(&rx));
    }
}
