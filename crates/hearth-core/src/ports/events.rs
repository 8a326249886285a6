//! Event fan-out seam

use hearth_types::TransferEvent;

/// Receives index mutations once they are durably committed.
///
/// Implementations must not block: `publish` is called on the request path.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TransferEvent);
}
