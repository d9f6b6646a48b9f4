//! Host notification collaborator.

use crate::HostEvent;

/// Delivers completion and report events to the host.
pub trait HostNotifier {
    fn deliver(&mut self, event: HostEvent);
}
