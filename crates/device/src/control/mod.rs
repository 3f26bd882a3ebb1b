//! Class-specific control request handling
//!
//! The dispatcher owns every extension unit control exposed by the device,
//! keyed by (entity id, control selector). Requests for controls it does not
//! own are reported as not handled so another handler can claim them.
//!
//! Handling is synchronous and never waits on anything: the USB stack may
//! call it from a context where blocking is not allowed.

pub mod extension_unit;

pub use extension_unit::ExtensionControl;

use protocol::{ControlKey, ControlSetup, ControlStatus};
use std::collections::HashMap;
use tracing::debug;

/// Routes control requests to extension unit controls
#[derive(Debug, Default)]
pub struct ControlDispatcher {
    controls: HashMap<ControlKey, ExtensionControl>,
}

impl ControlDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dispatcher from a set of controls
    pub fn with_controls(controls: impl IntoIterator<Item = ExtensionControl>) -> Self {
        let mut dispatcher = Self::new();
        for control in controls {
            dispatcher.register(control);
        }
        dispatcher
    }

    /// Add a control, returning any control previously registered at its key
    pub fn register(&mut self, control: ExtensionControl) -> Option<ExtensionControl> {
        self.controls.insert(control.key(), control)
    }

    pub fn control(&self, key: ControlKey) -> Option<&ExtensionControl> {
        self.controls.get(&key)
    }

    pub fn owns(&self, key: ControlKey) -> bool {
        self.controls.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Largest control width, used to size response buffers
    pub fn max_width(&self) -> usize {
        self.controls
            .values()
            .map(ExtensionControl::width)
            .max()
            .unwrap_or(0)
    }

    /// Answer a control request
    ///
    /// `data` is the data-stage buffer and `len` its valid length: input for
    /// SET requests, output for GET requests. A request code outside the
    /// extension unit verb set is accepted as a no-op on an owned control
    /// and leaves `len` untouched.
    pub fn handle(
        &mut self,
        setup: &ControlSetup,
        data: &mut [u8],
        len: &mut usize,
    ) -> ControlStatus {
        let Some(control) = self.controls.get_mut(&setup.key) else {
            return ControlStatus::NotHandled;
        };

        match setup.request_code() {
            Some(request) => {
                debug!(
                    "{} on {} (wLength {}, len {})",
                    request.name(),
                    setup.key,
                    setup.length,
                    len
                );
                control.handle(request, data, len);
            }
            None => {
                debug!("Ignoring request {:#04x} on {}", setup.request, setup.key);
            }
        }

        ControlStatus::Handled
    }
}
