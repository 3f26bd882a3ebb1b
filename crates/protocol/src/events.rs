//! Device and video-class lifecycle events

/// Lifecycle events delivered by the USB device stack
///
/// The stream latch reacts to these: only an opened streaming interface
/// permits transfers, and anything that invalidates the host's view of the
/// stream revokes that permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassEvent {
    /// Host selected a configuration (SET_CONFIGURATION)
    Configured,
    /// Host selected an operational alternate setting on a streaming interface
    StreamOpened { interface: u8 },
    /// Host returned a streaming interface to its zero-bandwidth setting
    StreamClosed { interface: u8 },
    /// Bus reset
    Reset,
    /// Cable removed or VBUS lost
    Disconnected,
    /// Bus suspended
    Suspended,
    /// Bus resumed from suspend
    Resumed,
}

/// Effect of a class event on the stream latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchAction {
    Enable,
    Disable,
    Keep,
}

impl ClassEvent {
    pub fn latch_action(self) -> LatchAction {
        match self {
            Self::StreamOpened { .. } => LatchAction::Enable,
            Self::StreamClosed { .. } | Self::Configured | Self::Reset | Self::Disconnected => {
                LatchAction::Disable
            }
            Self::Suspended | Self::Resumed => LatchAction::Keep,
        }
    }
}
