//! Session state of the applet as tracked by the host

use derive_more::Display;

/// Where the host is in the select, pair, open, verify sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AppletState {
    /// No applet selected on the current connection
    #[display("unselected")]
    Unselected,
    /// Applet selected, no pairing held
    #[display("selected ({})", if *initialized { "initialized" } else { "pre-initialized" })]
    Selected {
        /// Whether INIT has been performed
        initialized: bool,
    },
    /// Pairing held for an initialized applet
    #[display("paired")]
    Paired,
    /// Secure channel open
    #[display("secure channel open")]
    ChannelOpen,
    /// Secure channel open and PIN verified
    #[display("authenticated")]
    Authenticated,
}

impl AppletState {
    const fn rank(self) -> u8 {
        match self {
            Self::Unselected => 0,
            Self::Selected { initialized: false } => 1,
            Self::Selected { initialized: true } => 2,
            Self::Paired => 3,
            Self::ChannelOpen => 4,
            Self::Authenticated => 5,
        }
    }

    /// Whether the state satisfies `requirement`
    pub const fn satisfies(self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Selected => self.rank() >= 1,
            Requirement::Uninitialized => matches!(self, Self::Selected { initialized: false }),
            Requirement::Initialized => self.rank() >= 2,
            Requirement::PairingAllowed => {
                matches!(self, Self::Selected { initialized: true } | Self::Paired)
            }
            Requirement::Paired => self.rank() >= 3,
            Requirement::ChannelOpen => self.rank() >= 4,
            Requirement::Authenticated => self.rank() >= 5,
        }
    }

    /// Whether a secure channel is open in this state
    pub const fn channel_open(self) -> bool {
        self.rank() >= 4
    }
}

/// State an operation needs before anything is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Requirement {
    /// Any selected applet
    #[display("a selected applet")]
    Selected,
    /// A selected applet that has not been initialized
    #[display("a pre-initialized applet")]
    Uninitialized,
    /// A selected, initialized applet
    #[display("an initialized applet")]
    Initialized,
    /// An initialized applet without an open channel
    #[display("an initialized applet without secure channel")]
    PairingAllowed,
    /// A pairing with the applet
    #[display("a pairing")]
    Paired,
    /// An open secure channel
    #[display("an open secure channel")]
    ChannelOpen,
    /// A verified PIN
    #[display("PIN verification")]
    Authenticated,
}
