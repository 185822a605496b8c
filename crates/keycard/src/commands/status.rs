use crate::{
    constants::{CLA, ins, p1},
    path::{DeriveSource, KeyPath},
    types::ApplicationStatus,
};

keycard_command! {
    /// GET STATUS for the application status template
    pub struct GetStatusCommand {
        cla: CLA,
        ins: ins::GET_STATUS,
        success: ApplicationStatus,

        builders {
            /// Request PIN/PUK retry counters and key state
            pub const fn application() -> Self {
                Self::new(p1::GET_STATUS_APPLICATION, 0x00)
            }
        }

        parse = |payload| {
            ApplicationStatus::try_from(payload)
        }
    }
}

keycard_command! {
    /// GET STATUS for the path of the current key
    pub struct GetKeyPathCommand {
        cla: CLA,
        ins: ins::GET_STATUS,
        success: KeyPath,

        builders {
            /// Request the current key path
            pub const fn key_path() -> Self {
                Self::new(p1::GET_STATUS_KEY_PATH, 0x00)
            }
        }

        parse = |payload| {
            Ok(KeyPath::from_bytes(DeriveSource::Master, payload)?)
        }
    }
}
