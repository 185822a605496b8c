use crate::{
    constants::{CLA, ins},
    crypto::Challenge,
    types::IdentityProof,
};

keycard_command! {
    /// IDENTIFY CARD: prove possession of the certified identity key
    ///
    /// Allowed with or without a secure channel.
    pub struct IdentCommand {
        cla: CLA,
        ins: ins::IDENTIFY_CARD,
        success: IdentityProof,

        builders {
            /// Sign `challenge` with the identity key
            pub fn with_challenge(challenge: &Challenge) -> Self {
                Self::new(0x00, 0x00).with_data(challenge.to_vec()).with_le(0)
            }
        }

        parse = |payload| {
            IdentityProof::try_from(payload)
        }
    }
}
