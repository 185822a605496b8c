use bytes::Bytes;

use crate::{
    constants::{CLA_ISO7816, ins, p1, tags},
    error::DecodingError,
    types::{ApplicationInfo, get_primitive_value, parse_public_key, parse_tlv},
};

keycard_command! {
    /// SELECT the Keycard applet by AID
    ///
    /// An initialized applet answers with the application info template; a
    /// pre-initialized one only sends its secure channel public key.
    pub struct SelectCommand {
        cla: CLA_ISO7816,
        ins: ins::SELECT,
        success: ApplicationInfo,

        builders {
            /// Select the applet instance with the given AID
            pub fn with_aid(aid: impl Into<Bytes>) -> Self {
                Self::new(p1::SELECT_BY_NAME, 0x00).with_data(aid)
            }
        }

        parse = |payload| {
            match payload.first() {
                Some(&tags::TEMPLATE_APPLICATION_INFO) => {
                    ApplicationInfo::try_from(&parse_tlv(payload)?)
                }
                Some(&tags::ECC_PUBLIC_KEY) => {
                    let tlv = parse_tlv(payload)?;
                    let key = parse_public_key(get_primitive_value(tags::ECC_PUBLIC_KEY, &tlv)?)?;
                    Ok(ApplicationInfo::pre_initialized(key))
                }
                _ => Err(DecodingError::UnexpectedTag {
                    expected: tags::TEMPLATE_APPLICATION_INFO,
                }
                .into()),
            }
        }
    }
}
