pub mod default_ttl {
    use crate::access::Opcode;
    use crate::models::config::ConfigOpcode;
    use crate::models::{MessagePackError, PackableMessage};
    use core::convert::{TryFrom, TryInto};

    /// Default TTL used when a message is sent without an explicit TTL.
    /// `0x01` and `0x80..=0xFF` are prohibited.
    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct DefaultTTLState(u8);
    impl DefaultTTLState {
        /// # Panics
        /// Panics if `v` is a prohibited value.
        #[must_use]
        pub fn new(v: u8) -> DefaultTTLState {
            match Self::try_new(v) {
                None => panic!("bad DefaultTTL given"),
                Some(ttl) => ttl,
            }
        }
        #[must_use]
        pub const fn try_new(v: u8) -> Option<DefaultTTLState> {
            match v {
                0x01 | 0x80..=0xFF => None,
                _ => Some(DefaultTTLState(v)),
            }
        }
    }
    impl From<DefaultTTLState> for u8 {
        fn from(ttl: DefaultTTLState) -> Self {
            ttl.0
        }
    }
    impl TryFrom<u8> for DefaultTTLState {
        type Error = MessagePackError;

        fn try_from(value: u8) -> Result<Self, Self::Error> {
            Self::try_new(value).ok_or(MessagePackError::BadBytes)
        }
    }

    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct Get;
    impl PackableMessage for Get {
        fn opcode() -> Opcode {
            ConfigOpcode::DefaultTTLGet.into()
        }
        fn response_opcode() -> Option<Opcode> {
            Some(ConfigOpcode::DefaultTTLStatus.into())
        }

        fn message_size(&self) -> usize {
            0
        }

        fn pack_into(&self, _buffer: &mut [u8]) -> Result<(), MessagePackError> {
            Ok(())
        }

        fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
            if buffer.is_empty() {
                Ok(Get)
            } else {
                Err(MessagePackError::BadLength)
            }
        }
    }
    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct Set(pub DefaultTTLState);
    impl PackableMessage for Set {
        fn opcode() -> Opcode {
            ConfigOpcode::DefaultTTLSet.into()
        }
        fn response_opcode() -> Option<Opcode> {
            Some(ConfigOpcode::DefaultTTLStatus.into())
        }

        fn message_size(&self) -> usize {
            1
        }

        fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
            if buffer.is_empty() {
                Err(MessagePackError::SmallBuffer)
            } else {
                buffer[0] = self.0.into();
                Ok(())
            }
        }

        fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
            match buffer {
                [ttl] => Ok(Set((*ttl).try_into()?)),
                _ => Err(MessagePackError::BadLength),
            }
        }
    }
    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct Status(pub DefaultTTLState);
    impl PackableMessage for Status {
        fn opcode() -> Opcode {
            ConfigOpcode::DefaultTTLStatus.into()
        }

        fn message_size(&self) -> usize {
            1
        }

        fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
            if buffer.is_empty() {
                Err(MessagePackError::SmallBuffer)
            } else {
                buffer[0] = self.0.into();
                Ok(())
            }
        }

        fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
            match buffer {
                [ttl] => Ok(Status((*ttl).try_into()?)),
                _ => Err(MessagePackError::BadLength),
            }
        }
    }
}
/// Config Node Reset. A node receiving it (secured with its Device Key) answers with `Status` and
/// removes itself from the network.
pub mod node_reset {
    use crate::access::Opcode;
    use crate::models::config::ConfigOpcode;
    use crate::models::{MessagePackError, PackableMessage};

    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct Reset;
    impl PackableMessage for Reset {
        fn opcode() -> Opcode {
            ConfigOpcode::NodeReset.into()
        }
        fn response_opcode() -> Option<Opcode> {
            Some(ConfigOpcode::NodeResetStatus.into())
        }

        fn message_size(&self) -> usize {
            0
        }

        fn pack_into(&self, _buffer: &mut [u8]) -> Result<(), MessagePackError> {
            Ok(())
        }

        fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
            if buffer.is_empty() {
                Ok(Reset)
            } else {
                Err(MessagePackError::BadLength)
            }
        }
    }
    #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
    pub struct Status;
    impl PackableMessage for Status {
        fn opcode() -> Opcode {
            ConfigOpcode::NodeResetStatus.into()
        }

        fn message_size(&self) -> usize {
            0
        }

        fn pack_into(&self, _buffer: &mut [u8]) -> Result<(), MessagePackError> {
            Ok(())
        }

        fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
            if buffer.is_empty() {
                Ok(Status)
            } else {
                Err(MessagePackError::BadLength)
            }
        }
    }
}
#[cfg(test)]
mod tests {
    use super::default_ttl::{DefaultTTLState, Set, Status};
    use super::node_reset::Reset;
    use crate::models::{MessagePackError, PackableMessage};

    #[test]
    fn test_default_ttl_prohibited_values() {
        assert!(DefaultTTLState::try_new(0x00).is_some());
        assert!(DefaultTTLState::try_new(0x01).is_none());
        assert!(DefaultTTLState::try_new(0x7F).is_some());
        assert!(DefaultTTLState::try_new(0x80).is_none());
        assert_eq!(Set::unpack_from(&[0x01]), Err(MessagePackError::BadBytes));
        assert_eq!(Status::unpack_from(&[0x05, 0x00]), Err(MessagePackError::BadLength));
    }
    #[test]
    fn test_default_ttl_set_payload() {
        let set = Set(DefaultTTLState::new(5));
        assert_eq!(set.to_access_payload().unwrap(), vec![0x80, 0x0D, 0x05]);
        assert_eq!(Set::unpack_from(&[0x05]), Ok(set));
    }
    #[test]
    fn test_node_reset_payload() {
        assert_eq!(Reset.to_access_payload().unwrap(), vec![0x80, 0x49]);
        assert_eq!(Reset::unpack_from(&[0x00]), Err(MessagePackError::BadLength));
        assert_eq!(Reset::response_opcode().map(|o| o.value()), Some(0x804A));
    }
}
