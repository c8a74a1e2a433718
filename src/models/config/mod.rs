//! Configuration Server/Client messages. Always secured with a Device Key.
use crate::access::SigOpcode::DoubleOctet;
use crate::access::{Opcode, OpcodeConversationError};
use core::convert::TryFrom;

pub mod messages;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum ConfigOpcode {
    DefaultTTLGet,
    DefaultTTLSet,
    DefaultTTLStatus,

    NodeReset,
    NodeResetStatus,
}

impl TryFrom<Opcode> for ConfigOpcode {
    type Error = OpcodeConversationError;
    fn try_from(opcode: Opcode) -> Result<Self, OpcodeConversationError> {
        match opcode {
            Opcode::SIG(DoubleOctet(0x800C)) => Ok(ConfigOpcode::DefaultTTLGet),
            Opcode::SIG(DoubleOctet(0x800D)) => Ok(ConfigOpcode::DefaultTTLSet),
            Opcode::SIG(DoubleOctet(0x800E)) => Ok(ConfigOpcode::DefaultTTLStatus),
            Opcode::SIG(DoubleOctet(0x8049)) => Ok(ConfigOpcode::NodeReset),
            Opcode::SIG(DoubleOctet(0x804A)) => Ok(ConfigOpcode::NodeResetStatus),
            _ => Err(OpcodeConversationError),
        }
    }
}
impl From<ConfigOpcode> for Opcode {
    fn from(opcode: ConfigOpcode) -> Self {
        match opcode {
            ConfigOpcode::DefaultTTLGet => DoubleOctet(0x800C).into(),
            ConfigOpcode::DefaultTTLSet => DoubleOctet(0x800D).into(),
            ConfigOpcode::DefaultTTLStatus => DoubleOctet(0x800E).into(),
            ConfigOpcode::NodeReset => DoubleOctet(0x8049).into(),
            ConfigOpcode::NodeResetStatus => DoubleOctet(0x804A).into(),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_opcode_conversion() {
        for opcode in [
            ConfigOpcode::DefaultTTLGet,
            ConfigOpcode::DefaultTTLSet,
            ConfigOpcode::DefaultTTLStatus,
            ConfigOpcode::NodeReset,
            ConfigOpcode::NodeResetStatus,
        ] {
            assert_eq!(ConfigOpcode::try_from(Opcode::from(opcode)), Ok(opcode));
        }
        assert_eq!(Opcode::from(ConfigOpcode::NodeReset).value(), 0x8049);
        assert!(ConfigOpcode::try_from(Opcode::SIG(DoubleOctet(0x8201))).is_err());
    }
}
