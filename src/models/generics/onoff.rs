//! Generic OnOff Server/Client messages.
use crate::access::{Opcode, SigOpcode};
use crate::models::generics::TransitionTime;
use crate::models::{MessagePackError, PackableMessage};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum GenericOnOffOpcode {
    Get,
    Set,
    SetUnacknowledged,
    Status,
}
impl From<GenericOnOffOpcode> for Opcode {
    fn from(opcode: GenericOnOffOpcode) -> Self {
        let value = match opcode {
            GenericOnOffOpcode::Get => 0x8201,
            GenericOnOffOpcode::Set => 0x8202,
            GenericOnOffOpcode::SetUnacknowledged => 0x8203,
            GenericOnOffOpcode::Status => 0x8204,
        };
        SigOpcode::DoubleOctet(value).into()
    }
}

/// Optional transition of a Set message. Only present together.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Transition {
    pub transition_time: TransitionTime,
    /// Delay in 5 millisecond steps.
    pub delay: u8,
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Get;
impl PackableMessage for Get {
    fn opcode() -> Opcode {
        GenericOnOffOpcode::Get.into()
    }
    fn response_opcode() -> Option<Opcode> {
        Some(GenericOnOffOpcode::Status.into())
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
pub struct SetParameters {
    pub on_off: bool,
    pub tid: u8,
    pub transition: Option<Transition>,
}
impl SetParameters {
    fn size(&self) -> usize {
        if self.transition.is_some() {
            4
        } else {
            2
        }
    }
    fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
        if buffer.len() < self.size() {
            return Err(MessagePackError::SmallBuffer);
        }
        buffer[0] = u8::from(self.on_off);
        buffer[1] = self.tid;
        if let Some(transition) = self.transition {
            buffer[2] = transition.transition_time.value();
            buffer[3] = transition.delay;
        }
        Ok(())
    }
    fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
        let on_off = |b: u8| match b {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(MessagePackError::BadBytes),
        };
        match *buffer {
            [state, tid] => Ok(SetParameters {
                on_off: on_off(state)?,
                tid,
                transition: None,
            }),
            [state, tid, transition_time, delay] => Ok(SetParameters {
                on_off: on_off(state)?,
                tid,
                transition: Some(Transition {
                    transition_time: TransitionTime::new(transition_time),
                    delay,
                }),
            }),
            _ => Err(MessagePackError::BadLength),
        }
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Set(pub SetParameters);
impl PackableMessage for Set {
    fn opcode() -> Opcode {
        GenericOnOffOpcode::Set.into()
    }
    fn response_opcode() -> Option<Opcode> {
        Some(GenericOnOffOpcode::Status.into())
    }
    fn message_size(&self) -> usize {
        self.0.size()
    }
    fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
        self.0.pack_into(buffer)
    }
    fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
        Ok(Set(SetParameters::unpack_from(buffer)?))
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct SetUnacknowledged(pub SetParameters);
impl PackableMessage for SetUnacknowledged {
    fn opcode() -> Opcode {
        GenericOnOffOpcode::SetUnacknowledged.into()
    }
    fn message_size(&self) -> usize {
        self.0.size()
    }
    fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
        self.0.pack_into(buffer)
    }
    fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
        Ok(SetUnacknowledged(SetParameters::unpack_from(buffer)?))
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct Status {
    pub present_on_off: bool,
    /// Target state and remaining time of an ongoing transition.
    pub target: Option<(bool, TransitionTime)>,
}
impl PackableMessage for Status {
    fn opcode() -> Opcode {
        GenericOnOffOpcode::Status.into()
    }
    fn message_size(&self) -> usize {
        if self.target.is_some() {
            3
        } else {
            1
        }
    }
    fn pack_into(&self, buffer: &mut [u8]) -> Result<(), MessagePackError> {
        if buffer.len() < self.message_size() {
            return Err(MessagePackError::SmallBuffer);
        }
        buffer[0] = u8::from(self.present_on_off);
        if let Some((target, remaining)) = self.target {
            buffer[1] = u8::from(target);
            buffer[2] = remaining.value();
        }
        Ok(())
    }
    fn unpack_from(buffer: &[u8]) -> Result<Self, MessagePackError> {
        match *buffer {
            [present] => Ok(Status {
                present_on_off: present != 0,
                target: None,
            }),
            [present, target, remaining] => Ok(Status {
                present_on_off: present != 0,
                target: Some((target != 0, TransitionTime::new(remaining))),
            }),
            _ => Err(MessagePackError::BadLength),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_lengths() {
        assert!(Set::unpack_from(&[0x01]).is_err());
        assert!(Set::unpack_from(&[0x01, 0x02, 0x03]).is_err());
        assert_eq!(
            Set::unpack_from(&[0x01, 0x07]),
            Ok(Set(SetParameters {
                on_off: true,
                tid: 7,
                transition: None
            }))
        );
        let with_transition = Set::unpack_from(&[0x00, 0x07, 0x41, 0x02]).unwrap();
        assert_eq!(
            with_transition.0.transition,
            Some(Transition {
                transition_time: TransitionTime::new(0x41),
                delay: 2
            })
        );
        assert_eq!(
            Set::unpack_from(&[0x02, 0x07]),
            Err(MessagePackError::BadBytes)
        );
    }
    #[test]
    fn test_set_unacknowledged_payload() {
        let set = SetUnacknowledged(SetParameters {
            on_off: true,
            tid: 1,
            transition: None,
        });
        assert_eq!(set.to_access_payload().unwrap(), vec![0x82, 0x03, 0x01, 0x01]);
        assert_eq!(SetUnacknowledged::response_opcode(), None);
    }
    #[test]
    fn test_status_lengths() {
        assert_eq!(
            Status::unpack_from(&[0x01]).unwrap().target,
            None
        );
        assert_eq!(
            Status::unpack_from(&[0x00, 0x01, 0x0A]).unwrap().target,
            Some((true, TransitionTime::new(0x0A)))
        );
        assert!(Status::unpack_from(&[0x00, 0x01]).is_err());
    }
}
