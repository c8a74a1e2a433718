//! Bluetooth Mesh Bearers.
//!
//! The stack only needs something that can push raw PDUs out. Incoming PDUs are handed to
//! [`crate::stack::Stack::handle_incoming`] by whoever owns the radio/GATT connection.

/// Type tag of a PDU crossing the bearer. Same values as the Proxy PDU message types.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum PDUType {
    Network = 0x00,
    MeshBeacon = 0x01,
    ProxyConfiguration = 0x02,
    Provisioning = 0x03,
}
impl PDUType {
    #[must_use]
    pub const fn new(v: u8) -> Option<PDUType> {
        match v {
            0x00 => Some(PDUType::Network),
            0x01 => Some(PDUType::MeshBeacon),
            0x02 => Some(PDUType::ProxyConfiguration),
            0x03 => Some(PDUType::Provisioning),
            _ => None,
        }
    }
}
impl From<PDUType> for u8 {
    fn from(t: PDUType) -> Self {
        t as u8
    }
}
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, thiserror::Error)]
pub enum BearerError {
    #[error("bearer is closed")]
    Closed,
    #[error("bearer doesn't support {0:?} PDUs")]
    UnsupportedPDUType(PDUType),
    #[error("bearer failed to send")]
    SendError,
}
/// Sends raw PDUs. Fire-and-forget: `Ok` means the PDU was handed to the bearer, not that it
/// arrived anywhere.
pub trait Transmitter: Send + Sync + 'static {
    fn send(&self, data: &[u8], pdu_type: PDUType) -> Result<(), BearerError>;
}
impl<T: Transmitter + ?Sized> Transmitter for std::sync::Arc<T> {
    fn send(&self, data: &[u8], pdu_type: PDUType) -> Result<(), BearerError> {
        (**self).send(data, pdu_type)
    }
}
