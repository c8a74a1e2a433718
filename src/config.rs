//! Lower Transport timing and retransmission parameters.
use crate::mesh::TTL;
use core::time::Duration;

/// Segmentation and Reassembly (SAR) timing plus the access layer response timeout. `Default`
/// gives the Mesh Profile recommended values.
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct NetworkParameters {
    pub default_ttl: TTL,
    /// Reassembly state is discarded when no segment arrives for this long.
    pub incomplete_timeout: Duration,
    /// Acknowledgment delay increment, doubled (`5` means 2.5 segment reception intervals).
    pub ack_delay_increment_x2: u8,
    pub segment_reception_interval: Duration,
    pub segment_transmission_interval: Duration,
    pub unicast_retransmissions: u8,
    pub unicast_retransmissions_without_progress: u8,
    pub unicast_retransmission_interval: Duration,
    pub unicast_retransmission_interval_increment: Duration,
    pub multicast_retransmissions: u8,
    pub multicast_retransmission_interval: Duration,
    pub acknowledged_message_timeout: Duration,
}
pub const MAX_RETRANSMISSIONS: u8 = 16;
pub const MIN_ACKNOWLEDGED_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);
impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            default_ttl: TTL::new(5),
            incomplete_timeout: Duration::from_secs(10),
            ack_delay_increment_x2: 5,
            segment_reception_interval: Duration::from_millis(60),
            segment_transmission_interval: Duration::from_millis(60),
            unicast_retransmissions: 3,
            unicast_retransmissions_without_progress: 3,
            unicast_retransmission_interval: Duration::from_millis(200),
            unicast_retransmission_interval_increment: Duration::from_millis(50),
            multicast_retransmissions: 3,
            multicast_retransmission_interval: Duration::from_millis(250),
            acknowledged_message_timeout: MIN_ACKNOWLEDGED_MESSAGE_TIMEOUT,
        }
    }
}
impl NetworkParameters {
    /// Delay before acknowledging an incomplete segmented message with last segment `seg_n`.
    /// `min(seg_n + 0.5, increment)` segment reception intervals.
    #[must_use]
    pub fn ack_timer(&self, seg_n: u8) -> Duration {
        let half_steps = u32::from(seg_n)
            .saturating_mul(2)
            .saturating_add(1)
            .min(u32::from(self.ack_delay_increment_x2));
        self.segment_reception_interval * half_steps / 2
    }
    /// Minimum interval between two acks of an already completed message.
    #[must_use]
    pub fn complete_ack_interval(&self) -> Duration {
        self.segment_reception_interval * u32::from(self.ack_delay_increment_x2) / 2
    }
    /// Unicast retransmission interval for a message sent with `ttl`. Grows with the number of
    /// hops the message (and its ack) may travel.
    #[must_use]
    pub fn unicast_retransmission_interval(&self, ttl: TTL) -> Duration {
        let hops = u32::from(ttl.value().saturating_sub(1));
        self.unicast_retransmission_interval + self.unicast_retransmission_interval_increment * hops
    }
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: TTL) -> Self {
        self.default_ttl = if ttl.value() == 1 { TTL::new(2) } else { ttl };
        self
    }
    #[must_use]
    pub fn with_unicast_retransmissions(mut self, count: u8, without_progress: u8) -> Self {
        self.unicast_retransmissions = count.clamp(1, MAX_RETRANSMISSIONS);
        self.unicast_retransmissions_without_progress =
            without_progress.clamp(1, self.unicast_retransmissions);
        self
    }
    #[must_use]
    pub fn with_multicast_retransmissions(mut self, count: u8, interval: Duration) -> Self {
        self.multicast_retransmissions = count.min(MAX_RETRANSMISSIONS);
        self.multicast_retransmission_interval = interval;
        self
    }
    #[must_use]
    pub fn with_incomplete_timeout(mut self, timeout: Duration) -> Self {
        self.incomplete_timeout = timeout.max(Duration::from_secs(10));
        self
    }
    #[must_use]
    pub fn with_acknowledged_message_timeout(mut self, timeout: Duration) -> Self {
        self.acknowledged_message_timeout = timeout.max(MIN_ACKNOWLEDGED_MESSAGE_TIMEOUT);
        self
    }
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_timer() {
        let params = NetworkParameters::default();
        assert_eq!(params.ack_timer(0), Duration::from_millis(30));
        assert_eq!(params.ack_timer(1), Duration::from_millis(90));
        assert_eq!(params.ack_timer(31), Duration::from_millis(150));
        assert_eq!(params.complete_ack_interval(), Duration::from_millis(150));
    }
    #[test]
    fn test_unicast_retransmission_interval() {
        let params = NetworkParameters::default();
        assert_eq!(
            params.unicast_retransmission_interval(TTL::new(0)),
            Duration::from_millis(200)
        );
        assert_eq!(
            params.unicast_retransmission_interval(TTL::new(1)),
            Duration::from_millis(200)
        );
        assert_eq!(
            params.unicast_retransmission_interval(TTL::new(5)),
            Duration::from_millis(400)
        );
    }
    #[test]
    fn test_setters_clamp() {
        let params = NetworkParameters::default()
            .with_unicast_retransmissions(0, 9)
            .with_acknowledged_message_timeout(Duration::from_secs(1))
            .with_default_ttl(TTL::new(1));
        assert_eq!(params.unicast_retransmissions, 1);
        assert_eq!(params.unicast_retransmissions_without_progress, 1);
        assert_eq!(params.acknowledged_message_timeout, Duration::from_secs(30));
        assert_eq!(params.default_ttl, TTL::new(2));
    }
}
