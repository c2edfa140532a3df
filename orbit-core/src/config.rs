use serde::Deserialize;
use std::time::Duration;

/// Every tunable the engine and its dependents read, collected in one place the way
/// `ClientConfig` is loaded from an overlay document on top of compiled-in defaults.
///
/// Defaults mirror the reference device SDK's compile-time constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `COAP_MAX_PATH_LEN` — maximum path length accepted on any request.
    pub max_path_len: usize,
    /// `COAP_REQUEST_QUEUE_MAX_ITEMS` — mailbox capacity. Must be >= 16.
    pub request_queue_max_items: usize,
    /// `COAP_REQUEST_QUEUE_TIMEOUT_MS` — worker wait slice when multiplexing.
    pub request_queue_timeout_ms: u64,
    /// `COAP_RESPONSE_TIMEOUT_S` — default per-request age-out deadline.
    pub response_timeout_s: u64,
    /// `COAP_KEEPALIVE_INTERVAL_S` — idle interval before an empty probe. 0 disables.
    pub keepalive_interval_s: u64,
    /// `BLOCKWISE_DOWNLOAD_MAX_BLOCK_SIZE` — preferred Block2 size, 16..=1024.
    pub blockwise_download_max_block_size: u16,
    /// `BLOCKWISE_UPLOAD_MAX_BLOCK_SIZE` — preferred Block1 size, 16..=1024.
    pub blockwise_upload_max_block_size: u16,
    /// `MAX_NUM_OBSERVATIONS` — observation-slot capacity.
    pub max_num_observations: usize,
    /// `FW_UPDATE_ROLLBACK_TIMER_S` — time to confirm a new image.
    pub fw_update_rollback_timer_s: u64,
    /// `FW_UPDATE_OBSERVATION_RETRY_MAX_DELAY_S` — upper bound on retry-to-observe backoff.
    pub fw_update_observation_retry_max_delay_s: u64,
    /// `OTA_MANIFEST_SUBSCRIPTION_POLL_INTERVAL_S` — periodic manifest poll even while
    /// an observation holds. 0 disables.
    pub ota_manifest_subscription_poll_interval_s: u64,
    /// `OTA_MAX_NUM_COMPONENTS` — components accepted per manifest.
    pub ota_max_num_components: usize,
    /// `RPC_MAX_NUM_METHODS` — registered RPC handler capacity.
    pub rpc_max_num_methods: usize,

    /// CoAP `ACK_TIMEOUT`, seconds (RFC 7252 §4.8 default is 2).
    pub ack_timeout_s: f64,
    /// CoAP `ACK_RANDOM_FACTOR` (RFC 7252 §4.8 default is 1.5).
    pub ack_random_factor: f64,
    /// CoAP `MAX_RETRANSMIT` (RFC 7252 §4.8 default is 3).
    pub max_retransmit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_path_len: 64,
            request_queue_max_items: 16,
            request_queue_timeout_ms: 1000,
            response_timeout_s: 10,
            keepalive_interval_s: 9,
            blockwise_download_max_block_size: 1024,
            blockwise_upload_max_block_size: 1024,
            max_num_observations: 10,
            fw_update_rollback_timer_s: 10 * 60,
            fw_update_observation_retry_max_delay_s: 60,
            ota_manifest_subscription_poll_interval_s: 0,
            ota_max_num_components: 2,
            rpc_max_num_methods: 10,
            ack_timeout_s: 2.0,
            ack_random_factor: 1.5,
            max_retransmit: 3,
        }
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_s)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        if self.keepalive_interval_s == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keepalive_interval_s))
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_s)
    }

    /// Randomized initial retransmit timeout in `[ACK_TIMEOUT, ACK_TIMEOUT * RANDOM_FACTOR]`.
    pub fn initial_retransmit_timeout(&self, jitter: f64) -> Duration {
        debug_assert!((0.0..=1.0).contains(&jitter));
        let lo = self.ack_timeout_s;
        let hi = self.ack_timeout_s * self.ack_random_factor;
        Duration::from_secs_f64(lo + (hi - lo) * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.ack_timeout_s, 2.0);
        assert_eq!(cfg.ack_random_factor, 1.5);
        assert_eq!(cfg.max_retransmit, 3);
        assert!(cfg.request_queue_max_items >= 16);
    }

    #[test]
    fn initial_retransmit_timeout_is_bounded() {
        let cfg = ClientConfig::default();
        let lo = cfg.initial_retransmit_timeout(0.0);
        let hi = cfg.initial_retransmit_timeout(1.0);
        assert_eq!(lo, Duration::from_secs_f64(2.0));
        assert_eq!(hi, Duration::from_secs_f64(3.0));
    }
}
