use std::time::Duration;

use serde::Deserialize;
use url::Url;

use pulselink_core::error::{PulseError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub endpoint: EndpointSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub outbound: OutboundSection,

    #[serde(default)]
    pub call: CallSection,
}

impl ClientConfig {
    /// Defaults for everything except the endpoint.
    pub fn for_endpoint(url: impl Into<String>) -> Self {
        Self {
            version: 1,
            endpoint: EndpointSection { url: url.into(), token_param: default_token_param() },
            heartbeat: HeartbeatSection::default(),
            reconnect: ReconnectSection::default(),
            outbound: OutboundSection::default(),
            call: CallSection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PulseError::UnsupportedVersion);
        }

        self.endpoint.validate()?;
        self.heartbeat.validate()?;
        self.reconnect.validate()?;
        self.outbound.validate()?;
        self.call.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSection {
    pub url: String,

    #[serde(default = "default_token_param")]
    pub token_param: String,
}

impl EndpointSection {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| PulseError::Config(format!("endpoint.url is not a valid url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(PulseError::Config("endpoint.url must use ws:// or wss://".into()));
        }
        if self.token_param.is_empty() {
            return Err(PulseError::Config("endpoint.token_param must not be empty".into()));
        }
        Ok(())
    }

    /// Endpoint URI with the session token as a query parameter.
    pub fn connect_uri(&self, token: &str) -> Result<String> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| PulseError::Config(format!("endpoint.url is not a valid url: {e}")))?;
        url.query_pairs_mut().append_pair(&self.token_param, token);
        Ok(url.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self { interval_ms: default_heartbeat_interval_ms() }
    }
}

impl HeartbeatSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=300000).contains(&self.interval_ms) {
            return Err(PulseError::Config(
                "heartbeat.interval_ms must be between 1000 and 300000".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=60000).contains(&self.base_delay_ms) {
            return Err(PulseError::Config(
                "reconnect.base_delay_ms must be between 100 and 60000".into(),
            ));
        }
        if !(1..=16).contains(&self.max_attempts) {
            return Err(PulseError::Config(
                "reconnect.max_attempts must be between 1 and 16".into(),
            ));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundSection {
    /// Queue cap while disconnected; `None` means unbounded.
    #[serde(default)]
    pub max_queued: Option<usize>,
}

impl OutboundSection {
    pub fn validate(&self) -> Result<()> {
        if self.max_queued == Some(0) {
            return Err(PulseError::Config("outbound.max_queued must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSection {
    #[serde(default = "default_signaling_timeout_ms")]
    pub signaling_timeout_ms: u64,
}

impl Default for CallSection {
    fn default() -> Self {
        Self { signaling_timeout_ms: default_signaling_timeout_ms() }
    }
}

impl CallSection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=600000).contains(&self.signaling_timeout_ms) {
            return Err(PulseError::Config(
                "call.signaling_timeout_ms must be between 5000 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }
}

fn default_token_param() -> String {
    "token".into()
}
fn default_heartbeat_interval_ms() -> u64 {
    30000
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_signaling_timeout_ms() -> u64 {
    45000
}
