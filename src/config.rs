use std::time::Duration;

use crate::{ConfigError, DEFAULT_ALPHA};

/// Settings for a single client run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// The number of messages to exchange.
    pub count: u64,

    /// The EWMA smoothing factor, in (0, 1].
    pub alpha: f64,

    /// The resource requested in the CONNECT, used when the URL doesn't carry one.
    pub path: String,

    /// Give up if the server hasn't answered the CONNECT in time.
    pub establish_timeout: Option<Duration>,

    /// Stop early if a reply doesn't arrive in time.
    pub reply_timeout: Option<Duration>,

    /// Close the session if a datagram arrives before the CONNECT was answered, instead of ignoring it.
    pub strict: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            count: 10,
            alpha: DEFAULT_ALPHA,
            path: "/counter".to_string(),
            establish_timeout: None,
            reply_timeout: None,
            strict: false,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }

        if self.count == 0 {
            return Err(ConfigError::InvalidCount);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// The number of concurrent sessions allowed per connection, advertised in SETTINGS.
    pub max_sessions: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_sessions: 1 }
    }
}
