use std::{fmt::Display, time::Duration};

use envconfig::Envconfig;
use tracing::warn;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "SECURITY_POLICY__RETRY_ATTEMPTS", default = "3")]
    attempts: u32,

    #[envconfig(from = "SECURITY_POLICY__RETRY_DELAY_MILLIS", default = "1000")]
    delay_millis: u64,
}

/// Fixed delay retry without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    attempts: u32,
    delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<Config> for Retry {
    fn from(config: Config) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_millis),
        }
    }
}

impl Retry {
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts => {
                    warn!(
                        "Attempt {attempt}/{} failed, retrying in {:?}: {err}",
                        self.attempts, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
