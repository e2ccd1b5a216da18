//! Latency simulation.
//!
//! Delays are configured in seconds, either as a single number or as a
//! `[min, max]` pair sampled uniformly on every use.

use crate::error::{Result, StubError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest delay a response may ask for, in seconds (one day).
pub const MAX_DELAY_SECS: f64 = 86_400.0;

/// Delay configuration attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Delay {
    /// Fixed delay in seconds
    Fixed(f64),
    /// Uniform range `[min, max]` in seconds
    Range(f64, f64),
}

impl Delay {
    /// Reject negative, non-finite, oversized or inverted bounds.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Delay::Fixed(secs) => check_seconds(secs),
            Delay::Range(min, max) => {
                check_seconds(min)?;
                check_seconds(max)?;
                if min > max {
                    return Err(StubError::invalid(format!(
                        "delay minimum {} is greater than maximum {}",
                        min, max
                    )));
                }
                Ok(())
            }
        }
    }

    /// Calculate the delay to apply for one response.
    pub fn calculate(&self) -> Duration {
        let secs = match *self {
            Delay::Fixed(secs) => secs,
            Delay::Range(min, max) if min.is_finite() && max.is_finite() && max > min => {
                rand::thread_rng().gen_range(min..=max)
            }
            Delay::Range(min, _) => min,
        };
        // Validated delays are already inside these bounds.
        Duration::from_secs_f64(secs.max(0.0).min(MAX_DELAY_SECS))
    }
}

fn check_seconds(secs: f64) -> Result<()> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(StubError::invalid(format!(
            "delay must be a non-negative number of seconds, got {}",
            secs
        )));
    }
    if secs > MAX_DELAY_SECS {
        return Err(StubError::invalid(format!(
            "delay of {} seconds exceeds the maximum of {} seconds",
            secs, MAX_DELAY_SECS
        )));
    }
    Ok(())
}

/// Compute the wait for an optional delay; absent means no wait.
pub fn compute_delay(delay: Option<&Delay>) -> Duration {
    delay.map(Delay::calculate).unwrap_or(Duration::ZERO)
}

/// Suspend the current task for `duration`.
///
/// Dropping the returned future cancels the wait.
pub async fn wait(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
