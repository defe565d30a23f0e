//! Time budget helpers for bounded polling.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until `deadline`, or an error once it is spent.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    remaining_at(deadline, Instant::now())
}

/// Delay before the next poll: the poll interval, capped by what is left of the budget.
pub fn next_poll_delay(deadline: Instant, interval: Duration) -> Result<Duration> {
    Ok(interval.min(remaining_budget(deadline)?))
}

fn remaining_at(deadline: Instant, now: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(now)
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(anyhow!("exploration timed out"));
    }
    Ok(remaining)
}
