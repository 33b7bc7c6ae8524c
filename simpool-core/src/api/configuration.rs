//! The configuration of a DynamicPool.
//!
//! A pool grows by requesting regions of at least `min_growth_bytes` from its backing allocator, or at least
//! `min_initial_bytes` while it holds no region at all, so that the first region may be sized differently from
//! steady-state growth.
//!
//! A pool gives idle regions back according to a single ReclaimPolicy, selected at construction:
//!
//! -   Exact: a region is handed back once its entire extent is free, on allocation failure, on demand, and optionally
//!     after every deallocation.
//! -   Threshold: every idle region is handed back after a deallocation, once the pool is both large and mostly free.

use super::{Error, Result};

/// Default floor for steady-state growth.
pub const DEFAULT_MIN_GROWTH_BYTES: usize = 256;

/// Default floor for the first region.
pub const DEFAULT_MIN_INITIAL_BYTES: usize = 16 * 1024;

/// Default free fraction above which the Threshold policy trims.
pub const DEFAULT_MIN_USAGE_THRESHOLD: f64 = 0.5;

/// Default pool size at or below which the Threshold policy never trims.
pub const DEFAULT_USAGE_THRESHOLD_FLOOR: usize = 512 * 1024 * 1024;

/// Policy used to give idle regions back to the backing allocator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReclaimPolicy {
    /// Hands back regions whose entire extent is covered by a single free Block.
    ///
    /// Free Blocks coalesce across region boundaries, the reclaim pass carves them back apart.
    Exact {
        /// Whether to run the reclaim pass after every deallocation, rather than only on allocation failure.
        reclaim_on_deallocate: bool,
    },
    /// Hands back every idle region once the pool is large and mostly free.
    ///
    /// Free Blocks never coalesce across region boundaries, so that idle regions remain whole.
    Threshold {
        /// Free fraction, `(total - allocated) / total`, above which idle regions are handed back.
        min_usage_threshold: f64,
        /// Total size, in bytes, at or below which no region is handed back.
        usage_threshold_floor: usize,
    },
}

impl ReclaimPolicy {
    /// Returns the Threshold policy, with default parameters.
    pub const fn threshold() -> Self {
        ReclaimPolicy::Threshold {
            min_usage_threshold: DEFAULT_MIN_USAGE_THRESHOLD,
            usage_threshold_floor: DEFAULT_USAGE_THRESHOLD_FLOOR,
        }
    }

    /// Returns whether free Blocks may coalesce across region boundaries.
    pub(crate) fn merges_across_regions(&self) -> bool { matches!(self, ReclaimPolicy::Exact { .. }) }
}

impl Default for ReclaimPolicy {
    fn default() -> Self { ReclaimPolicy::Exact { reclaim_on_deallocate: false } }
}

/// Configuration of a DynamicPool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Configuration {
    /// Floor for steady-state region growth, in bytes.
    pub min_growth_bytes: usize,
    /// Floor for the first region, in bytes.
    pub min_initial_bytes: usize,
    /// Policy used to give idle regions back.
    pub reclaim: ReclaimPolicy,
}

impl Configuration {
    /// Creates the default configuration.
    pub const fn new() -> Self {
        Configuration {
            min_growth_bytes: DEFAULT_MIN_GROWTH_BYTES,
            min_initial_bytes: DEFAULT_MIN_INITIAL_BYTES,
            reclaim: ReclaimPolicy::Exact { reclaim_on_deallocate: false },
        }
    }

    /// Sets the floor for steady-state region growth.
    pub fn with_min_growth_bytes(mut self, bytes: usize) -> Self {
        self.min_growth_bytes = bytes;
        self
    }

    /// Sets the floor for the first region.
    pub fn with_min_initial_bytes(mut self, bytes: usize) -> Self {
        self.min_initial_bytes = bytes;
        self
    }

    /// Sets the reclaim policy.
    pub fn with_reclaim(mut self, reclaim: ReclaimPolicy) -> Self {
        self.reclaim = reclaim;
        self
    }

    /// Checks the configuration, returning `Error::InvalidConfiguration` if rejected.
    pub fn validate(&self) -> Result<()> {
        if let ReclaimPolicy::Threshold { min_usage_threshold, .. } = self.reclaim {
            //  Also rejects NaN.
            if !(0.0..=1.0).contains(&min_usage_threshold) {
                return Err(Error::InvalidConfiguration("min_usage_threshold must be within [0, 1]"));
            }
        }

        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn configuration_default() {
    let configuration = Configuration::default();

    assert_eq!(256, configuration.min_growth_bytes);
    assert_eq!(16 * 1024, configuration.min_initial_bytes);
    assert_eq!(ReclaimPolicy::Exact { reclaim_on_deallocate: false }, configuration.reclaim);
    assert_eq!(Ok(()), configuration.validate());
}

#[test]
fn configuration_builder() {
    let configuration = Configuration::new()
        .with_min_growth_bytes(1024)
        .with_min_initial_bytes(4096)
        .with_reclaim(ReclaimPolicy::threshold());

    assert_eq!(1024, configuration.min_growth_bytes);
    assert_eq!(4096, configuration.min_initial_bytes);
    assert_eq!(
        ReclaimPolicy::Threshold { min_usage_threshold: 0.5, usage_threshold_floor: 512 * 1024 * 1024 },
        configuration.reclaim
    );
}

#[test]
fn configuration_validate() {
    fn validate(min_usage_threshold: f64) -> Result<()> {
        let reclaim = ReclaimPolicy::Threshold { min_usage_threshold, usage_threshold_floor: 0 };
        Configuration::new().with_reclaim(reclaim).validate()
    }

    assert_eq!(Ok(()), validate(0.0));
    assert_eq!(Ok(()), validate(0.5));
    assert_eq!(Ok(()), validate(1.0));

    assert!(validate(-0.1).is_err());
    assert!(validate(1.5).is_err());
    assert!(validate(f64::NAN).is_err());
}

#[test]
fn reclaim_policy_merges_across_regions() {
    assert!(ReclaimPolicy::default().merges_across_regions());
    assert!(ReclaimPolicy::Exact { reclaim_on_deallocate: true }.merges_across_regions());
    assert!(!ReclaimPolicy::threshold().merges_across_regions());
}

}
