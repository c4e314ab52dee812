//! Runtime profile snapshots and sticky optimization flags
//!
//! The interpreter records per-site type observations and per-loop execution
//! evidence; the backend consumes them as a read-only [`ProfileSnapshot`].
//! The only mutable cross-attempt state is [`DisabledOpts`], the sticky set
//! of optimizations a rejit has turned off for a function.
//!
//! # Thread Safety
//!
//! `DisabledOpts` uses a single atomic word with monotonic enabled→disabled
//! transitions. Writers only ever set bits (`fetch_or`), so concurrent
//! readers can never observe a torn or regressing view, and no lock is
//! needed anywhere in the core.

use std::sync::atomic::{AtomicU32, Ordering};

/// Enumerated reasons a later phase may demand recompilation
///
/// Each reason permanently disables one optimization when it fires. The set
/// is fixed and small, which is what bounds the rejit retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejitReason {
    /// Aggressive int type specialization proved unsound
    AggressiveIntTypeSpec = 0,
    /// Inlining of `apply`-style calls proved unsound
    InlineApply = 1,
    /// Inlining of spread calls proved unsound
    InlineSpread = 2,
    /// Stack-allocated argument object optimization proved unsound
    StackArgOpt = 3,
    /// Switch dispatch specialization saw an unexpected value shape
    SwitchOpt = 4,
    /// Int overflow tracking proved unsound
    TrackIntOverflow = 5,
}

impl RejitReason {
    /// All reasons, in bit order
    pub const ALL: [RejitReason; 6] = [
        RejitReason::AggressiveIntTypeSpec,
        RejitReason::InlineApply,
        RejitReason::InlineSpread,
        RejitReason::StackArgOpt,
        RejitReason::SwitchOpt,
        RejitReason::TrackIntOverflow,
    ];

    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for RejitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AggressiveIntTypeSpec => "aggressive int type spec disabled",
            Self::InlineApply => "inline apply disabled",
            Self::InlineSpread => "inline spread disabled",
            Self::StackArgOpt => "stack arg opt disabled",
            Self::SwitchOpt => "switch opt disabled",
            Self::TrackIntOverflow => "track int overflow disabled",
        };
        f.write_str(name)
    }
}

/// Sticky per-function disabled-optimization flags
///
/// Transitions are monotonic: bits are only ever set, never cleared.
/// `disable` is set-if-unset and reports whether this call made the
/// transition, so the rejit controller can detect a reason firing twice.
#[derive(Debug, Default)]
pub struct DisabledOpts {
    bits: AtomicU32,
}

impl DisabledOpts {
    pub fn new() -> Self {
        DisabledOpts {
            bits: AtomicU32::new(0),
        }
    }

    /// Disable the optimization behind `reason`
    ///
    /// Returns `true` if this call newly disabled it, `false` if it was
    /// already disabled.
    pub fn disable(&self, reason: RejitReason) -> bool {
        let prior = self.bits.fetch_or(reason.bit(), Ordering::AcqRel);
        prior & reason.bit() == 0
    }

    /// True if `reason`'s optimization has been disabled
    #[inline]
    pub fn is_disabled(&self, reason: RejitReason) -> bool {
        self.bits.load(Ordering::Acquire) & reason.bit() != 0
    }

    /// Number of disabled optimizations
    pub fn disabled_count(&self) -> u32 {
        self.bits.load(Ordering::Acquire).count_ones()
    }
}

/// Which construct kinds receive a profile-gap guard
///
/// The exact heuristic is tuned empirically and treated as configuration;
/// the core only enforces guard placement and the once-per-site rule.
#[derive(Debug, Clone, Copy)]
pub struct ProfileGapPolicy {
    pub guard_prop_access: bool,
    pub guard_elem_access: bool,
    pub guard_call_sites: bool,
}

impl Default for ProfileGapPolicy {
    fn default() -> Self {
        ProfileGapPolicy {
            guard_prop_access: true,
            guard_elem_access: true,
            guard_call_sites: true,
        }
    }
}

/// Read-only profile snapshot for one function
///
/// Keyed by profiled-site id for accesses and call sites, plus per-loop
/// "ever profiled" flags. Taken once per compile attempt; never written by
/// the backend.
#[derive(Debug, Default)]
pub struct ProfileSnapshot {
    /// Observation count per site id
    site_samples: Vec<u32>,
    /// Per-loop: interpreter ever profiled an iteration
    loop_profiled: Vec<bool>,
    disabled: DisabledOpts,
}

impl ProfileSnapshot {
    /// Empty snapshot: no site has observations, no loop was profiled
    pub fn empty(site_count: u16, loop_count: usize) -> Self {
        ProfileSnapshot {
            site_samples: vec![0; site_count as usize],
            loop_profiled: vec![false; loop_count],
            disabled: DisabledOpts::new(),
        }
    }

    /// Snapshot with every site observed and every loop profiled
    pub fn warm(site_count: u16, loop_count: usize) -> Self {
        ProfileSnapshot {
            site_samples: vec![1; site_count as usize],
            loop_profiled: vec![true; loop_count],
            disabled: DisabledOpts::new(),
        }
    }

    /// Record interpreter observations for a site (producer side)
    pub fn set_site_samples(&mut self, site: u16, samples: u32) {
        if let Some(slot) = self.site_samples.get_mut(site as usize) {
            *slot = samples;
        }
    }

    /// Mark a loop as profiled (producer side)
    pub fn set_loop_profiled(&mut self, loop_num: u16) {
        if let Some(slot) = self.loop_profiled.get_mut(loop_num as usize) {
            *slot = true;
        }
    }

    /// True if the interpreter gathered any observations for `site`
    #[inline]
    pub fn has_site_data(&self, site: u16) -> bool {
        self.site_samples
            .get(site as usize)
            .is_some_and(|&samples| samples > 0)
    }

    /// True if the interpreter ever profiled an iteration of `loop_num`
    pub fn loop_ever_profiled(&self, loop_num: u16) -> bool {
        self.loop_profiled
            .get(loop_num as usize)
            .copied()
            .unwrap_or(false)
    }

    /// The function's sticky disabled-optimization flags
    pub fn disabled(&self) -> &DisabledOpts {
        &self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_is_set_if_unset() {
        let flags = DisabledOpts::new();
        assert!(!flags.is_disabled(RejitReason::InlineApply));
        assert!(flags.disable(RejitReason::InlineApply));
        assert!(!flags.disable(RejitReason::InlineApply));
        assert!(flags.is_disabled(RejitReason::InlineApply));
        assert_eq!(flags.disabled_count(), 1);
    }

    #[test]
    fn reasons_have_distinct_bits() {
        let flags = DisabledOpts::new();
        for reason in RejitReason::ALL {
            assert!(flags.disable(reason));
        }
        assert_eq!(flags.disabled_count(), RejitReason::ALL.len() as u32);
    }

    #[test]
    fn snapshot_site_data() {
        let mut profile = ProfileSnapshot::empty(3, 1);
        assert!(!profile.has_site_data(1));
        profile.set_site_samples(1, 7);
        assert!(profile.has_site_data(1));
        assert!(!profile.has_site_data(2));
        assert!(!profile.loop_ever_profiled(0));
        profile.set_loop_profiled(0);
        assert!(profile.loop_ever_profiled(0));
    }
}
