//! Runtime configuration flags for the monitor.

use ifwatch_types::{Flag, FlagSet};
use tracing::warn;

/// Behavior toggles selected by the embedding application (typically from
/// CLI flags). The monitor consumes only the resulting bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFlag {
    /// Periodically log detailed counters
    StatsForNerds,
    /// Only track IPv4 addresses and routes
    PreferredFamilyV4,
    /// Only track IPv6 addresses and routes
    PreferredFamilyV6,
    /// Track interfaces beyond Ethernet and 802.11
    IncludeNonIeee802,
    /// Hex-dump every received datagram
    DumpPackets,
    /// Open the socket in non-blocking mode
    NonBlocking,
}

impl Flag for RuntimeFlag {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RuntimeFlag::StatsForNerds),
            1 => Some(RuntimeFlag::PreferredFamilyV4),
            2 => Some(RuntimeFlag::PreferredFamilyV6),
            3 => Some(RuntimeFlag::IncludeNonIeee802),
            4 => Some(RuntimeFlag::DumpPackets),
            5 => Some(RuntimeFlag::NonBlocking),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RuntimeFlag::StatsForNerds => "StatsForNerds",
            RuntimeFlag::PreferredFamilyV4 => "PreferredFamilyV4",
            RuntimeFlag::PreferredFamilyV6 => "PreferredFamilyV6",
            RuntimeFlag::IncludeNonIeee802 => "IncludeNonIeee802",
            RuntimeFlag::DumpPackets => "DumpPackets",
            RuntimeFlag::NonBlocking => "NonBlocking",
        }
    }
}

pub type RuntimeFlags = FlagSet<RuntimeFlag>;

/// Resolves contradictory family preferences: both set means no preference.
pub fn reconcile_family_preference(mut flags: RuntimeFlags) -> RuntimeFlags {
    if flags.test(RuntimeFlag::PreferredFamilyV4) && flags.test(RuntimeFlag::PreferredFamilyV6) {
        warn!("both IPv4 and IPv6 family preferences are set, tracking both families");
        flags.reset(RuntimeFlag::PreferredFamilyV4);
        flags.reset(RuntimeFlag::PreferredFamilyV6);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn conflicting_family_preferences_cancel_out() {
        let flags = RuntimeFlags::empty()
            .with(RuntimeFlag::PreferredFamilyV4)
            .with(RuntimeFlag::PreferredFamilyV6)
            .with(RuntimeFlag::StatsForNerds);
        let reconciled = reconcile_family_preference(flags);
        assert!(!reconciled.test(RuntimeFlag::PreferredFamilyV4));
        assert!(!reconciled.test(RuntimeFlag::PreferredFamilyV6));
        assert!(reconciled.test(RuntimeFlag::StatsForNerds));
    }

    #[test]
    fn single_family_preference_is_kept() {
        let flags = RuntimeFlags::empty().with(RuntimeFlag::PreferredFamilyV4);
        assert_eq!(reconcile_family_preference(flags), flags);
    }
}
