use serde::{Deserialize, Serialize};
use std::fmt;

/// One rung of the execution-strategy chain, cheapest first.
///
/// `Fast` through `XLarge` form the unrestricted chain. `Cloud` and
/// `CloudPremium` form the gated chain, reachable only through the
/// `XLarge -> Cloud` bridge and only when an [`ElevationPolicy`] allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast,
    Standard,
    Large,
    #[serde(rename = "xlarge")]
    XLarge,
    Cloud,
    CloudPremium,
}

impl Tier {
    /// Unrestricted chain, in escalation order.
    pub const UNRESTRICTED: [Tier; 4] = [Tier::Fast, Tier::Standard, Tier::Large, Tier::XLarge];

    /// Gated chain, in escalation order.
    pub const GATED: [Tier; 2] = [Tier::Cloud, Tier::CloudPremium];

    /// Fixed successor map, including the bridge into the gated chain.
    pub fn successor(self) -> Option<Tier> {
        match self {
            Tier::Fast => Some(Tier::Standard),
            Tier::Standard => Some(Tier::Large),
            Tier::Large => Some(Tier::XLarge),
            Tier::XLarge => Some(Tier::Cloud),
            Tier::Cloud => Some(Tier::CloudPremium),
            Tier::CloudPremium => None,
        }
    }

    pub fn is_gated(self) -> bool {
        matches!(self, Tier::Cloud | Tier::CloudPremium)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Standard => "standard",
            Tier::Large => "large",
            Tier::XLarge => "xlarge",
            Tier::Cloud => "cloud",
            Tier::CloudPremium => "cloud_premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standing policy for leaving the unrestricted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationPolicy {
    /// Gated tiers are never used.
    #[default]
    Deny,
    /// Gated tiers are allowed after an explicit approval round-trip.
    RequireApproval,
    /// Gated tiers are allowed without asking.
    PreAuthorized,
}

/// Next tier after `current` under `policy`, or `None` at the end of the allowed chain.
pub fn next_tier(current: Tier, policy: ElevationPolicy) -> Option<Tier> {
    let next = current.successor()?;
    if next.is_gated() && policy == ElevationPolicy::Deny {
        return None;
    }
    Some(next)
}

/// True when moving from `current` to `next` crosses into the gated chain
/// and the policy does not pre-authorize it.
pub fn requires_approval(current: Tier, next: Tier, policy: ElevationPolicy) -> bool {
    !current.is_gated() && next.is_gated() && policy == ElevationPolicy::RequireApproval
}
