//! The closed sets of data sources and rate-limited external resources.
//!
//! This file is also compiled into the build script, so it must not depend on anything
//! else in the crate.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

const fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

/// One collectible data source.
///
/// The declaration order is the order in which outcomes are reported.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumCount,
    EnumIter,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    /// Bibliographic metadata (title, authors, publisher).
    Metadata,
    /// Amazon merchant-fulfilled offers.
    Amazon,
    Abebooks,
    Alibris,
    Biblio,
    Zvab,
    /// Series membership, matched against the local series catalogue.
    Series,
    /// Edition and offer aggregation.
    Bookfinder,
    /// Active auction listings.
    EbayActive,
    /// Historical (sold) auction comparables.
    EbaySold,
}

impl SourceName {
    /// How long collected data stays fresh unless configured otherwise.
    #[must_use]
    pub const fn default_max_age(self) -> Duration {
        match self {
            Self::Metadata | Self::Series => days(90),
            Self::Amazon => days(7),
            Self::Abebooks | Self::Alibris | Self::Biblio | Self::Zvab | Self::Bookfinder => days(14),
            Self::EbayActive => days(3),
            Self::EbaySold => days(30),
        }
    }

    /// The external resource whose rate limit applies when collecting from this source.
    #[must_use]
    pub const fn resource(self) -> Option<ResourceName> {
        match self {
            Self::Metadata | Self::Series => None,
            Self::Amazon => Some(ResourceName::Amazon),
            Self::Abebooks | Self::Alibris | Self::Biblio | Self::Zvab | Self::Bookfinder => Some(ResourceName::Marketplace),
            Self::EbayActive | Self::EbaySold => Some(ResourceName::EbayBrowse),
        }
    }

    /// Whether a previously collected low-confidence estimate forces this source to be recollected.
    ///
    /// Sold comparables are sometimes substituted with an estimate derived from active
    /// listings; such a value is retried on every call until a real collection succeeds.
    #[must_use]
    pub const fn retries_estimates(self) -> bool {
        matches!(self, Self::EbaySold)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A named external resource with its own token bucket.
///
/// The derived ordering is the fixed order in which tokens are acquired.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceName {
    EbayBrowse,
    Amazon,
    Marketplace,
}

impl ResourceName {
    /// Default `(rate_per_second, burst_capacity)`, kept below the published vendor limits.
    #[must_use]
    pub const fn default_limits(self) -> (f64, u32) {
        match self {
            Self::EbayBrowse => (8.0, 10),
            Self::Amazon => (2.0, 5),
            Self::Marketplace => (1.0, 3),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}
