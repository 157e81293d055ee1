//! Lifecycle states for leaf records, leaf files and index files.
//!
//! Each enum owns its legal transitions. The metadata store turns
//! [`SitemapFileLifecycle::sources_for`] into a `WHERE lifecycle IN (..)`
//! guard, so an illegal transition never reaches a row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a leaf sitemap file row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapFileLifecycle {
    /// Uploaded to storage but not yet listed in its index file.
    Uploaded,
    /// Listed in its index file with a current lastmod.
    LinkedToIndex,
    /// Content changed after linking; the index entry needs a new lastmod.
    MarkedForLastmodUpdate,
}

impl SitemapFileLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::LinkedToIndex => "linked_to_index",
            Self::MarkedForLastmodUpdate => "marked_for_lastmod_update",
        }
    }

    /// States from which `target` may be entered.
    pub fn sources_for(target: Self) -> &'static [Self] {
        match target {
            Self::Uploaded => &[],
            Self::LinkedToIndex => &[Self::Uploaded, Self::MarkedForLastmodUpdate],
            Self::MarkedForLastmodUpdate => &[Self::LinkedToIndex, Self::MarkedForLastmodUpdate],
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        Self::sources_for(target).contains(&self)
    }
}

/// Lifecycle of an index file row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFileLifecycle {
    /// Uploaded but not yet listed in robots.txt.
    Uploaded,
    /// Listed in robots.txt. Terminal.
    LinkedToRobots,
}

impl IndexFileLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::LinkedToRobots => "linked_to_robots",
        }
    }

    pub fn sources_for(target: Self) -> &'static [Self] {
        match target {
            Self::Uploaded => &[],
            Self::LinkedToRobots => &[Self::Uploaded],
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        Self::sources_for(target).contains(&self)
    }
}

/// Deletion progress of a leaf record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionCycle {
    /// Deleted upstream; the listing entry still needs to be retired.
    MarkedForDeletion,
    /// Listing entry retired (or never listed). Terminal.
    Deleted,
}

impl DeletionCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkedForDeletion => "marked_for_deletion",
            Self::Deleted => "deleted",
        }
    }
}

/// Observable state of a leaf record, derived from its stored flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Ignored,
    Pending,
    Assigned,
    MarkedForUpdate,
    MarkedForDeletion,
    Deleted,
}

impl LinkState {
    /// Derive the state from row flags. Deletion wins over update.
    pub fn derive(
        assigned: bool,
        is_ignored: bool,
        is_deleted: bool,
        deletion_cycle: Option<DeletionCycle>,
        is_marked_for_update: bool,
    ) -> Self {
        match deletion_cycle {
            Some(DeletionCycle::Deleted) => return Self::Deleted,
            Some(DeletionCycle::MarkedForDeletion) => return Self::MarkedForDeletion,
            None => {}
        }
        if is_ignored {
            Self::Ignored
        } else if is_deleted {
            // deleted without a cycle never happens for stored rows
            Self::Deleted
        } else if !assigned {
            Self::Pending
        } else if is_marked_for_update {
            Self::MarkedForUpdate
        } else {
            Self::Assigned
        }
    }
}

macro_rules! str_enum {
    ($ty:ty, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                $(
                    if s == <$ty>::$variant.as_str() {
                        return Ok(<$ty>::$variant);
                    }
                )+
                Err(crate::Error::InvalidLifecycle(s.to_string()))
            }
        }
    };
}

str_enum!(SitemapFileLifecycle, [Uploaded, LinkedToIndex, MarkedForLastmodUpdate]);
str_enum!(IndexFileLifecycle, [Uploaded, LinkedToRobots]);
str_enum!(DeletionCycle, [MarkedForDeletion, Deleted]);
