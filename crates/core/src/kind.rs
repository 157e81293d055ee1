//! Entity kinds served by the sitemap hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of entity kinds that get their own sitemap tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Article/page links.
    Text,
    /// Video links carrying a `<video:video>` block.
    Video,
}

/// Static per-kind properties.
#[derive(Debug)]
pub struct KindProfile {
    /// Name used in file names, storage prefixes and database rows.
    pub slug: &'static str,
    /// Change frequency assigned to freshly listed entries.
    pub initial_changefreq: crate::sitemap::ChangeFreq,
    /// Whether entries carry video metadata.
    pub has_video: bool,
}

const TEXT: KindProfile = KindProfile {
    slug: "text",
    initial_changefreq: crate::sitemap::ChangeFreq::Hourly,
    has_video: false,
};

const VIDEO: KindProfile = KindProfile {
    slug: "video",
    initial_changefreq: crate::sitemap::ChangeFreq::Weekly,
    has_video: true,
};

impl EntityKind {
    /// Every kind, in a stable order.
    pub const ALL: [EntityKind; 2] = [EntityKind::Text, EntityKind::Video];

    /// Lookup table entry for this kind.
    pub const fn profile(self) -> &'static KindProfile {
        match self {
            Self::Text => &TEXT,
            Self::Video => &VIDEO,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.profile().slug
    }

    /// Storage prefix for this kind's leaf and index files.
    pub fn storage_prefix(self) -> String {
        format!("{}-sitemaps", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidKind(s.to_string()))
    }
}
