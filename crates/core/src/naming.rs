//! Deterministic naming for leaf files, index files and their storage keys.
//!
//! Every name here is a pure function of its inputs so that two workers
//! computing the target file for the same record always agree.

use crate::kind::EntityKind;

/// Name of the root discovery file, also used as its storage key and lock key.
pub const ROBOTS_FILE: &str = "robots.txt";

/// Stable partition for a record id. Negative ids map into `0..base` too.
pub fn partition_value(id: i64, base: u32) -> u32 {
    // rem_euclid with a positive modulus is always in 0..base
    id.rem_euclid(i64::from(base.max(1))) as u32
}

/// 1-based leaf file increment for a per-partition counter.
pub fn file_increment(counter: u64, max_entries_per_file: u64) -> u64 {
    counter.max(1).div_ceil(max_entries_per_file.max(1))
}

/// 1-based index file increment for a leaf file increment.
pub fn index_increment(file_increment: u64, max_entries_per_index_file: u64) -> u64 {
    file_increment.max(1).div_ceil(max_entries_per_index_file.max(1))
}

/// Leaf file name: `{kind}-sitemap-{base}-{value}-{increment}`.
pub fn leaf_file_name(kind: EntityKind, base: u32, value: u32, increment: u64) -> String {
    format!("{kind}-sitemap-{base}-{value}-{increment}")
}

/// Index file name: `{kind}-sitemaps-index-{increment}`.
pub fn index_file_name(kind: EntityKind, increment: u64) -> String {
    format!("{kind}-sitemaps-index-{increment}")
}

/// Object storage key for a leaf or index file.
pub fn storage_key(kind: EntityKind, file_name: &str) -> String {
    format!("{}/{file_name}", kind.storage_prefix())
}

/// Public link crawlers use for a leaf file.
pub fn leaf_link(frontend_domain: &str, file_name: &str) -> String {
    format!(
        "{}/sitemaps/sitemap/{file_name}",
        frontend_domain.trim_end_matches('/')
    )
}

/// Public link crawlers use for an index file.
pub fn index_link(frontend_domain: &str, file_name: &str) -> String {
    format!(
        "{}/sitemaps/index/{file_name}",
        frontend_domain.trim_end_matches('/')
    )
}

/// Direct object location, recorded for operators.
pub fn object_location(location_base_url: &str, key: &str) -> String {
    format!("{}/{key}", location_base_url.trim_end_matches('/'))
}

/// Everything derived from a record's placement in one place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTarget {
    pub kind: EntityKind,
    pub file_increment: u64,
    pub file_name: String,
    pub index_file_name: String,
}

/// Limits that drive naming.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    pub partition_base: u32,
    pub max_entries_per_file: u64,
    pub max_entries_per_index_file: u64,
}

impl Layout {
    /// Resolve the leaf and index file for a record.
    pub fn target(&self, kind: EntityKind, partition_value: u32, counter: u64) -> FileTarget {
        let file_increment = file_increment(counter, self.max_entries_per_file);
        let index_increment = index_increment(file_increment, self.max_entries_per_index_file);
        FileTarget {
            kind,
            file_increment,
            file_name: leaf_file_name(kind, self.partition_base, partition_value, file_increment),
            index_file_name: index_file_name(kind, index_increment),
        }
    }
}

impl From<&crate::config::SitemapsConfig> for Layout {
    fn from(config: &crate::config::SitemapsConfig) -> Self {
        Self {
            partition_base: config.partition_base,
            max_entries_per_file: config.max_entries_per_file,
            max_entries_per_index_file: config.max_entries_per_index_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout {
            partition_base: 10,
            max_entries_per_file: 45_000,
            max_entries_per_index_file: 20_000,
        }
    }

    #[test]
    fn test_partition_value_is_stable() {
        assert_eq!(partition_value(101, 10), 1);
        assert_eq!(partition_value(101, 10), partition_value(101, 10));
        assert_eq!(partition_value(0, 10), 0);
        assert_eq!(partition_value(-3, 10), 7);
    }

    #[test]
    fn test_first_record_in_partition() {
        let value = partition_value(101, 10);
        let target = layout().target(EntityKind::Text, value, 1);
        assert_eq!(target.file_name, "text-sitemap-10-1-1");
        assert_eq!(target.index_file_name, "text-sitemaps-index-1");
    }

    #[test]
    fn test_file_increment_boundary() {
        assert_eq!(file_increment(45_000, 45_000), 1);
        assert_eq!(file_increment(45_001, 45_000), 2);
        assert_eq!(file_increment(90_000, 45_000), 2);
        assert_eq!(file_increment(90_001, 45_000), 3);

        let first = layout().target(EntityKind::Text, 1, 45_000);
        let next = layout().target(EntityKind::Text, 1, 45_001);
        assert_eq!(first.file_name, "text-sitemap-10-1-1");
        assert_eq!(next.file_name, "text-sitemap-10-1-2");
    }

    #[test]
    fn test_index_increment_boundary() {
        assert_eq!(index_increment(20_000, 20_000), 1);
        assert_eq!(index_increment(20_001, 20_000), 2);
        assert_eq!(
            layout().target(EntityKind::Video, 3, 45_000 * 20_000 + 1).index_file_name,
            "video-sitemaps-index-2"
        );
    }

    #[test]
    fn test_names_are_pure() {
        let a = layout().target(EntityKind::Video, 4, 77);
        let b = layout().target(EntityKind::Video, 4, 77);
        assert_eq!(a, b);
    }

    #[test]
    fn test_keys_and_links() {
        assert_eq!(
            storage_key(EntityKind::Text, "text-sitemap-10-1-1"),
            "text-sitemaps/text-sitemap-10-1-1"
        );
        assert_eq!(
            leaf_link("https://example.com/", "text-sitemap-10-1-1"),
            "https://example.com/sitemaps/sitemap/text-sitemap-10-1-1"
        );
        assert_eq!(
            index_link("https://example.com", "text-sitemaps-index-1"),
            "https://example.com/sitemaps/index/text-sitemaps-index-1"
        );
        assert_eq!(
            object_location("https://bucket.s3.amazonaws.com", "video-sitemaps/x"),
            "https://bucket.s3.amazonaws.com/video-sitemaps/x"
        );
    }
}
