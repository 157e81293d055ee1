//! Repository traits for metadata operations.

pub mod index_files;
pub mod links;
pub mod locks;
pub mod sitemap_files;

pub use index_files::IndexFileRepo;
pub use links::LinkRepo;
pub use locks::LockRepo;
pub use sitemap_files::SitemapFileRepo;
