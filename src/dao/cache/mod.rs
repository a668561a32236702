pub mod cache;

pub use cache::CacheService;
