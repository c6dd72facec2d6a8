//! Change Feed Adapters - Upstream Row-Change Sources
//!
//! Implementations of the `ChangeFeed` port:
//! - Memory: In-process feed for demos and tests
//! - Supabase: Phoenix WebSocket client for the hosted Postgres change stream

pub mod memory;
pub mod supabase;

pub use memory::InMemoryChangeFeed;
pub use supabase::SupabaseRealtimeFeed;
