//! cutover-state — deployment records and their archive.
//!
//! Backed by [redb](https://docs.rs/redb). Records are JSON-serialized into
//! `&[u8]` value columns keyed by `{service}/{deployment_id}`, so a service's
//! history is a prefix scan. A second table maps bare deployment ids to
//! their composite key.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
