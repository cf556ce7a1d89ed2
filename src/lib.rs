#![deny(missing_docs)]
/*!
# tsmeta-rs

Tsmeta-rs is the metadata engine of a time-series storage shard: the
in-memory catalog that names tables, tracks their evolving schemas,
groups child tables under super tables by shared tag schema, indexes
children by the designated tag value, and records every metadata
mutation through a write-ahead action log.

Currently supported:
* Normal, super, child and stream tables with per-kind lifecycles.
* Versioned, bounded schema histories with full history on disk.
* A per-super ordered tag index over the designated tag column.
* Create, drop, schema update and tag-value update operations.
* Checksummed encode/restore of the catalog through a key-value store.

The row storage, the query engine and the network transport live in the
surrounding runtime; the engine consumes them through the [action],
[store] and [repo] seams.
*/

pub mod action;
pub mod codec;
pub mod error;
pub mod index;
pub mod meta;
pub mod model;
pub mod repo;
pub mod store;

pub use error::{MetaError, Result};
pub use meta::Meta;
pub use repo::{Repo, RepoConfig};
