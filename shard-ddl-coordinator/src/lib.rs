//! The optimistic shard-DDL coordinator's core: live table membership, per-target locks, and
//! the façade external subsystems call into.

mod coordinator;
mod downstream_meta;
mod lock;
mod lock_keeper;
mod member;
mod table_keeper;

pub use coordinator::{Coordinator, SyncOutcome};
pub use downstream_meta::{DownstreamMeta, DownstreamMetaCache, DownstreamMetaResolver};
pub use lock::{ColumnDelta, Lock, TrySyncOutcome};
pub use lock_keeper::LockKeeper;
pub use member::{Member, MemberKey};
pub use table_keeper::TableKeeper;
