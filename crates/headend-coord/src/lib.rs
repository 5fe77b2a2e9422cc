// Coordination substrate shared by the catalog service and its background
// workers: access to the shared key-value store, advisory task locks, and
// best-effort update notifications.
pub mod conn;
pub mod kv;
pub mod lock;
pub mod notify;
pub mod resp;

pub use conn::{ConnectionManager, CoordConfig};
pub use kv::{KvError, KvResult, KvStore, MemoryKv};
pub use lock::{LockToken, TaskLock};
pub use notify::{Notifier, NotifyHandle, Update};
pub use resp::RemoteKv;
