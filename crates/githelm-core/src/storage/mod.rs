// ── Durable storage ──
//
// Backends plus the envelope-aware store layered on top of them.

mod backend;
mod envelope;
mod store;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use envelope::StorageEnvelope;
pub use store::DurableStore;
