//! CyxShare Pointer
//!
//! Share codes and the pointer records behind them:
//! - `protocol`: mint, validate, publish and resolve share codes
//! - `cache`: same-device code -> record cache (Sled or memory)
//! - `index`: keyed code -> published pointer index (Redis or memory)
//! - `service`: end-to-end share and fetch flows

pub mod cache;
pub mod index;
pub mod protocol;
pub mod service;

pub use cache::{MemoryPointerCache, PointerCache, SledPointerCache};
pub use index::{MemoryPointerIndex, PointerIndex, RedisIndexConfig, RedisPointerIndex};
pub use protocol::{ProtocolConfig, ShareCodeProtocol};
pub use service::{
    DecryptionKey, Encryption, FetchedFile, ShareOptions, ShareService, SharedFile,
};
