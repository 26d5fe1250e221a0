pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Derive, Doc, Hash, Identity, Init, Inscribe, Manifest, Version, Wallet};
