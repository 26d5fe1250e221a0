pub mod derive;
pub mod doc;
pub mod hash;
pub mod identity;
pub mod init;
pub mod inscribe;
pub mod manifest;
pub mod version;
pub mod wallet;

pub use derive::Derive;
pub use doc::Doc;
pub use hash::Hash;
pub use identity::Identity;
pub use init::Init;
pub use inscribe::Inscribe;
pub use manifest::Manifest;
pub use version::Version;
pub use wallet::Wallet;
