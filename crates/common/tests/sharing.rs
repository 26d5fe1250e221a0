//! Integration tests for document sharing across identities and sessions

use async_trait::async_trait;

use ::common::crypto::{
    AuthSignature, Authenticator, ProtectedPrivateKey, ProtectionError, ProtectionKey, SecretKey,
};
use ::common::document::{DocumentError, SealedDocument};

/// Signs deterministically, standing in for a login wallet
struct LoginWallet {
    seed: &'static str,
}

#[async_trait]
impl Authenticator for LoginWallet {
    async fn sign_message(&self, challenge: &str) -> Result<AuthSignature, ProtectionError> {
        Ok(AuthSignature {
            signature: format!("sig({}, {})", self.seed, challenge),
            address: format!("1{}", self.seed),
        })
    }
}

#[test]
fn test_two_recipients_and_forget() {
    let alice = SecretKey::generate().unwrap();
    let bob = SecretKey::generate().unwrap();
    let carol = SecretKey::generate().unwrap();

    let mut sealed = SealedDocument::seal(
        b"quarterly report",
        "alice",
        &alice,
        &[
            ("bob".to_string(), bob.public()),
            ("carol".to_string(), carol.public()),
        ],
    )
    .unwrap();
    assert_eq!(sealed.grant_handles(), vec!["alice", "bob", "carol"]);

    // the stored form travels as JSON
    let json = serde_json::to_string(&sealed).unwrap();
    let restored: SealedDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.open("bob", &bob).unwrap(), b"quarterly report");
    assert_eq!(restored.open("carol", &carol).unwrap(), b"quarterly report");

    assert!(sealed.forget_grant("bob"));
    assert!(!sealed.forget_grant("bob"));
    assert!(matches!(
        sealed.open("bob", &bob),
        Err(DocumentError::GrantNotFound(_))
    ));
    assert_eq!(sealed.open("carol", &carol).unwrap(), b"quarterly report");
    assert_eq!(sealed.open("alice", &alice).unwrap(), b"quarterly report");
}

#[test]
fn test_reshare_leaves_ciphertext_alone() {
    let alice = SecretKey::generate().unwrap();
    let bob = SecretKey::generate().unwrap();
    let dave = SecretKey::generate().unwrap();

    let mut sealed = SealedDocument::seal(
        b"contract",
        "alice",
        &alice,
        &[("bob".to_string(), bob.public())],
    )
    .unwrap();
    let before = serde_json::to_value(sealed.document()).unwrap();

    // a recipient can pass the document on without the author
    sealed.share_with("bob", &bob, "dave", &dave.public()).unwrap();
    assert_eq!(serde_json::to_value(sealed.document()).unwrap(), before);
    assert_eq!(sealed.open("dave", &dave).unwrap(), b"contract");

    assert!(matches!(
        sealed.share_with("bob", &bob, "dave", &dave.public()),
        Err(DocumentError::DuplicateGrant(_))
    ));
}

#[test]
fn test_wrong_identity_cannot_open() {
    let alice = SecretKey::generate().unwrap();
    let bob = SecretKey::generate().unwrap();
    let mallory = SecretKey::generate().unwrap();

    let sealed = SealedDocument::seal(
        b"secret",
        "alice",
        &alice,
        &[("bob".to_string(), bob.public())],
    )
    .unwrap();

    assert!(matches!(
        sealed.open("bob", &mallory),
        Err(DocumentError::Share(_))
    ));
}

#[tokio::test]
async fn test_protected_identity_across_sessions() {
    let wallet = LoginWallet { seed: "alice" };
    let alice = SecretKey::generate().unwrap();
    let bob = SecretKey::generate().unwrap();

    // first session: protect the sharing key and persist it
    let stored = {
        let protection = ProtectionKey::request(&wallet).await.unwrap();
        serde_json::to_string(&ProtectedPrivateKey::seal(&alice, &protection).unwrap()).unwrap()
    };
    let sealed = SealedDocument::seal(
        b"meeting notes",
        "alice",
        &alice,
        &[("bob".to_string(), bob.public())],
    )
    .unwrap();
    drop(alice);

    // a later session re-derives the same protection key
    let protection = ProtectionKey::request(&wallet).await.unwrap();
    let protected: ProtectedPrivateKey = serde_json::from_str(&stored).unwrap();
    let alice = protected.open(&protection).unwrap();
    assert_eq!(sealed.open("alice", &alice).unwrap(), b"meeting notes");

    // another login wallet cannot unlock it
    let other = ProtectionKey::request(&LoginWallet { seed: "eve" })
        .await
        .unwrap();
    assert!(matches!(
        protected.open(&other),
        Err(ProtectionError::DecryptionFailed)
    ));
}
