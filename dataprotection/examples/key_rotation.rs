//! Key ring walkthrough
//!
//! Drives the provider over an in-memory key manager: initial key
//! generation, protecting a payload, revocation, and decrypting the old
//! payload through the refreshed ring.

use std::sync::Arc;

use tracing::Level;

use dataprotection::{InMemoryKeyManager, KeyManagementOptions, KeyManager, KeyRingProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let manager = Arc::new(InMemoryKeyManager::new());
    let provider = KeyRingProvider::new(
        Arc::clone(&manager) as Arc<dyn KeyManager>,
        KeyManagementOptions::default(),
    );

    // The first call finds an empty repository and generates the initial key.
    let ring = provider.get_current_key_ring().await?;
    let original_default = ring.default_key_id();
    println!("default key: {original_default}");

    let ciphertext = ring.default_encryptor()?.encrypt(b"attack at dawn", b"demo")?;
    println!("protected payload: {} bytes", ciphertext.len());

    // Revoke the default. The next ring elects a replacement but keeps the
    // revoked key around so existing payloads still decrypt.
    manager.revoke_key(original_default)?;
    let ring = provider.get_current_key_ring().await?;
    println!("default key after revocation: {}", ring.default_key_id());

    let revoked = ring.find(&original_default).expect("revoked key is retained");
    let plaintext = revoked.encryptor()?.decrypt(&ciphertext, b"demo")?;
    println!("recovered payload: {}", String::from_utf8_lossy(&plaintext));

    Ok(())
}
