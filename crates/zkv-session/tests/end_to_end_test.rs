//! Full path: password -> master key -> unwrap DEK -> streaming decrypt ->
//! render, plus vault-level failure modes over an in-memory store.

use std::io::Cursor;

use secrecy::SecretString;
use zkv_core::config::ZkvConfig;
use zkv_core::{AccessLevel, ContentClass, DocumentId, ZkvError};
use zkv_crypto::{
    derive_master_key, encrypt_stream, seal_default, unwrap_dek, verify, wrap_dek, AeadAlgorithm,
    DataKey, DecryptSession, KdfAlgorithm, KdfParameters, ReaderSource, SecretSlot,
    CANARY_PLAINTEXT,
};
use zkv_render::{consume, InteractionKind, InteractionVerdict, RenderOptions, SessionMarker};
use zkv_session::{DocumentStore, Vault};

const DEK: [u8; 32] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
    0xff, 0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2,
    0xe1, 0xf0,
];

fn printable(len: usize) -> Vec<u8> {
    (0..len).map(|i| b' ' + (i % 94) as u8).collect()
}

/// Cheapest parameters that still pass policy.
fn fast_config() -> ZkvConfig {
    let mut config = ZkvConfig::default();
    config.storage.backend = "memory".into();
    config.kdf.algorithm = "pbkdf2-sha256".into();
    config.kdf.pbkdf2_iterations = 100_000;
    config.stream.chunk_size = 64;
    config
}

fn vault() -> Vault {
    Vault::new(DocumentStore::memory("vault").unwrap(), fast_config()).unwrap()
}

fn password(s: &str) -> SecretString {
    SecretString::from(s)
}

#[tokio::test]
async fn test_password_to_rendered_text() {
    let params = KdfParameters::new(
        KdfAlgorithm::Pbkdf2Sha256 { iterations: 500_000 },
        b"fixed-salt-16byt".to_vec(),
    );
    let master = derive_master_key(&password("correct-horse"), &params).unwrap();
    let canary = seal_default(&master, AeadAlgorithm::default()).unwrap();
    assert!(verify(&master, &canary, CANARY_PLAINTEXT));

    let wrapped = wrap_dek(&master, &DataKey::from_bytes(DEK), AeadAlgorithm::default()).unwrap();
    let dek = unwrap_dek(&master, &wrapped).unwrap();
    assert_eq!(dek, DataKey::from_bytes(DEK));

    let plaintext = printable(90);
    let ciphertext = encrypt_stream(&dek, AeadAlgorithm::default(), 30, &plaintext).unwrap();

    let slot = SecretSlot::new("dek", dek);
    let mut session = DecryptSession::open(ReaderSource::new(Cursor::new(ciphertext)), slot, 1024)
        .await
        .unwrap();
    assert_eq!(session.header().chunk_count(), 3);

    let handle = consume(
        &mut session,
        "text/plain",
        &RenderOptions::default(),
        SessionMarker::from_session_id(b"e2e"),
    )
    .await
    .unwrap();

    assert_eq!(handle.with_bytes(|b| b.to_vec()).unwrap(), plaintext);
    assert_ne!(handle.export().unwrap(), plaintext);
    assert_eq!(
        handle.handle_interaction(InteractionKind::Copy),
        InteractionVerdict::Block
    );
}

#[tokio::test]
async fn test_vault_roundtrip() {
    let vault = vault();
    let session = vault.initialize(&password("correct-horse")).await.unwrap();
    let id = DocumentId::new("notes").unwrap();
    let text = printable(200);
    vault
        .seal_document(&session, id.clone(), "text/plain", &text)
        .await
        .unwrap();
    vault.lock_vault(session);

    let session = vault.unlock_vault(&password("correct-horse")).await.unwrap();
    let preview = vault
        .open_preview(&session, &id, AccessLevel::ViewOnly)
        .await
        .unwrap();
    assert_eq!(preview.document().content_class, Some(ContentClass::Structured));
    assert_eq!(preview.with_bytes(|b| b.to_vec()).unwrap(), text);
    assert_ne!(preview.export().unwrap(), text);

    vault.close_preview(preview);
    assert_eq!(vault.guard().active_count(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let vault = vault();
    drop(vault.initialize(&password("correct-horse")).await.unwrap());

    let err = vault
        .unlock_vault(&password("battery-staple"))
        .await
        .unwrap_err();
    assert!(matches!(err, ZkvError::Authentication));
    assert_eq!(vault.guard().active_count(), 0);
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() {
    let vault = vault();
    drop(vault.initialize(&password("first")).await.unwrap());
    assert!(matches!(
        vault.initialize(&password("second")).await,
        Err(ZkvError::Config(_))
    ));
}

#[tokio::test]
async fn test_tampered_ciphertext_surfaces_no_plaintext() {
    let store = DocumentStore::memory("vault").unwrap();
    let vault = Vault::new(store.clone(), fast_config()).unwrap();
    let session = vault.initialize(&password("pw")).await.unwrap();
    let id = DocumentId::new("ledger").unwrap();
    vault
        .seal_document(&session, id.clone(), "text/csv", &printable(300))
        .await
        .unwrap();

    // flip one byte inside the third chunk
    let metadata = store.load_metadata(&id).await.unwrap();
    let mut source = store.open_blob(&metadata.ciphertext_locator).await.unwrap();
    let mut blob = vec![0u8; source.len() as usize];
    let mut filled = 0;
    while filled < blob.len() {
        filled += zkv_crypto::CiphertextSource::read(&mut source, &mut blob[filled..])
            .await
            .unwrap();
    }
    blob[44 + 2 * 80 + 5] ^= 0x01;
    store.put_blob(&id, blob).await.unwrap();

    let err = vault
        .open_preview(&session, &id, AccessLevel::FullAccess)
        .await
        .unwrap_err();
    assert!(matches!(err, ZkvError::Authentication));
    assert_eq!(vault.guard().active_count(), 1, "only the vault session remains");
}

#[tokio::test]
async fn test_unsupported_type_falls_back_to_metadata() {
    let vault = vault();
    let session = vault.initialize(&password("pw")).await.unwrap();
    let id = DocumentId::new("archive").unwrap();
    vault
        .seal_document(&session, id.clone(), "application/zip", b"PK\x03\x04")
        .await
        .unwrap();

    let err = vault
        .open_preview(&session, &id, AccessLevel::ViewOnly)
        .await
        .unwrap_err();
    let fallback = err.fallback().expect("render errors carry a fallback");
    assert_eq!(fallback.mime, "application/zip");
    assert_eq!(fallback.plaintext_len, 4);
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_malformed_content_falls_back_to_metadata() {
    let vault = vault();
    let session = vault.initialize(&password("pw")).await.unwrap();
    let id = DocumentId::new("fake-png").unwrap();
    vault
        .seal_document(&session, id.clone(), "image/png", b"not really a png at all")
        .await
        .unwrap();

    let err = vault
        .open_preview(&session, &id, AccessLevel::ViewOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, ZkvError::Render { .. }));
    assert_eq!(err.fallback().unwrap().id, id);
}

#[tokio::test]
async fn test_change_password_rewraps_documents() {
    let vault = vault();
    let session = vault.initialize(&password("old-pw")).await.unwrap();
    let id = DocumentId::new("contract").unwrap();
    let text = printable(150);
    vault
        .seal_document(&session, id.clone(), "text/markdown", &text)
        .await
        .unwrap();
    let before = vault.store().load_metadata(&id).await.unwrap();

    assert!(matches!(
        vault
            .change_password(&session, &password("not-it"), &password("new-pw"))
            .await,
        Err(ZkvError::Authentication)
    ));

    vault
        .change_password(&session, &password("old-pw"), &password("new-pw"))
        .await
        .unwrap();
    let after = vault.store().load_metadata(&id).await.unwrap();
    assert_ne!(before.wrapped_dek.nonce, after.wrapped_dek.nonce);

    // the live session keeps working with the replaced key
    let preview = vault
        .open_preview(&session, &id, AccessLevel::ViewOnly)
        .await
        .unwrap();
    assert_eq!(preview.with_bytes(|b| b.to_vec()).unwrap(), text);
    drop(preview);
    vault.lock_vault(session);

    assert!(matches!(
        vault.unlock_vault(&password("old-pw")).await,
        Err(ZkvError::Authentication)
    ));
    let session = vault.unlock_vault(&password("new-pw")).await.unwrap();
    let preview = vault
        .open_preview(&session, &id, AccessLevel::ViewOnly)
        .await
        .unwrap();
    assert_eq!(preview.with_bytes(|b| b.to_vec()).unwrap(), text);
}

#[tokio::test]
async fn test_list_documents() {
    let vault = vault();
    let session = vault.initialize(&password("pw")).await.unwrap();
    for (name, mime) in [("b-photo", "image/jpeg"), ("a-memo", "text/plain")] {
        vault
            .seal_document(&session, DocumentId::new(name).unwrap(), mime, b"x")
            .await
            .unwrap();
    }

    let listed = vault.list_documents().await.unwrap();
    let names: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(names, ["a-memo", "b-photo"]);
    assert_eq!(listed[1].content_class, Some(ContentClass::Raster));
}

#[tokio::test]
async fn test_raster_preview_pages() {
    let mut config = fast_config();
    config.render.page_bytes = 100;
    let vault = Vault::new(DocumentStore::memory("vault").unwrap(), config).unwrap();
    let session = vault.initialize(&password("pw")).await.unwrap();

    let mut pdf = b"%PDF-1.7\n".to_vec();
    pdf.resize(230, b'.');
    let id = DocumentId::new("scan").unwrap();
    vault
        .seal_document(&session, id.clone(), "application/pdf", &pdf)
        .await
        .unwrap();

    let preview = vault
        .open_preview(&session, &id, AccessLevel::FullAccess)
        .await
        .unwrap();
    assert_eq!(preview.page_count().unwrap(), 3);
    assert_eq!(preview.with_page(2, |p| p.len()).unwrap(), 30);
}
