//! Page transforms seen from the outside
//!
//! - Encryption depends on page number and page LSN, never only on content
//! - Compression picks zlib or stored per page and says which in the frame
//! - Encrypted tables never put row bytes in their files in the clear

use std::sync::Arc;

use ariadb::config::EngineConfig;
use ariadb::engine::Engine;
use ariadb::hooks::{
    frame_flag, CryptData, KeyProvider, PageEncryptor, Pipeline, StaticKeyProvider, TransformContext,
    FLAG_STORED, FLAG_ZLIB,
};
use ariadb::lsn::Lsn;
use ariadb::page::{format_page, set_page_lsn, PageType, FULL_HEADER_SIZE, PAGE_TRAILER_SIZE};
use ariadb::table::TableOptions;
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const BLOCK: usize = 1024;

fn keys() -> Arc<dyn KeyProvider> {
    Arc::new(StaticKeyProvider::new().with_key(1, &[0x42u8; 32]).unwrap())
}

fn encrypting(crypt: &CryptData) -> Pipeline {
    Pipeline::standard(false, Some(PageEncryptor::new(crypt.clone(), keys()).unwrap()))
}

fn full_page(body: &[u8], lsn: Lsn) -> Vec<u8> {
    let mut page = vec![0u8; BLOCK];
    set_page_lsn(&mut page, lsn);
    format_page(&mut page, PageType::Full);
    let n = body.len().min(BLOCK - FULL_HEADER_SIZE - PAGE_TRAILER_SIZE);
    page[FULL_HEADER_SIZE..FULL_HEADER_SIZE + n].copy_from_slice(&body[..n]);
    page
}

fn body_of(stored: &[u8]) -> &[u8] {
    &stored[FULL_HEADER_SIZE..stored.len() - PAGE_TRAILER_SIZE]
}

// =============================================================================
// Encryption
// =============================================================================

/// Page 42 written at LSN 1000 and again at LSN 1001 with the same
/// plaintext: the stored bodies differ, both decrypt to the same page.
#[test]
fn test_same_plaintext_different_lsn() {
    let crypt = CryptData::generate(1);
    let pipeline = encrypting(&crypt);
    let ctx = TransformContext {
        page_no: 42,
        block_size: BLOCK,
    };
    let plaintext = [0x17u8; 600];

    let first = pipeline
        .encode(&ctx, &full_page(&plaintext, Lsn::from_raw(1000)))
        .unwrap();
    let second = pipeline
        .encode(&ctx, &full_page(&plaintext, Lsn::from_raw(1001)))
        .unwrap();
    assert_ne!(body_of(&first), body_of(&second));
    assert_ne!(&body_of(&first)[..600], &plaintext[..]);

    let a = pipeline.decode(&ctx, first).unwrap();
    let b = pipeline.decode(&ctx, second).unwrap();
    assert_eq!(body_of(&a)[..600], plaintext[..]);
    assert_eq!(body_of(&b)[..600], plaintext[..]);
}

/// The same page at the same LSN in another position encrypts differently
#[test]
fn test_same_plaintext_different_page() {
    let crypt = CryptData::generate(1);
    let pipeline = encrypting(&crypt);
    let page = full_page(&[0x17u8; 600], Lsn::from_raw(1000));
    let at = |page_no| {
        pipeline
            .encode(&TransformContext { page_no, block_size: BLOCK }, &page)
            .unwrap()
    };
    assert_ne!(body_of(&at(42)), body_of(&at(43)));
}

/// Decoding under another page number fails instead of returning garbage
#[test]
fn test_block_moved_to_other_page_is_rejected() {
    let crypt = CryptData::generate(1);
    let pipeline = encrypting(&crypt);
    let stored = pipeline
        .encode(
            &TransformContext { page_no: 42, block_size: BLOCK },
            &full_page(&[1u8; 100], Lsn::from_raw(1000)),
        )
        .unwrap();
    let err = pipeline
        .decode(&TransformContext { page_no: 43, block_size: BLOCK }, stored)
        .unwrap_err();
    assert!(err.is_corruption());
}

// =============================================================================
// Compression
// =============================================================================

/// A page of repeated bytes shrinks and is flagged as zlib
#[test]
fn test_compressible_page_is_zlib() {
    let pipeline = Pipeline::standard(true, None);
    assert!(pipeline.is_variable_length());
    let ctx = TransformContext { page_no: 3, block_size: BLOCK };
    let page = full_page(&[b'a'; 900], Lsn::new(1, 0x40));

    let stored = pipeline.encode(&ctx, &page).unwrap();
    assert!(stored.len() < BLOCK / 4, "stored {} bytes", stored.len());
    assert_eq!(frame_flag(&stored, FULL_HEADER_SIZE), Some(FLAG_ZLIB));
    assert_eq!(body_of(&pipeline.decode(&ctx, stored).unwrap())[..900], [b'a'; 900][..]);
}

/// Random bytes do not shrink and are stored as they are
#[test]
fn test_incompressible_page_is_stored() {
    use rand::RngCore;

    let pipeline = Pipeline::standard(true, None);
    let ctx = TransformContext { page_no: 3, block_size: BLOCK };
    let mut noise = vec![0u8; BLOCK - FULL_HEADER_SIZE - PAGE_TRAILER_SIZE];
    rand::thread_rng().fill_bytes(&mut noise);
    let page = full_page(&noise, Lsn::new(1, 0x40));

    let stored = pipeline.encode(&ctx, &page).unwrap();
    assert_eq!(frame_flag(&stored, FULL_HEADER_SIZE), Some(FLAG_STORED));
    let decoded = pipeline.decode(&ctx, stored).unwrap();
    assert_eq!(body_of(&decoded), &noise[..]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever the body, compressed then encrypted pages come back intact
    #[test]
    fn prop_compress_and_encrypt_round_trip(
        body in proptest::collection::vec(any::<u8>(), 0..990),
        page_no in 1u32..1_000_000,
        lsn in 1u64..u64::MAX,
    ) {
        let crypt = CryptData::generate(1);
        let pipeline = Pipeline::standard(true, Some(PageEncryptor::new(crypt, keys()).unwrap()));
        let ctx = TransformContext { page_no, block_size: BLOCK };
        let page = full_page(&body, Lsn::from_raw(lsn));
        let stored = pipeline.encode(&ctx, &page).unwrap();
        let decoded = pipeline.decode(&ctx, stored).unwrap();
        prop_assert_eq!(&body_of(&decoded)[..body.len()], &body[..]);
    }
}

// =============================================================================
// Encrypted tables
// =============================================================================

const MARKER: &[u8] = b"PLAINTEXT-MARKER-0123456789";

fn write_key_file(dir: &TempDir, name: &str, key: &[u8]) -> std::path::PathBuf {
    use base64::Engine as _;

    let path = dir.path().join(name);
    let text = serde_json::json!({
        "keys": [{ "version": 1, "key": base64::engine::general_purpose::STANDARD.encode(key) }]
    });
    std::fs::write(&path, text.to_string()).unwrap();
    path
}

fn encrypted_config(data: &TempDir, key_file: std::path::PathBuf) -> EngineConfig {
    let mut config = EngineConfig::new(data.path());
    config.checkpoint_interval_secs = 0;
    config.page_cache_pages = 32;
    config.log_file_size = 1 << 20;
    config.block_size = 1024;
    config.encryption_key_file = Some(key_file);
    config
}

#[test]
fn test_encrypted_table_files_hide_rows() {
    let keys_dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let key_file = write_key_file(&keys_dir, "keys.json", &[7u8; 32]);

    {
        let engine = Engine::open(encrypted_config(&data, key_file.clone())).unwrap();
        engine
            .create_table(
                "db/secret",
                &TableOptions::block_record().with_block_size(1024).with_encryption(),
            )
            .unwrap();
        let table = engine.open_table("db/secret").unwrap();
        let trn = engine.begin().unwrap();
        for _ in 0..20 {
            table.insert(&trn, MARKER).unwrap();
        }
        engine.commit(&trn).unwrap();
        engine.close().unwrap();
    }

    for ext in ["aid", "ard"] {
        let bytes = std::fs::read(data.path().join(format!("db/secret.{}", ext))).unwrap();
        assert!(
            !bytes.windows(MARKER.len()).any(|w| w == MARKER),
            "row bytes found in the clear in .{}",
            ext
        );
    }

    let engine = Engine::open(encrypted_config(&data, key_file)).unwrap();
    let rows = engine.open_table("db/secret").unwrap().scan().unwrap();
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|(_, row)| row == MARKER));
}

/// Reading with the wrong key is reported, never returned as rows
#[test]
fn test_wrong_key_is_detected() {
    let keys_dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let right = write_key_file(&keys_dir, "right.json", &[7u8; 32]);
    let wrong = write_key_file(&keys_dir, "wrong.json", &[8u8; 32]);

    {
        let engine = Engine::open(encrypted_config(&data, right)).unwrap();
        engine
            .create_table(
                "db/secret",
                &TableOptions::block_record().with_block_size(1024).with_encryption(),
            )
            .unwrap();
        let table = engine.open_table("db/secret").unwrap();
        let trn = engine.begin().unwrap();
        table.insert(&trn, MARKER).unwrap();
        engine.commit(&trn).unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(encrypted_config(&data, wrong)).unwrap();
    let result = engine.open_table("db/secret").and_then(|t| t.scan().map_err(Into::into));
    assert!(result.is_err());
}
