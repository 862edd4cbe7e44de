//! End-to-end pipeline scenarios against in-process backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use pgp::composed::{KeyType, SignedPublicKey, SignedSecretKey};

use sbx_core::{SbxError, SbxResult};
use sbx_crypto::{chunk_id, generate_keypair, pgp_decrypt, sha256, Keyring};
use sbx_fileman::{FileManager, PipelineConfig};
use sbx_refs::ReferenceFile;
use sbx_storage::{BlobBackend, OperatorBackend, RequestCtx};

const BUCKET: &str = "test-bucket";

// RSA generation is expensive; one shared keypair for the whole binary.
fn owner_keys() -> &'static (SignedSecretKey, SignedPublicKey) {
    static KEYS: OnceLock<(SignedSecretKey, SignedPublicKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        generate_keypair(KeyType::Rsa(2048), "Owner", "", "owner@example.com")
            .expect("keypair generation")
    })
}

fn owner_keyring() -> Keyring {
    let (secret, _) = owner_keys();
    Keyring::from_keys(vec![secret.clone()], vec![], None)
}

fn config(chunk_size: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        workers: 4,
        queue_size: 8,
        deadline: Duration::from_secs(30),
        bucket: BUCKET.into(),
        ..PipelineConfig::default()
    }
}

fn manager(backend: Arc<dyn BlobBackend>, chunk_size: usize) -> FileManager {
    FileManager::new(backend, Some("bearer-token".into()), config(chunk_size)).unwrap()
}

fn ctx() -> RequestCtx {
    RequestCtx::new(BUCKET, Some("bearer-token".into()))
}

/// Decrypt an armored reference back into its structured form.
fn open_reference(armored: &[u8]) -> ReferenceFile {
    let raw = sbx_crypto::decode_armored(armored).expect("armor");
    let plain = pgp_decrypt(&raw, &owner_keyring()).expect("pgp");
    ReferenceFile::from_bytes(&plain).expect("reference")
}

#[tokio::test]
async fn small_file_has_expected_chunk_layout() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend.clone(), 4);
    let (_, public) = owner_keys();

    let plaintext = b"hello world";
    let armored = fm
        .upload(plaintext, "file", &[public], None)
        .await
        .expect("upload");

    let reference = open_reference(&armored);
    assert_eq!(reference.filename, "file");
    assert_eq!(reference.size, 11);
    assert_eq!(reference.chunk_size, 4);
    assert_eq!(reference.chunks.len(), 3);
    assert_eq!(reference.file_hash, sha256(plaintext).to_vec());

    // ids are content-derived: sha256("file" || index_be || file_hash)
    let file_hash = sha256(plaintext);
    for (index, chunk) in reference.chunks.iter().enumerate() {
        assert_eq!(chunk.id, chunk_id("file", index as u32, &file_hash));
        // and each one is present at the backend under that key
        let stored = backend.get(&ctx(), &chunk.id).await.expect("stored chunk");
        assert!(stored.len() >= 16 + 8 + 16);
    }

    // the progress handle reflects the finished run: one operation per chunk
    let progress = fm.progress();
    assert_eq!(progress.submitted(), 3);
    assert_eq!(progress.completed(), 3);

    let restored = fm.download(&armored, &owner_keyring()).await.expect("download");
    assert_eq!(restored, plaintext);
}

#[tokio::test]
async fn megabyte_of_random_bytes_roundtrips() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend, 65536);
    let (_, public) = owner_keys();

    let plaintext: Vec<u8> = (0..1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let armored = fm
        .upload(&plaintext, "big.bin", &[public], None)
        .await
        .expect("upload");

    assert_eq!(open_reference(&armored).chunks.len(), 16);

    let restored = fm.download(&armored, &owner_keyring()).await.expect("download");
    assert_eq!(restored, plaintext);
}

#[tokio::test]
async fn corrupted_chunk_fails_with_integrity_failure() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend.clone(), 65536);
    let (_, public) = owner_keys();

    let plaintext: Vec<u8> = (0..1024 * 1024).map(|i| (i * 17 % 239) as u8).collect();
    let armored = fm
        .upload(&plaintext, "big.bin", &[public], None)
        .await
        .expect("upload");

    // flip the last byte of one stored chunk
    let reference = open_reference(&armored);
    let victim = &reference.chunks[7].id;
    let mut blob = backend.get(&ctx(), victim).await.unwrap();
    *blob.last_mut().unwrap() ^= 0x01;
    backend.remove(&ctx(), victim).await.unwrap();
    backend.put(&ctx(), victim, blob, None).await.unwrap();

    let err = fm.download(&armored, &owner_keyring()).await.unwrap_err();
    assert_eq!(err.kind(), "IntegrityFailure");
}

#[tokio::test]
async fn delete_removes_every_chunk_and_is_idempotent() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend.clone(), 4);
    let (_, public) = owner_keys();

    let armored = fm
        .upload(b"hello world", "file", &[public], None)
        .await
        .expect("upload");
    let reference = open_reference(&armored);

    fm.delete(&armored, &owner_keyring()).await.expect("delete");
    for chunk in &reference.chunks {
        let err = backend.get(&ctx(), &chunk.id).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    // deleting an already-deleted reference succeeds
    fm.delete(&armored, &owner_keyring()).await.expect("second delete");
}

#[tokio::test]
async fn empty_file_roundtrips_without_chunks() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend, 4096);
    let (_, public) = owner_keys();

    let armored = fm.upload(b"", "void", &[public], None).await.expect("upload");
    let reference = open_reference(&armored);
    assert_eq!(reference.size, 0);
    assert!(reference.chunks.is_empty());

    let restored = fm.download(&armored, &owner_keyring()).await.expect("download");
    assert!(restored.is_empty());

    fm.delete(&armored, &owner_keyring()).await.expect("delete");
}

#[tokio::test]
async fn signed_reference_roundtrips() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend, 16);
    let (secret, public) = owner_keys();

    let armored = fm
        .upload(b"signed upload payload", "signed.txt", &[public], Some(secret))
        .await
        .expect("upload");
    let restored = fm.download(&armored, &owner_keyring()).await.expect("download");
    assert_eq!(restored, b"signed upload payload");
}

#[tokio::test]
async fn wrong_keyring_cannot_open_the_reference() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend, 16);
    let (_, public) = owner_keys();

    let armored = fm
        .upload(b"for the owner only", "secret.txt", &[public], None)
        .await
        .expect("upload");

    let (stranger_secret, _) =
        generate_keypair(KeyType::Rsa(2048), "Stranger", "", "stranger@example.com").unwrap();
    let stranger_ring = Keyring::from_keys(vec![stranger_secret], vec![], None);

    assert!(fm.download(&armored, &stranger_ring).await.is_err());
}

#[tokio::test]
async fn tampered_reference_armor_is_rejected() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend, 16);
    let (_, public) = owner_keys();

    let armored = fm
        .upload(b"tamper with me", "t.txt", &[public], None)
        .await
        .expect("upload");

    let text = String::from_utf8(armored).unwrap();
    let idx = text.find("\n\n").unwrap() + 2;
    let mut bytes = text.into_bytes();
    bytes[idx] = if bytes[idx] == b'A' { b'B' } else { b'A' };

    let err = fm.download(&bytes, &owner_keyring()).await.unwrap_err();
    assert!(matches!(err.kind(), "IntegrityFailure" | "MalformedCiphertext" | "Pgp"));
}

#[tokio::test]
async fn local_fs_backend_behaves_like_the_remote_one() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(OperatorBackend::local_fs(dir.path()).unwrap());
    let fm = manager(backend, 32);
    let (_, public) = owner_keys();

    let plaintext = b"the same pipeline against a directory of files";
    let armored = fm
        .upload(plaintext, "local.txt", &[public], None)
        .await
        .expect("upload");

    let restored = fm.download(&armored, &owner_keyring()).await.expect("download");
    assert_eq!(restored, plaintext);

    fm.delete(&armored, &owner_keyring()).await.expect("delete");
    let err = fm.download(&armored, &owner_keyring()).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

/// Backend wrapper that permanently refuses writes (or deletes) for a
/// chosen set of keys.
struct ScriptedBackend {
    inner: OperatorBackend,
    refuse_put: Vec<String>,
    refuse_remove: Vec<String>,
}

#[async_trait]
impl BlobBackend for ScriptedBackend {
    async fn put(
        &self,
        ctx: &RequestCtx,
        key: &str,
        data: Vec<u8>,
        meta: Option<HashMap<String, String>>,
    ) -> SbxResult<()> {
        if self.refuse_put.iter().any(|k| k == key) {
            return Err(SbxError::Permanent(format!("{key}: write refused")));
        }
        self.inner.put(ctx, key, data, meta).await
    }

    async fn get(&self, ctx: &RequestCtx, key: &str) -> SbxResult<Vec<u8>> {
        self.inner.get(ctx, key).await
    }

    async fn remove(&self, ctx: &RequestCtx, key: &str) -> SbxResult<()> {
        if self.refuse_remove.iter().any(|k| k == key) {
            return Err(SbxError::Permanent(format!("{key}: delete refused")));
        }
        self.inner.remove(ctx, key).await
    }
}

#[tokio::test]
async fn failed_upload_compensates_stored_chunks() {
    let plaintext = b"hello world";
    let file_hash = sha256(plaintext);
    // chunk 1 of 3 will be refused by the backend
    let victim = chunk_id("file", 1, &file_hash);
    let others = [chunk_id("file", 0, &file_hash), chunk_id("file", 2, &file_hash)];

    let backend = Arc::new(ScriptedBackend {
        inner: OperatorBackend::memory().unwrap(),
        refuse_put: vec![victim],
        refuse_remove: vec![],
    });
    let fm = manager(backend.clone(), 4);
    let (_, public) = owner_keys();

    let err = fm
        .upload(plaintext, "file", &[public], None)
        .await
        .unwrap_err();

    match err {
        SbxError::UploadFailed { leaked, .. } => {
            assert!(leaked.is_empty(), "compensating deletes should have run: {leaked:?}");
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }

    // nothing may be left behind
    for id in &others {
        let err = backend.get(&ctx(), id).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }
}

#[tokio::test]
async fn stuck_chunk_surfaces_as_partial_delete() {
    let plaintext = b"hello world";
    let file_hash = sha256(plaintext);
    let victim = chunk_id("file", 2, &file_hash);

    let backend = Arc::new(ScriptedBackend {
        inner: OperatorBackend::memory().unwrap(),
        refuse_put: vec![],
        refuse_remove: vec![victim.clone()],
    });
    let fm = manager(backend, 4);
    let (_, public) = owner_keys();

    let armored = fm
        .upload(plaintext, "file", &[public], None)
        .await
        .expect("upload");

    let err = fm.delete(&armored, &owner_keyring()).await.unwrap_err();
    match err {
        SbxError::PartialDelete { surviving } => {
            assert_eq!(surviving, vec![victim]);
        }
        other => panic!("expected PartialDelete, got {other:?}"),
    }
}

#[tokio::test]
async fn impossible_chunk_size_is_rejected_up_front() {
    let backend: Arc<dyn BlobBackend> = Arc::new(OperatorBackend::memory().unwrap());
    let err = FileManager::new(backend, None, config(0)).unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
}

#[tokio::test]
async fn upload_without_recipients_is_rejected() {
    let backend = Arc::new(OperatorBackend::memory().unwrap());
    let fm = manager(backend.clone(), 4);

    let err = fm.upload(b"data", "f", &[], None).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
    // and nothing was written
    let file_hash = sha256(b"data");
    let err = backend.get(&ctx(), &chunk_id("f", 0, &file_hash)).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}
