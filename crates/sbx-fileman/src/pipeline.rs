//! Upload, download and delete pipelines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use pgp::composed::{SignedPublicKey, SignedSecretKey};
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use sbx_core::{SbxError, SbxResult};
use sbx_crypto::{
    aes_decrypt, aes_encrypt, chunk_id, decode_armored, derive_key, encode_armored, hmac_sha256,
    hmac_verify, is_armored, pgp_decrypt, pgp_encrypt, salt_from_ciphertext, sha256, AesMode,
    Keyring, MasterKey, ARMOR_BLOCK_TYPE, MIN_ITERATIONS, SALT_SIZE,
};
use sbx_refs::{ChunkRef, ReferenceFile};
use sbx_storage::{
    AtomicCounter, BlobBackend, ClientOptions, OpOutcome, OpResult, RequestCtx, StoreClient,
};

use crate::state::{ChunkLedger, RunState};

/// Grace window for best-effort compensating deletes after an aborted
/// upload, independent of the (already spent) run deadline.
const COMPENSATE_GRACE: Duration = Duration::from_secs(30);

/// Injected pipeline configuration. One value, passed to the constructor;
/// nothing here lives in process-wide state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
    /// PBKDF2 iteration count, at least [`MIN_ITERATIONS`].
    pub iterations: u32,
    /// Worker count for the store client pool (0 = cpu count).
    pub workers: usize,
    /// Pending-task queue capacity.
    pub queue_size: usize,
    /// Retry budget for transient backend errors.
    pub max_retries: u32,
    /// Overall deadline for one pipeline run.
    pub deadline: Duration,
    /// Backend bucket the chunks live under.
    pub bucket: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            iterations: MIN_ITERATIONS,
            workers: 0,
            queue_size: 64,
            max_retries: 3,
            deadline: Duration::from_secs(300),
            bucket: "shardbox".into(),
        }
    }
}

impl PipelineConfig {
    /// Bridge from the TOML configuration.
    pub fn from_config(cfg: &sbx_core::SbxConfig) -> Self {
        Self {
            chunk_size: cfg.pipeline.chunk_size,
            iterations: cfg.pipeline.iterations,
            workers: cfg.pipeline.workers,
            queue_size: cfg.pipeline.queue_size,
            max_retries: cfg.pipeline.max_retries,
            deadline: Duration::from_secs(cfg.pipeline.deadline_secs),
            bucket: cfg.storage.bucket.clone(),
        }
    }

    fn validate(&self) -> SbxResult<()> {
        if self.chunk_size == 0 {
            return Err(SbxError::InvalidArgument("impossible chunk size: 0".into()));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(SbxError::InvalidArgument(format!(
                "iterations must be at least {MIN_ITERATIONS}, got {}",
                self.iterations
            )));
        }
        if self.queue_size == 0 {
            return Err(SbxError::InvalidArgument(
                "queue_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Live chunk-operation counts for the manager's current run, shared with
/// the store client's counters. Clone it and poll from another task to
/// drive a progress display.
#[derive(Debug, Clone, Default)]
pub struct PipelineProgress {
    submitted: AtomicCounter,
    completed: AtomicCounter,
}

impl PipelineProgress {
    /// Chunk operations handed to the worker pool so far.
    pub fn submitted(&self) -> i64 {
        self.submitted.value()
    }

    /// Chunk operations the pool has finished, success or failure.
    pub fn completed(&self) -> i64 {
        self.completed.value()
    }

    fn reset(&self) {
        self.submitted.reset();
        self.completed.reset();
    }
}

/// The file-manager pipeline. Holds the backend handle, the bearer token
/// and the configuration; every operation runs on a store client of its
/// own so concurrent runs never share a queue.
pub struct FileManager {
    backend: Arc<dyn BlobBackend>,
    token: Option<String>,
    cfg: PipelineConfig,
    progress: PipelineProgress,
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("token", &self.token)
            .field("cfg", &self.cfg)
            .field("progress", &self.progress)
            .finish()
    }
}

impl FileManager {
    pub fn new(
        backend: Arc<dyn BlobBackend>,
        token: Option<String>,
        cfg: PipelineConfig,
    ) -> SbxResult<Self> {
        cfg.validate()?;
        Ok(Self {
            backend,
            token,
            cfg,
            progress: PipelineProgress::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Shared handle onto the current run's counters.
    pub fn progress(&self) -> PipelineProgress {
        self.progress.clone()
    }

    fn client(&self) -> SbxResult<(StoreClient, mpsc::Receiver<OpResult>)> {
        self.progress.reset();
        StoreClient::with_counters(
            self.backend.clone(),
            RequestCtx::new(self.cfg.bucket.clone(), self.token.clone()),
            ClientOptions {
                workers: self.cfg.effective_workers(),
                queue_size: self.cfg.queue_size,
                max_retries: self.cfg.max_retries,
            },
            self.progress.submitted.clone(),
            self.progress.completed.clone(),
        )
    }

    /// Shard, encrypt, tag and scatter `plaintext`, then return the
    /// armored, PGP-encrypted reference.
    ///
    /// On any failure the run aborts: chunks that already reached the
    /// backend get best-effort compensating deletes, and the error names
    /// the ids that may have leaked.
    pub async fn upload(
        &self,
        plaintext: &[u8],
        filename: &str,
        recipients: &[&SignedPublicKey],
        signer: Option<&SignedSecretKey>,
    ) -> SbxResult<Vec<u8>> {
        if filename.is_empty() {
            return Err(SbxError::InvalidArgument("filename must not be empty".into()));
        }
        if recipients.is_empty() {
            // fail before any chunk reaches the backend
            return Err(SbxError::InvalidArgument(
                "at least one recipient is required".into(),
            ));
        }
        let deadline = Instant::now() + self.cfg.deadline;

        let file_hash = sha256(plaintext);
        let master = MasterKey::generate();
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let derived = derive_key(master.as_bytes(), &salt, self.cfg.iterations)?;

        // shard + encrypt + tag, strictly in index order; the reference
        // order is fixed here, not by upload completion order
        let mut chunk_refs = Vec::new();
        let mut prepared = Vec::new();
        for (index, chunk) in plaintext.chunks(self.cfg.chunk_size).enumerate() {
            let id = chunk_id(filename, index as u32, &file_hash);
            let ciphertext = aes_encrypt(derived.as_bytes(), &salt, chunk, AesMode::Cbc)?;
            let tag = hmac_sha256(&ciphertext, derived.as_bytes());
            chunk_refs.push(ChunkRef {
                id: id.clone(),
                hmac: tag.to_vec(),
            });
            prepared.push((id, ciphertext));
        }
        let total = prepared.len();
        info!(filename, size = plaintext.len(), chunks = total, "upload: sharded");

        let mut ledger = ChunkLedger::new();
        let mut failures: Vec<String> = Vec::new();
        let mut fatal = false;

        let (client, mut outcomes) = self.client()?;

        let mut submitted = 0usize;
        let mut collected = 0usize;
        'submitting: for (id, ciphertext) in prepared {
            // keep the bounded outcome stream flowing while submitting,
            // otherwise a long file can wedge the pool
            while let Ok(OpResult { key, outcome }) = outcomes.try_recv() {
                collected += 1;
                if note_upload_outcome(&mut ledger, &mut failures, &key, outcome) {
                    fatal = true;
                    break 'submitting;
                }
            }
            ledger.push(id.clone());
            match timeout_at(deadline, client.upload(&id, ciphertext, None)).await {
                Ok(Ok(())) => {
                    ledger.mark_in_flight(&id);
                    submitted += 1;
                }
                Ok(Err(e)) => {
                    failures.push(format!("{id}: {e}"));
                    fatal = true;
                    break;
                }
                Err(_) => {
                    failures.push("deadline exceeded while submitting uploads".into());
                    fatal = true;
                    break;
                }
            }
        }

        while !fatal && collected < submitted {
            match timeout_at(deadline, outcomes.recv()).await {
                Err(_) => {
                    failures.push("deadline exceeded while awaiting upload results".into());
                    fatal = true;
                }
                Ok(None) => {
                    failures.push("outcome stream closed unexpectedly".into());
                    fatal = true;
                }
                Ok(Some(OpResult { key, outcome })) => {
                    collected += 1;
                    fatal = note_upload_outcome(&mut ledger, &mut failures, &key, outcome);
                }
            }
        }

        if failures.is_empty() && ledger.all_stored() && ledger.len() == total {
            client.close().await;
            let reference = ReferenceFile {
                filename: filename.to_string(),
                size: plaintext.len() as u64,
                chunk_size: self.cfg.chunk_size as u64,
                file_hash: file_hash.to_vec(),
                master_key: master.as_bytes().to_vec(),
                salt: salt.to_vec(),
                iterations: self.cfg.iterations,
                chunks: chunk_refs,
            };
            match reference
                .to_bytes()
                .and_then(|encoded| pgp_encrypt(&encoded, recipients, signer))
            {
                Ok(encrypted) => {
                    info!(filename, chunks = total, state = ?RunState::Committed, "upload finished");
                    return Ok(encode_armored(&encrypted, ARMOR_BLOCK_TYPE));
                }
                Err(e) => {
                    // chunks are stored but the reference cannot be
                    // produced; without it they are unreachable
                    let leaked = self.compensate(ledger.stored_ids()).await;
                    return Err(SbxError::UploadFailed {
                        reason: format!("reference encryption failed: {e}"),
                        leaked,
                    });
                }
            }
        }

        // abort: let in-flight and queued tasks finish, account for them,
        // then issue compensating deletes for everything that stuck
        for late in shutdown(client, outcomes).await {
            match late.outcome {
                Ok(_) => ledger.mark_stored(&late.key),
                Err(_) => ledger.mark_failed(&late.key),
            }
        }
        let stored = ledger.stored_ids();
        warn!(
            filename,
            stored = stored.len(),
            state = ?RunState::Aborted,
            "upload aborted, issuing compensating deletes"
        );
        let leaked = self.compensate(stored).await;

        Err(SbxError::UploadFailed {
            reason: failures.join("; "),
            leaked,
        })
    }

    /// Best-effort deletes after an aborted upload. Returns the ids that
    /// could not be confirmed deleted — a crashed client may still leak
    /// chunks; an external sweeper has to reap those.
    async fn compensate(&self, ids: Vec<String>) -> Vec<String> {
        if ids.is_empty() {
            return Vec::new();
        }
        let (client, mut outcomes) = match self.client() {
            Ok(pair) => pair,
            Err(_) => return ids,
        };
        let grace = Instant::now() + COMPENSATE_GRACE;

        // everything counts as leaked until its delete is confirmed, so
        // ids whose delete never got submitted stay on the list
        let mut leaked: HashSet<String> = ids.iter().cloned().collect();

        let mut submitted = 0usize;
        let mut received = 0usize;
        for id in &ids {
            while let Ok(result) = outcomes.try_recv() {
                received += 1;
                if result.outcome.is_ok() {
                    leaked.remove(&result.key);
                }
            }
            match timeout_at(grace, client.delete(id)).await {
                Ok(Ok(())) => submitted += 1,
                _ => break,
            }
        }

        while received < submitted {
            match timeout_at(grace, outcomes.recv()).await {
                Ok(Some(result)) => {
                    received += 1;
                    if result.outcome.is_ok() {
                        leaked.remove(&result.key);
                    }
                }
                _ => break,
            }
        }

        for late in shutdown(client, outcomes).await {
            if late.outcome.is_ok() {
                leaked.remove(&late.key);
            }
        }

        let mut leaked: Vec<String> = leaked.into_iter().collect();
        leaked.sort();
        leaked
    }

    /// Decrypt the reference, gather every chunk, verify all tags, then
    /// decrypt and reassemble. Verification happens strictly before any
    /// plaintext is produced; any mismatch aborts with `IntegrityFailure`.
    pub async fn download(&self, reference: &[u8], keyring: &Keyring) -> SbxResult<Vec<u8>> {
        let deadline = Instant::now() + self.cfg.deadline;
        let reference = self.open_reference(reference, keyring)?;
        let derived = derive_key(&reference.master_key, &reference.salt, reference.iterations)?;
        let total = reference.chunks.len();
        debug!(filename = %reference.filename, chunks = total, "download: reference opened");

        if total == 0 {
            // a zero-byte file stores nothing; only the hash check remains
            if sha256(&[])[..] != reference.file_hash[..] {
                return Err(SbxError::IntegrityFailure(
                    "file hash mismatch on empty file".into(),
                ));
            }
            return Ok(Vec::new());
        }

        let index_by_id: HashMap<&str, usize> = reference
            .chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| (chunk.id.as_str(), index))
            .collect();

        let (client, mut outcomes) = self.client()?;
        let mut first_err: Option<SbxError> = None;

        // collected out of order into index slots
        let mut blobs: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut collected = 0usize;
        let mut submitted = 0usize;

        'submitting: for chunk in &reference.chunks {
            while let Ok(result) = outcomes.try_recv() {
                collected += 1;
                if let Some(e) = note_download_outcome(&index_by_id, &mut blobs, result) {
                    first_err = Some(e);
                    break 'submitting;
                }
            }
            match timeout_at(deadline, client.download(&chunk.id)).await {
                Ok(Ok(())) => submitted += 1,
                Ok(Err(e)) => {
                    first_err = Some(e);
                    break;
                }
                Err(_) => {
                    first_err = Some(SbxError::Transient(
                        "deadline exceeded while submitting downloads".into(),
                    ));
                    break;
                }
            }
        }

        while first_err.is_none() && collected < submitted {
            match timeout_at(deadline, outcomes.recv()).await {
                Err(_) => {
                    first_err = Some(SbxError::Transient(
                        "deadline exceeded while downloading chunks".into(),
                    ));
                }
                Ok(None) => {
                    first_err = Some(SbxError::Permanent(
                        "outcome stream closed unexpectedly".into(),
                    ));
                }
                Ok(Some(result)) => {
                    collected += 1;
                    first_err = note_download_outcome(&index_by_id, &mut blobs, result);
                }
            }
        }

        shutdown(client, outcomes).await;
        if let Some(e) = first_err {
            return Err(e);
        }

        // verify every tag before decrypting anything
        for (index, chunk) in reference.chunks.iter().enumerate() {
            let ciphertext = blobs[index]
                .as_ref()
                .ok_or_else(|| SbxError::Permanent(format!("chunk {index} never arrived")))?;
            let embedded_salt = salt_from_ciphertext(ciphertext)?;
            if embedded_salt[..] != reference.salt[..] {
                return Err(SbxError::IntegrityFailure(format!(
                    "chunk {index}: embedded salt does not match the reference"
                )));
            }
            if !hmac_verify(ciphertext, &chunk.hmac, derived.as_bytes()) {
                return Err(SbxError::IntegrityFailure(format!(
                    "chunk {index}: hmac mismatch"
                )));
            }
        }

        let mut plaintext = Vec::with_capacity(reference.size as usize);
        for blob in blobs.iter().flatten() {
            plaintext.extend(aes_decrypt(derived.as_bytes(), blob, AesMode::Cbc)?);
        }

        if plaintext.len() as u64 != reference.size {
            return Err(SbxError::IntegrityFailure(format!(
                "reassembled {} bytes, reference says {}",
                plaintext.len(),
                reference.size
            )));
        }
        if sha256(&plaintext)[..] != reference.file_hash[..] {
            return Err(SbxError::IntegrityFailure("file hash mismatch".into()));
        }

        info!(filename = %reference.filename, size = plaintext.len(), "download finished");
        Ok(plaintext)
    }

    /// Remove every chunk the reference names. Missing chunks count as
    /// deleted; any chunk that cannot be removed is reported by id so the
    /// caller can retry.
    pub async fn delete(&self, reference: &[u8], keyring: &Keyring) -> SbxResult<()> {
        let deadline = Instant::now() + self.cfg.deadline;
        let reference = self.open_reference(reference, keyring)?;
        let total = reference.chunks.len();
        info!(filename = %reference.filename, chunks = total, "delete: reference opened");

        if total == 0 {
            return Ok(());
        }

        let (client, mut outcomes) = self.client()?;
        // ids stay pending until their delete is confirmed; whatever is
        // left over at the end survives
        let mut pending: HashSet<String> =
            reference.chunks.iter().map(|c| c.id.clone()).collect();
        let mut surviving: Vec<String> = Vec::new();

        let mut submitted = 0usize;
        let mut collected = 0usize;
        for chunk in &reference.chunks {
            while let Ok(OpResult { key, outcome }) = outcomes.try_recv() {
                collected += 1;
                pending.remove(&key);
                if let Err(e) = outcome {
                    warn!(key = %key, kind = e.kind(), "chunk delete failed: {e}");
                    surviving.push(key);
                }
            }
            match timeout_at(deadline, client.delete(&chunk.id)).await {
                Ok(Ok(())) => submitted += 1,
                _ => break,
            }
        }

        while collected < submitted {
            match timeout_at(deadline, outcomes.recv()).await {
                Ok(Some(OpResult { key, outcome })) => {
                    collected += 1;
                    pending.remove(&key);
                    if let Err(e) = outcome {
                        warn!(key = %key, kind = e.kind(), "chunk delete failed: {e}");
                        surviving.push(key);
                    }
                }
                _ => break,
            }
        }

        for late in shutdown(client, outcomes).await {
            if late.outcome.is_ok() {
                pending.remove(&late.key);
            }
        }

        surviving.extend(pending);
        surviving.sort();
        surviving.dedup();

        if surviving.is_empty() {
            info!(filename = %reference.filename, "delete finished");
            Ok(())
        } else {
            Err(SbxError::PartialDelete { surviving })
        }
    }

    /// Unwrap an (optionally armored) PGP-encrypted reference and validate
    /// its structure.
    fn open_reference(&self, data: &[u8], keyring: &Keyring) -> SbxResult<ReferenceFile> {
        let raw = if is_armored(data) {
            decode_armored(data)?
        } else {
            data.to_vec()
        };
        let plain = pgp_decrypt(&raw, keyring)?;
        ReferenceFile::from_bytes(&plain)
    }
}

/// Record one upload outcome; returns true when the failure is fatal for
/// the whole run (permanent backend refusal or an occupied key).
fn note_upload_outcome(
    ledger: &mut ChunkLedger,
    failures: &mut Vec<String>,
    key: &str,
    outcome: SbxResult<OpOutcome>,
) -> bool {
    match outcome {
        Ok(OpOutcome::Uploaded { .. }) => {
            ledger.mark_stored(key);
            false
        }
        Ok(_) => false,
        Err(e) => {
            ledger.mark_failed(key);
            warn!(key = %key, kind = e.kind(), "chunk upload failed: {e}");
            let fatal = matches!(e, SbxError::Permanent(_) | SbxError::AlreadyExists(_));
            failures.push(format!("{key}: {e}"));
            fatal
        }
    }
}

/// Record one download outcome; returns the error that aborts the run, if
/// any. Download is stricter than upload: every chunk is required, so the
/// first failure is final.
fn note_download_outcome(
    index_by_id: &HashMap<&str, usize>,
    blobs: &mut [Option<Vec<u8>>],
    result: OpResult,
) -> Option<SbxError> {
    match result.outcome {
        Ok(OpOutcome::Downloaded { key, data }) => {
            if let Some(&index) = index_by_id.get(key.as_str()) {
                blobs[index] = Some(data);
            }
            None
        }
        Ok(_) => None,
        Err(e) => {
            warn!(key = %result.key, kind = e.kind(), "chunk download failed: {e}");
            Some(e)
        }
    }
}

/// Refuse new submissions, drain every outstanding outcome and release the
/// client. In-flight tasks run to completion; their late outcomes are
/// returned so callers can account for them.
async fn shutdown(client: StoreClient, mut outcomes: mpsc::Receiver<OpResult>) -> Vec<OpResult> {
    client.abort();
    let drain = tokio::spawn(async move {
        let mut late = Vec::new();
        while let Some(result) = outcomes.recv().await {
            late.push(result);
        }
        late
    });
    client.close().await;
    drain.await.unwrap_or_default()
}
