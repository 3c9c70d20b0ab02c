//! In-memory host and scripted asset source shared by the unit tests

use crate::host::{
    ConflictChoice, ConflictPrompt, FamilyLoadOptions, Host, HostDocument, HostError,
    HostSession, LoadOutcome, LoadRequest, OverwriteDecision,
};
use crate::source::{AssetSource, AssetStream, FetchError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

/// Write a small family file and return its path
pub(crate) fn family_file(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, format!("family:{}", file_name)).unwrap();
    path
}

/// Collects `(success, message)` completions
#[derive(Clone, Default)]
pub(crate) struct Outcomes(Arc<Mutex<Vec<(bool, String)>>>);

impl Outcomes {
    pub(crate) fn callback(&self) -> impl FnOnce(bool, String) + Send + 'static {
        let inner = self.0.clone();
        move |success, message| inner.lock().unwrap().push((success, message))
    }

    pub(crate) fn take(&self) -> Vec<(bool, String)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Collects progress labels
#[derive(Clone, Default)]
pub(crate) struct Progress(Arc<Mutex<Vec<String>>>);

impl Progress {
    pub(crate) fn callback(&self) -> impl Fn(crate::ProgressStage) + Send + Sync + 'static {
        let inner = self.0.clone();
        move |stage| inner.lock().unwrap().push(stage.to_string())
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub(crate) struct ScriptedPrompt {
    pub choice: ConflictChoice,
    pub asked: usize,
}

impl Default for ScriptedPrompt {
    fn default() -> Self {
        Self {
            choice: ConflictChoice::Replace,
            asked: 0,
        }
    }
}

impl ConflictPrompt for ScriptedPrompt {
    fn choose(&mut self, _family_name: &str, _family_in_use: bool) -> ConflictChoice {
        self.asked += 1;
        self.choice
    }
}

/// Document whose families are byte blobs keyed by name
#[derive(Default)]
pub(crate) struct MemoryDocument {
    pub families: HashMap<String, Vec<u8>>,
    staged: Option<HashMap<String, Vec<u8>>>,
    pub events: Vec<String>,
    pub threads: Vec<ThreadId>,
    pub fail_load: Option<String>,
    pub fail_commit: bool,
    pub panic_on_load: bool,
}

impl HostDocument for MemoryDocument {
    fn begin_transaction(&mut self, _name: &str) -> Result<(), HostError> {
        if self.staged.is_some() {
            return Err(HostError::Transaction("already open".to_string()));
        }
        self.staged = Some(HashMap::new());
        self.events.push("begin".to_string());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), HostError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| HostError::Transaction("not open".to_string()))?;
        if self.fail_commit {
            self.events.push("commit failed".to_string());
            return Err(HostError::Transaction("document is read-only".to_string()));
        }
        self.families.extend(staged);
        self.events.push("commit".to_string());
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), HostError> {
        self.staged = None;
        self.events.push("rollback".to_string());
        Ok(())
    }

    fn load_family(
        &mut self,
        request: &LoadRequest<'_>,
        options: &mut dyn FamilyLoadOptions,
    ) -> Result<LoadOutcome, HostError> {
        self.events.push("load".to_string());
        self.threads.push(std::thread::current().id());

        if self.panic_on_load {
            panic!("host crashed");
        }
        if let Some(reason) = &self.fail_load {
            return Err(HostError::Load(reason.clone()));
        }

        let data = std::fs::read(request.path)?;
        let name = if request.family_name.is_empty() {
            request
                .path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            request.family_name.to_string()
        };

        let exists = self.families.contains_key(&name);
        if exists && options.on_family_found(&name, false) == OverwriteDecision::KeepExisting {
            return Ok(LoadOutcome::Declined);
        }

        self.staged
            .as_mut()
            .ok_or_else(|| HostError::Transaction("not open".to_string()))?
            .insert(name.clone(), data);

        Ok(if exists {
            LoadOutcome::Updated { family_name: name }
        } else {
            LoadOutcome::Loaded { family_name: name }
        })
    }
}

#[derive(Default)]
pub(crate) struct MemoryHost {
    pub document: Option<MemoryDocument>,
    pub prompt: ScriptedPrompt,
}

impl MemoryHost {
    pub(crate) fn with_document() -> Self {
        Self {
            document: Some(MemoryDocument::default()),
            prompt: ScriptedPrompt::default(),
        }
    }
}

impl Host for MemoryHost {
    type Document = MemoryDocument;

    fn session(&mut self) -> Option<HostSession<'_, MemoryDocument>> {
        let document = self.document.as_mut()?;
        Some(HostSession {
            document,
            prompt: &mut self.prompt,
        })
    }
}

/// Asset source serving a fixed payload, or failing on demand
#[derive(Default)]
pub(crate) struct ScriptedSource {
    payload: Vec<u8>,
    failure: Option<String>,
    panic: Option<String>,
    break_mid_stream: bool,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn serving(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn panicking(reason: &str) -> Self {
        Self {
            panic: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Serve part of the payload, then fail
    pub(crate) fn breaking(payload: Vec<u8>) -> Self {
        Self {
            payload,
            break_mid_stream: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for ScriptedSource {
    async fn fetch(&self, _url: &str) -> Result<AssetStream, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.panic {
            panic!("{}", reason);
        }
        if let Some(reason) = &self.failure {
            return Err(reason.clone().into());
        }

        let mut chunks: Vec<Result<Bytes, FetchError>> = self
            .payload
            .chunks(256)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if self.break_mid_stream {
            chunks.push(Err("connection reset".into()));
        }
        Ok(futures_util::stream::iter(chunks).boxed())
    }
}
