use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context};
use coedit_common::types::ChatEvent;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::DocumentMembers;

#[derive(Debug, Clone, Default)]
struct MemoryDocument {
    owner_id: Uuid,
    collaborator_ids: Vec<Uuid>,
    messages: Vec<ChatEvent>,
}

/// Process-local document store for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<Uuid, MemoryDocument>>>,
    fail_appends: Arc<AtomicBool>,
    append_calls: Arc<AtomicUsize>,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    documents: Vec<SeedDocument>,
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    id: Uuid,
    owner_id: Uuid,
    #[serde(default)]
    collaborator_ids: Vec<Uuid>,
}

impl MemoryDocumentStore {
    /// Load documents from a JSON file shaped
    /// `{"documents": [{"id", "owner_id", "collaborator_ids"}]}`.
    pub async fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.context("failed to read seed file")?;
        Self::from_seed_json(&raw)
    }

    fn from_seed_json(raw: &str) -> anyhow::Result<Self> {
        let seed: SeedFile = serde_json::from_str(raw).context("seed file is not valid JSON")?;
        let mut documents = HashMap::with_capacity(seed.documents.len());
        for document in seed.documents {
            let entry = MemoryDocument {
                owner_id: document.owner_id,
                collaborator_ids: document.collaborator_ids,
                messages: Vec::new(),
            };
            if documents.insert(document.id, entry).is_some() {
                bail!("seed file lists document {} twice", document.id);
            }
        }

        Ok(Self { documents: Arc::new(RwLock::new(documents)), ..Self::default() })
    }

    pub async fn insert_document(&self, id: Uuid, owner_id: Uuid, collaborator_ids: Vec<Uuid>) {
        self.documents
            .write()
            .await
            .insert(id, MemoryDocument { owner_id, collaborator_ids, messages: Vec::new() });
    }

    pub async fn remove_collaborator(&self, id: Uuid, user_id: Uuid) {
        if let Some(document) = self.documents.write().await.get_mut(&id) {
            document.collaborator_ids.retain(|collaborator| *collaborator != user_id);
        }
    }

    pub(super) async fn members(&self, id: Uuid) -> Option<DocumentMembers> {
        self.documents.read().await.get(&id).map(|document| DocumentMembers {
            owner_id: document.owner_id,
            collaborator_ids: document.collaborator_ids.clone(),
        })
    }

    pub(super) async fn append_message(&self, id: Uuid, event: ChatEvent) -> anyhow::Result<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            bail!("memory document store is rejecting appends");
        }

        let mut guard = self.documents.write().await;
        let Some(document) = guard.get_mut(&id) else {
            bail!("document {id} does not exist");
        };
        document.messages.push(event);
        Ok(())
    }

    pub async fn messages(&self, id: Uuid) -> Vec<ChatEvent> {
        self.documents
            .read()
            .await
            .get(&id)
            .map(|document| document.messages.clone())
            .unwrap_or_default()
    }

    /// Number of append attempts, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent append fail, simulating an unavailable store.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}
