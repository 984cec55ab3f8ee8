//! In-memory stores for documents and chat sessions.
//!
//! Both stores hand out cloned snapshots; mutation goes through
//! `update_with` closures so readers never observe a half-applied change.
//! [`DocumentStore`] additionally tracks a per-document run lock that the
//! orchestrator holds for the duration of a processing run, making
//! double-runs structurally impossible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{ChatError, PipelineError};
use crate::models::{ChatSession, Document};

/// Held for the duration of a processing run; dropping it releases the
/// document for the next run.
pub type RunGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    run_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Document) {
        // A poisoned lock still guards a structurally valid map; recover
        // rather than drop the write.
        let mut documents = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        documents.insert(document.id, document);
    }

    /// Snapshot of one document.
    pub fn get(&self, id: Uuid) -> Result<Document, PipelineError> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }

    /// Snapshots of all documents, oldest upload first.
    pub fn list(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.upload_time);
        documents
    }

    /// Apply `f` to the stored document under the write lock and return
    /// the updated snapshot.
    pub fn update_with<F>(&self, id: Uuid, f: F) -> Result<Document, PipelineError>
    where
        F: FnOnce(&mut Document),
    {
        let mut documents = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let document = documents.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        f(document);
        Ok(document.clone())
    }

    pub fn remove(&self, id: Uuid) -> Result<Document, PipelineError> {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(PipelineError::NotFound(id))?;
        self.run_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(removed)
    }

    /// Acquire the document's run lock without waiting. Fails with
    /// [`PipelineError::AlreadyProcessing`] when a run is in flight.
    pub fn try_run_guard(&self, id: Uuid) -> Result<RunGuard, PipelineError> {
        let lock = {
            let mut locks = self
                .run_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.try_lock_owned()
            .map_err(|_| PipelineError::AlreadyProcessing(id))
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, ChatSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: ChatSession) {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id, session);
    }

    pub fn get(&self, id: Uuid) -> Result<ChatSession, ChatError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ChatError::SessionNotFound(id))
    }

    /// Sessions ordered by most recent activity.
    pub fn list(&self) -> Vec<ChatSession> {
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        sessions
    }

    pub fn update_with<F>(&self, id: Uuid, f: F) -> Result<ChatSession, ChatError>
    where
        F: FnOnce(&mut ChatSession),
    {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(&id).ok_or(ChatError::SessionNotFound(id))?;
        f(session);
        Ok(session.clone())
    }

    pub fn remove(&self, id: Uuid) -> Result<ChatSession, ChatError> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(ChatError::SessionNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    #[test]
    fn insert_get_and_update() {
        let store = DocumentStore::new();
        let doc = Document::new("a.txt", "/tmp/a.txt", 3, "txt");
        let id = doc.id;
        store.insert(doc);

        let updated = store
            .update_with(id, |d| d.status = DocumentStatus::Processing)
            .unwrap();
        assert_eq!(updated.status, DocumentStatus::Processing);
        assert_eq!(store.get(id).unwrap().status, DocumentStatus::Processing);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.get(Uuid::new_v4()),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn run_guard_blocks_second_acquisition() {
        let store = DocumentStore::new();
        let doc = Document::new("a.txt", "/tmp/a.txt", 3, "txt");
        let id = doc.id;
        store.insert(doc);

        let guard = store.try_run_guard(id).unwrap();
        assert!(matches!(
            store.try_run_guard(id),
            Err(PipelineError::AlreadyProcessing(_))
        ));
        drop(guard);
        assert!(store.try_run_guard(id).is_ok());
    }

    #[test]
    fn list_orders_by_upload_time() {
        let store = DocumentStore::new();
        let first = Document::new("first.txt", "/tmp/1", 1, "txt");
        let second = Document::new("second.txt", "/tmp/2", 1, "txt");
        let first_id = first.id;
        store.insert(second);
        store.insert(first);
        // upload_time for `first` was created earlier.
        assert_eq!(store.list()[0].id, first_id);
    }

    #[test]
    fn poisoned_lock_does_not_drop_writes() {
        let store = Arc::new(DocumentStore::new());
        let first = Document::new("first.txt", "/tmp/1", 1, "txt");
        let first_id = first.id;
        store.insert(first);

        // Panic inside an update closure to poison the RwLock.
        let poisoner = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            let _ = poisoner.update_with(first_id, |_| panic!("boom"));
        });
        assert!(handle.join().is_err());

        // Subsequent writes and reads still go through.
        let second = Document::new("second.txt", "/tmp/2", 1, "txt");
        let second_id = second.id;
        store.insert(second);
        assert!(store.get(second_id).is_ok());
        assert!(store.get(first_id).is_ok());
    }

    #[test]
    fn sessions_round_trip() {
        let store = SessionStore::new();
        let session = ChatSession::new(Some("review".to_string()), "extractive");
        let id = session.id;
        store.insert(session);

        let updated = store
            .update_with(id, |s| s.name = "renamed".to_string())
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert!(store.remove(id).is_ok());
        assert!(store.get(id).is_err());
    }
}
