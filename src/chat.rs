//! Chat sessions over processed documents.
//!
//! [`ChatService`] owns session CRUD, document attachment, and response
//! generation. A response turn retrieves context from the session's
//! attached documents, dispatches to the session's completion provider by
//! name, and records both the user and assistant messages, the latter with
//! retrieval provenance in its metadata.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::error::ChatError;
use crate::models::{ChatMessage, ChatSession, Document};
use crate::provider::{CompletionRequest, ProviderRegistry};
use crate::retrieval::{build_query, retrieve_context};
use crate::store::{DocumentStore, SessionStore};
use crate::vector::VectorStore;

pub struct ChatService {
    sessions: Arc<SessionStore>,
    documents: Arc<DocumentStore>,
    vectors: Arc<dyn VectorStore>,
    registry: ProviderRegistry,
    config: Config,
}

impl ChatService {
    pub fn new(
        sessions: Arc<SessionStore>,
        documents: Arc<DocumentStore>,
        vectors: Arc<dyn VectorStore>,
        registry: ProviderRegistry,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            documents,
            vectors,
            registry,
            config,
        }
    }

    /// Create a session bound to a completion provider. The provider name
    /// is validated eagerly so a bad name fails here, not mid-conversation.
    pub fn create_session(
        &self,
        name: Option<String>,
        provider: Option<&str>,
    ) -> Result<ChatSession, ChatError> {
        let provider = provider.unwrap_or(&self.config.chat.provider);
        if !self.registry.names().contains(&provider) {
            return Err(ChatError::UnknownProvider(provider.to_string()));
        }
        let session = ChatSession::new(name, provider);
        tracing::info!(id = %session.id, provider, "chat session created");
        self.sessions.insert(session.clone());
        Ok(session)
    }

    pub fn get_session(&self, id: Uuid) -> Result<ChatSession, ChatError> {
        self.sessions.get(id)
    }

    pub fn list_sessions(&self) -> Vec<ChatSession> {
        self.sessions.list()
    }

    pub fn rename_session(&self, id: Uuid, name: &str) -> Result<ChatSession, ChatError> {
        let name = name.to_string();
        self.sessions.update_with(id, |s| s.name = name)
    }

    pub fn delete_session(&self, id: Uuid) -> Result<(), ChatError> {
        self.sessions.remove(id).map(|_| ())
    }

    /// Attach a document to a session. Idempotent for documents already
    /// attached; bounded by `chat.max_documents_per_chat`.
    pub fn attach_document(&self, session_id: Uuid, document_id: Uuid) -> Result<ChatSession, ChatError> {
        self.documents
            .get(document_id)
            .map_err(|_| ChatError::DocumentNotFound(document_id))?;

        let session = self.sessions.get(session_id)?;
        if session.document_ids.contains(&document_id) {
            return Ok(session);
        }
        if session.document_ids.len() >= self.config.chat.max_documents_per_chat {
            return Err(ChatError::DocumentLimit(
                self.config.chat.max_documents_per_chat,
            ));
        }
        self.sessions
            .update_with(session_id, |s| s.document_ids.push(document_id))
    }

    pub fn detach_document(
        &self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<ChatSession, ChatError> {
        self.sessions
            .update_with(session_id, |s| s.document_ids.retain(|d| *d != document_id))
    }

    /// Run one full chat turn: record the user message, retrieve context,
    /// complete, record and return the assistant message.
    pub async fn generate_response(
        &self,
        session_id: Uuid,
        message: &str,
    ) -> Result<ChatMessage, ChatError> {
        let session = self.sessions.get(session_id)?;

        let attached: Vec<Document> = session
            .document_ids
            .iter()
            .filter_map(|id| self.documents.get(*id).ok())
            .collect();
        let titles: Vec<String> = attached
            .iter()
            .map(|d| d.display_title().to_string())
            .collect();

        // History window is taken before this turn's user message.
        let history: Vec<ChatMessage> = session
            .recent_messages(self.config.chat.context_window)
            .to_vec();
        self.sessions
            .update_with(session_id, |s| s.add_message(ChatMessage::user(message)))?;

        let query = build_query(&history, message);
        let retrieved = retrieve_context(
            &self.documents,
            &self.vectors,
            &session.document_ids,
            &query,
            &self.config.retrieval,
        )
        .await;

        let request = CompletionRequest {
            message: message.to_string(),
            context_block: retrieved.format_block(),
            grounded: retrieved.grounded,
            history,
            document_titles: titles,
        };

        let provider = self.registry.create(&session.provider, &self.config.chat)?;
        tracing::debug!(
            session = %session_id,
            provider = provider.name(),
            hits = retrieved.hits.len(),
            "generating response"
        );
        let reply = provider.complete(&request).await?;

        let sources: Vec<serde_json::Value> = retrieved
            .hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "document_id": hit.document_id,
                    "document_title": hit.document_title,
                    "page_number": hit.page_number,
                    "section_title": hit.section_title,
                    "relevance": 1.0 - hit.distance,
                })
            })
            .collect();
        let assistant = ChatMessage::assistant(
            reply,
            serde_json::json!({
                "grounded": retrieved.grounded,
                "provider": provider.name(),
                "sources": sources,
            }),
        );

        let reply = assistant.clone();
        self.sessions
            .update_with(session_id, |s| s.add_message(assistant))?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::whole_text_chunk;
    use crate::vector::InMemoryVectorStore;

    struct Fixture {
        service: ChatService,
        documents: Arc<DocumentStore>,
        vectors: Arc<InMemoryVectorStore>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(DocumentStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let service = ChatService::new(
            Arc::new(SessionStore::new()),
            Arc::clone(&documents),
            vectors.clone() as Arc<dyn VectorStore>,
            ProviderRegistry::with_builtins(),
            Config::default(),
        );
        Fixture {
            service,
            documents,
            vectors,
        }
    }

    async fn indexed_doc(fixture: &Fixture, name: &str, text: &str) -> Uuid {
        let mut doc = Document::new(name, "/tmp/x", 1, "txt");
        let collection = format!("doc_{}", doc.id);
        doc.collection = Some(collection.clone());
        let id = doc.id;
        fixture.documents.insert(doc);
        fixture
            .vectors
            .upsert_chunks(&collection, &[whole_text_chunk(text)])
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn unknown_provider_rejected_at_session_creation() {
        let fixture = fixture();
        let err = fixture
            .service
            .create_session(None, Some("imaginary"))
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn attach_is_idempotent_and_bounded() {
        let fixture = fixture();
        let session = fixture.service.create_session(None, None).unwrap();

        let mut last_id = None;
        for i in 0..5 {
            let id = indexed_doc(&fixture, &format!("d{}.txt", i), "text").await;
            fixture.service.attach_document(session.id, id).unwrap();
            last_id = Some(id);
        }
        // Re-attaching an attached document is a no-op.
        let updated = fixture
            .service
            .attach_document(session.id, last_id.unwrap())
            .unwrap();
        assert_eq!(updated.document_ids.len(), 5);

        let extra = indexed_doc(&fixture, "extra.txt", "text").await;
        assert!(matches!(
            fixture.service.attach_document(session.id, extra),
            Err(ChatError::DocumentLimit(5))
        ));
    }

    #[tokio::test]
    async fn attaching_missing_document_fails() {
        let fixture = fixture();
        let session = fixture.service.create_session(None, None).unwrap();
        assert!(matches!(
            fixture.service.attach_document(session.id, Uuid::new_v4()),
            Err(ChatError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn response_turn_records_both_messages() {
        let fixture = fixture();
        let session = fixture.service.create_session(None, None).unwrap();
        let doc = indexed_doc(&fixture, "notes.txt", "rust ownership and borrowing").await;
        fixture.service.attach_document(session.id, doc).unwrap();

        let reply = fixture
            .service
            .generate_response(session.id, "tell me about ownership")
            .await
            .unwrap();
        assert!(reply.text.contains("rust ownership and borrowing"));
        assert_eq!(reply.metadata["grounded"], serde_json::json!(true));
        assert_eq!(
            reply.metadata["sources"][0]["document_title"],
            serde_json::json!("notes.txt")
        );

        let session = fixture.service.get_session(session.id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].text, "tell me about ownership");
    }

    #[tokio::test]
    async fn response_without_documents_says_so() {
        let fixture = fixture();
        let session = fixture.service.create_session(None, None).unwrap();
        let reply = fixture
            .service
            .generate_response(session.id, "anything?")
            .await
            .unwrap();
        assert!(reply.text.contains("No documents are attached"));
        assert_eq!(reply.metadata["grounded"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn detach_removes_document_from_retrieval() {
        let fixture = fixture();
        let session = fixture.service.create_session(None, None).unwrap();
        let doc = indexed_doc(&fixture, "notes.txt", "unique retrieval phrase").await;
        fixture.service.attach_document(session.id, doc).unwrap();
        let updated = fixture.service.detach_document(session.id, doc).unwrap();
        assert!(updated.document_ids.is_empty());
    }
}
