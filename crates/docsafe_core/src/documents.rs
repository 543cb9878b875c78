//! Document-session collaborator interface.
//!
//! The engine never owns editor state. It asks the host for dirty flags and
//! content, and hands recovered content back through [`DocumentStore`].

use crate::models::entry::DocumentId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Content handed to the host when a recovery entry is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredDocument {
    pub document_id: DocumentId,
    pub source_path: Option<PathBuf>,
    pub content: String,
}

/// Host-side view of open document sessions.
///
/// Implementations must be callable from worker threads.
pub trait DocumentStore: Send + Sync {
    /// `true` when the session has unsaved edits.
    fn is_dirty(&self, document_id: &DocumentId) -> bool;

    /// Current content of the session, or `None` when it is not open.
    fn content(&self, document_id: &DocumentId) -> Option<String>;

    /// Path the session saves to, if any.
    fn source_path(&self, document_id: &DocumentId) -> Option<PathBuf>;

    /// Open a session holding recovered content.
    ///
    /// The new session must be marked dirty: recovered content is unsaved.
    ///
    /// # Errors
    /// Returns a host-specific message when the session cannot be opened.
    fn open_recovered(&self, document: RestoredDocument) -> Result<(), String>;
}

#[derive(Debug, Clone)]
struct Session {
    source_path: Option<PathBuf>,
    content: String,
    dirty: bool,
}

/// In-memory [`DocumentStore`] used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryDocuments {
    sessions: Mutex<HashMap<DocumentId, Session>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<R>(&self, f: impl FnOnce(&mut HashMap<DocumentId, Session>) -> R) -> R {
        match self.sessions.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Open a clean session.
    pub fn open(&self, document_id: DocumentId, source_path: Option<PathBuf>, content: &str) {
        self.with_sessions(|sessions| {
            sessions.insert(
                document_id,
                Session {
                    source_path,
                    content: content.to_string(),
                    dirty: false,
                },
            );
        });
    }

    /// Replace the content of an open session and mark it dirty.
    ///
    /// # Returns
    /// `false` when the session is not open.
    pub fn edit(&self, document_id: &DocumentId, content: &str) -> bool {
        self.with_sessions(|sessions| match sessions.get_mut(document_id) {
            Some(session) => {
                session.content = content.to_string();
                session.dirty = true;
                true
            }
            None => false,
        })
    }

    /// Clear the dirty flag after a manual save.
    ///
    /// # Returns
    /// `true` when the session transitioned from dirty to clean.
    pub fn mark_saved(&self, document_id: &DocumentId) -> bool {
        self.with_sessions(|sessions| match sessions.get_mut(document_id) {
            Some(session) if session.dirty => {
                session.dirty = false;
                true
            }
            _ => false,
        })
    }

    pub fn is_open(&self, document_id: &DocumentId) -> bool {
        self.with_sessions(|sessions| sessions.contains_key(document_id))
    }

    pub fn open_ids(&self) -> Vec<DocumentId> {
        let mut ids = self.with_sessions(|sessions| sessions.keys().cloned().collect::<Vec<_>>());
        ids.sort();
        ids
    }
}

impl DocumentStore for MemoryDocuments {
    fn is_dirty(&self, document_id: &DocumentId) -> bool {
        self.with_sessions(|sessions| {
            sessions
                .get(document_id)
                .is_some_and(|session| session.dirty)
        })
    }

    fn content(&self, document_id: &DocumentId) -> Option<String> {
        self.with_sessions(|sessions| {
            sessions
                .get(document_id)
                .map(|session| session.content.clone())
        })
    }

    fn source_path(&self, document_id: &DocumentId) -> Option<PathBuf> {
        self.with_sessions(|sessions| {
            sessions
                .get(document_id)
                .and_then(|session| session.source_path.clone())
        })
    }

    fn open_recovered(&self, document: RestoredDocument) -> Result<(), String> {
        self.with_sessions(|sessions| {
            sessions.insert(
                document.document_id,
                Session {
                    source_path: document.source_path,
                    content: document.content,
                    dirty: true,
                },
            );
        });
        Ok(())
    }
}
