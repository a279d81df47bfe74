// Document store seen by the relay: who may open a document, and where
// its chat history goes. Document CRUD lives elsewhere and writes the same
// tables; rows read here are point-in-time snapshots.

mod memory;

use anyhow::Context;
use coedit_common::types::ChatEvent;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::db::pool::{connect_document_database, PoolConfig};

pub use memory::MemoryDocumentStore;

/// Ownership and sharing of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMembers {
    pub owner_id: Uuid,
    pub collaborator_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentAccess {
    Owner,
    Collaborator,
}

impl DocumentMembers {
    pub fn access_for(&self, user_id: Uuid) -> Option<DocumentAccess> {
        if self.owner_id == user_id {
            Some(DocumentAccess::Owner)
        } else if self.collaborator_ids.contains(&user_id) {
            Some(DocumentAccess::Collaborator)
        } else {
            None
        }
    }
}

/// Answer of the access oracle for `(room id, user id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted { document_id: Uuid, access: DocumentAccess },
    Denied,
    NotFound,
}

#[derive(Clone)]
pub enum DocumentStore {
    Postgres(PgPool),
    Memory(MemoryDocumentStore),
}

impl DocumentStore {
    /// PostgreSQL when a database URL is configured, otherwise an in-memory
    /// store (optionally seeded from a JSON file) for local development.
    pub async fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        match (&config.database_url, &config.memory_seed_path) {
            (Some(database_url), _) => {
                let pool = connect_document_database(database_url, PoolConfig::from_env())
                    .await
                    .context("failed to initialize relay document database")?;
                Ok(Self::Postgres(pool))
            }
            (None, Some(seed_path)) => {
                let store = MemoryDocumentStore::from_seed_file(seed_path)
                    .await
                    .with_context(|| format!("failed to seed memory store from {}", seed_path.display()))?;
                Ok(Self::Memory(store))
            }
            (None, None) => Ok(Self::Memory(MemoryDocumentStore::default())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    pub async fn find_members(&self, document_id: Uuid) -> anyhow::Result<Option<DocumentMembers>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (Uuid, Vec<Uuid>)>(
                    r#"
                    SELECT d.owner_id,
                           COALESCE(
                               array_agg(c.user_id) FILTER (WHERE c.user_id IS NOT NULL),
                               '{}'
                           ) AS collaborator_ids
                    FROM documents AS d
                    LEFT JOIN document_collaborators AS c
                        ON c.document_id = d.id
                    WHERE d.id = $1
                    GROUP BY d.owner_id
                    "#,
                )
                .bind(document_id)
                .fetch_optional(pool)
                .await
                .context("failed to query document members")?;

                Ok(row.map(|(owner_id, collaborator_ids)| DocumentMembers {
                    owner_id,
                    collaborator_ids,
                }))
            }
            Self::Memory(store) => Ok(store.members(document_id).await),
        }
    }

    /// Resolve whether `user_id` may join the room named `room_id`.
    ///
    /// Room ids that are not document UUIDs resolve as not found.
    pub async fn resolve_access(
        &self,
        room_id: &str,
        user_id: Uuid,
    ) -> anyhow::Result<AccessDecision> {
        let Ok(document_id) = Uuid::parse_str(room_id.trim()) else {
            return Ok(AccessDecision::NotFound);
        };

        let decision = match self.find_members(document_id).await? {
            None => AccessDecision::NotFound,
            Some(members) => match members.access_for(user_id) {
                Some(access) => AccessDecision::Granted { document_id, access },
                None => AccessDecision::Denied,
            },
        };

        Ok(decision)
    }

    /// Append one chat line to the document's message history.
    pub async fn append_message(&self, document_id: Uuid, event: &ChatEvent) -> anyhow::Result<()> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO document_messages (document_id, author, message, sent_at)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(document_id)
                .bind(&event.user)
                .bind(&event.message)
                .bind(event.timestamp)
                .execute(pool)
                .await
                .context("failed to insert document message")?;

                anyhow::ensure!(result.rows_affected() == 1, "document message insert was dropped");
                Ok(())
            }
            Self::Memory(store) => store.append_message(document_id, event.clone()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessDecision, DocumentAccess, DocumentMembers, DocumentStore, MemoryDocumentStore};
    use crate::db::pool::{connect_document_database, PoolConfig};
    use chrono::Utc;
    use coedit_common::types::ChatEvent;
    use uuid::Uuid;

    #[test]
    fn members_distinguish_owner_collaborator_and_stranger() {
        let owner = Uuid::new_v4();
        let collaborator = Uuid::new_v4();
        let members = DocumentMembers { owner_id: owner, collaborator_ids: vec![collaborator] };

        assert_eq!(members.access_for(owner), Some(DocumentAccess::Owner));
        assert_eq!(members.access_for(collaborator), Some(DocumentAccess::Collaborator));
        assert_eq!(members.access_for(Uuid::new_v4()), None);
    }

    #[tokio::test]
    async fn resolve_access_covers_every_outcome() {
        let memory = MemoryDocumentStore::default();
        let owner = Uuid::new_v4();
        let collaborator = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        memory.insert_document(document_id, owner, vec![collaborator]).await;
        let store = DocumentStore::Memory(memory);
        let room_id = document_id.to_string();

        assert_eq!(
            store.resolve_access(&room_id, owner).await.expect("lookup should succeed"),
            AccessDecision::Granted { document_id, access: DocumentAccess::Owner }
        );
        assert_eq!(
            store.resolve_access(&room_id, collaborator).await.expect("lookup should succeed"),
            AccessDecision::Granted { document_id, access: DocumentAccess::Collaborator }
        );
        assert_eq!(
            store.resolve_access(&room_id, Uuid::new_v4()).await.expect("lookup should succeed"),
            AccessDecision::Denied
        );
        assert_eq!(
            store
                .resolve_access(&Uuid::new_v4().to_string(), owner)
                .await
                .expect("lookup should succeed"),
            AccessDecision::NotFound
        );
    }

    #[tokio::test]
    async fn non_uuid_room_ids_are_not_found() {
        let store = DocumentStore::Memory(MemoryDocumentStore::default());

        for room_id in ["", "64f0c2a9e4b0a1b2c3d4e5f6", "../../etc/passwd"] {
            assert_eq!(
                store.resolve_access(room_id, Uuid::new_v4()).await.expect("lookup should succeed"),
                AccessDecision::NotFound
            );
        }
    }

    #[tokio::test]
    async fn append_message_records_history_in_order() {
        let memory = MemoryDocumentStore::default();
        let document_id = Uuid::new_v4();
        memory.insert_document(document_id, Uuid::new_v4(), Vec::new()).await;
        let store = DocumentStore::Memory(memory.clone());

        let first = ChatEvent::new("alice", "one", Utc::now());
        let second = ChatEvent::new("bob", "two", Utc::now());
        store.append_message(document_id, &first).await.expect("append should succeed");
        store.append_message(document_id, &second).await.expect("append should succeed");

        assert_eq!(memory.messages(document_id).await, vec![first, second]);
    }

    #[tokio::test]
    async fn append_message_to_missing_document_fails() {
        let store = DocumentStore::Memory(MemoryDocumentStore::default());
        let event = ChatEvent::new("alice", "hi", Utc::now());

        assert!(store.append_message(Uuid::new_v4(), &event).await.is_err());
    }

    #[tokio::test]
    async fn postgres_store_resolves_access_and_appends_history() {
        let Some(database_url) = std::env::var("COEDIT_RELAY_TEST_DATABASE_URL").ok() else {
            eprintln!(
                "skipping postgres store test: set COEDIT_RELAY_TEST_DATABASE_URL to run it"
            );
            return;
        };

        let config = PoolConfig { min_connections: 1, max_connections: 2, ..PoolConfig::default() };
        let pool = connect_document_database(&database_url, config)
            .await
            .expect("test database should connect and migrate");
        let owner = Uuid::new_v4();
        let collaborator = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        sqlx::query("INSERT INTO documents (id, owner_id, title) VALUES ($1, $2, 'notes')")
            .bind(document_id)
            .bind(owner)
            .execute(&pool)
            .await
            .expect("document should insert");
        sqlx::query("INSERT INTO document_collaborators (document_id, user_id) VALUES ($1, $2)")
            .bind(document_id)
            .bind(collaborator)
            .execute(&pool)
            .await
            .expect("collaborator should insert");
        let store = DocumentStore::Postgres(pool.clone());
        let room_id = document_id.to_string();

        assert_eq!(
            store.resolve_access(&room_id, collaborator).await.expect("lookup should succeed"),
            AccessDecision::Granted { document_id, access: DocumentAccess::Collaborator }
        );
        assert_eq!(
            store.resolve_access(&room_id, Uuid::new_v4()).await.expect("lookup should succeed"),
            AccessDecision::Denied
        );

        let event = ChatEvent::new("bob", "hello", Utc::now());
        store.append_message(document_id, &event).await.expect("append should succeed");
        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_messages WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&pool)
                .await
                .expect("count should succeed");
        assert_eq!(stored, 1);

        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&pool)
            .await
            .expect("cleanup should succeed");
    }
}
