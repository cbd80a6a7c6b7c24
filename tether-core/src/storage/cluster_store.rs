use crate::error::StoreError;
use crate::types::{ExecutorAttachment, Network};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Params, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub enum NetworkFilter {
    All,
    ByName(String),
}

#[derive(Debug, Clone)]
pub enum AttachmentFilter {
    All,
    ByNode(String),
}

/// Consistent object store for cluster state.
///
/// Transactions are serialized over a single SQLite connection, so a commit
/// is visible to every view opened after it.
pub struct ClusterStore {
    conn: Mutex<Connection>,
}

/// Read-only access inside a transaction.
pub struct ReadTx<'a> {
    conn: &'a Connection,
}

/// Read-write access inside a transaction. Reads see the transaction's own
/// uncommitted writes.
pub struct WriteTx<'a> {
    read: ReadTx<'a>,
}

impl ClusterStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| StoreError::Unavailable(error.to_string()))?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a read transaction.
    pub fn view<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&ReadTx<'_>) -> StoreResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = f(&ReadTx { conn: &tx });
        tx.finish()?;
        result
    }

    /// Run `f` inside a write transaction. The transaction commits only if
    /// `f` returns `Ok`; otherwise nothing it wrote becomes visible.
    pub fn update<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&WriteTx<'_>) -> StoreResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&WriteTx {
            read: ReadTx { conn: &tx },
        })?;
        tx.commit()?;
        Ok(value)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("cluster store lock poisoned".to_string()))
    }
}

#[cfg(test)]
impl ClusterStore {
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS networks (
            pk INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            name TEXT,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_networks_name ON networks(name);

        CREATE TABLE IF NOT EXISTS attachments (
            pk INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            node_id TEXT NOT NULL,
            network_id TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_node ON attachments(node_id);",
    )?;

    Ok(())
}

fn query_payloads<P: Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let payloads = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(payloads)
}

fn decode<T: DeserializeOwned>(payload: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(payload)?)
}

impl ReadTx<'_> {
    pub fn get_network(&self, id: &str) -> StoreResult<Option<Network>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM networks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        payload.as_deref().map(decode::<Network>).transpose()
    }

    /// Networks matching `filter`, in insertion order.
    pub fn find_networks(&self, filter: &NetworkFilter) -> StoreResult<Vec<Network>> {
        let payloads = match filter {
            NetworkFilter::All => {
                query_payloads(self.conn, "SELECT payload FROM networks ORDER BY pk", [])?
            }
            NetworkFilter::ByName(name) => query_payloads(
                self.conn,
                "SELECT payload FROM networks WHERE name = ?1 ORDER BY pk",
                params![name],
            )?,
        };

        payloads.iter().map(|payload| decode(payload)).collect()
    }

    pub fn get_attachment(&self, id: &str) -> StoreResult<Option<ExecutorAttachment>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM attachments WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        payload.as_deref().map(decode::<ExecutorAttachment>).transpose()
    }

    /// Attachments matching `filter`, in creation order.
    pub fn find_attachments(
        &self,
        filter: &AttachmentFilter,
    ) -> StoreResult<Vec<ExecutorAttachment>> {
        let payloads = match filter {
            AttachmentFilter::All => {
                query_payloads(self.conn, "SELECT payload FROM attachments ORDER BY pk", [])?
            }
            AttachmentFilter::ByNode(node_id) => query_payloads(
                self.conn,
                "SELECT payload FROM attachments WHERE node_id = ?1 ORDER BY pk",
                params![node_id],
            )?,
        };

        payloads.iter().map(|payload| decode(payload)).collect()
    }
}

impl<'a> Deref for WriteTx<'a> {
    type Target = ReadTx<'a>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl WriteTx<'_> {
    /// Insert or replace a network, keeping its original position.
    pub fn put_network(&self, network: &Network) -> StoreResult<()> {
        let payload = serde_json::to_string(network)?;
        self.read.conn.execute(
            "INSERT INTO networks (id, name, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, payload = excluded.payload",
            params![network.id, network.name, payload],
        )?;
        Ok(())
    }

    pub fn create_attachment(&self, attachment: &ExecutorAttachment) -> StoreResult<()> {
        let payload = serde_json::to_string(attachment)?;
        let inserted = self.read.conn.execute(
            "INSERT INTO attachments (id, node_id, network_id, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                attachment.id,
                attachment.node_id,
                attachment.attachment.network.id,
                payload
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Fails with [`StoreError::NotExist`] when no attachment has this ID.
    pub fn delete_attachment(&self, id: &str) -> StoreResult<()> {
        let deleted = self
            .read
            .conn
            .execute("DELETE FROM attachments WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(StoreError::NotExist);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AttachmentSpec, AttachmentState, AttachmentStatus, NetworkAttachment,
    };

    fn sample_attachment(id: &str, node_id: &str, network: &Network) -> ExecutorAttachment {
        ExecutorAttachment {
            id: id.to_string(),
            node_id: node_id.to_string(),
            spec: AttachmentSpec {
                node_id: node_id.to_string(),
                target: network.id.clone(),
                ..Default::default()
            },
            attachment: NetworkAttachment {
                network: network.clone(),
                addresses: vec!["10.0.0.2/24".to_string()],
            },
            status: AttachmentStatus {
                state: AttachmentState::New,
                message: String::new(),
                timestamp: chrono::Utc::now(),
            },
        }
    }

    #[test]
    fn test_find_networks_by_name_keeps_insertion_order() {
        let store = ClusterStore::open_in_memory().unwrap();
        store
            .update(|tx| {
                tx.put_network(&Network::new("net-b", Some("shared".to_string())))?;
                tx.put_network(&Network::new("net-a", Some("shared".to_string())))?;
                tx.put_network(&Network::new("net-c", None))
            })
            .unwrap();

        let found = store
            .view(|tx| tx.find_networks(&NetworkFilter::ByName("shared".to_string())))
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|network| network.id.as_str()).collect();
        assert_eq!(ids, vec!["net-b", "net-a"]);

        let all = store.view(|tx| tx.find_networks(&NetworkFilter::All)).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_create_duplicate_attachment_is_rejected() {
        let store = ClusterStore::open_in_memory().unwrap();
        let network = Network::new("net1", None);
        let attachment = sample_attachment("att1", "node-1", &network);

        store.update(|tx| tx.create_attachment(&attachment)).unwrap();
        let second = store.update(|tx| tx.create_attachment(&attachment));
        assert!(matches!(second, Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn test_delete_missing_attachment_reports_not_exist() {
        let store = ClusterStore::open_in_memory().unwrap();
        let network = Network::new("net1", None);
        store
            .update(|tx| tx.create_attachment(&sample_attachment("att1", "node-1", &network)))
            .unwrap();

        store.update(|tx| tx.delete_attachment("att1")).unwrap();
        let again = store.update(|tx| tx.delete_attachment("att1"));
        assert!(matches!(again, Err(StoreError::NotExist)));
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let store = ClusterStore::open_in_memory().unwrap();
        let network = Network::new("net1", None);

        let result: StoreResult<()> = store.update(|tx| {
            tx.create_attachment(&sample_attachment("att1", "node-1", &network))?;
            assert!(tx.get_attachment("att1")?.is_some());
            Err(StoreError::NotExist)
        });
        assert!(result.is_err());

        let stored = store.view(|tx| tx.get_attachment("att1")).unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_find_attachments_by_node() {
        let store = ClusterStore::open_in_memory().unwrap();
        let network = Network::new("net1", None);
        store
            .update(|tx| {
                tx.create_attachment(&sample_attachment("att1", "node-1", &network))?;
                tx.create_attachment(&sample_attachment("att2", "node-2", &network))?;
                tx.create_attachment(&sample_attachment("att3", "node-1", &network))
            })
            .unwrap();

        let node_1 = store
            .view(|tx| tx.find_attachments(&AttachmentFilter::ByNode("node-1".to_string())))
            .unwrap();
        let ids: Vec<&str> = node_1.iter().map(|att| att.id.as_str()).collect();
        assert_eq!(ids, vec!["att1", "att3"]);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("state").join("cluster.db");
        let network = Network::new("net1", Some("prod-net".to_string()));

        {
            let store = ClusterStore::open(&db_path).unwrap();
            store
                .update(|tx| {
                    tx.put_network(&network)?;
                    tx.create_attachment(&sample_attachment("att1", "node-1", &network))
                })
                .unwrap();
        }

        let store = ClusterStore::open(&db_path).unwrap();
        let stored = store.view(|tx| tx.get_attachment("att1")).unwrap().unwrap();
        assert_eq!(stored.attachment.network, network);
        assert_eq!(
            store.view(|tx| tx.get_network("net1")).unwrap().unwrap().name.as_deref(),
            Some("prod-net")
        );
    }
}
