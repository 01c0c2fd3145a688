use super::attributes::{self, NodePayload, SqliteQuery, ID_CHUNK};
use super::closure;
use super::path;
use super::types::{
    DeletedNode, NewNode, Node, NodeDetails, NodeError, NodeFilter, NodeId, NodeKind, NodeUpdate,
    Page, Pagination, TablePage, TableRow,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{ConnectOptions, Row};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Configuration for the node store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,

    /// Largest `limit` a list or table request may ask for
    pub max_page_size: u32,

    /// Pool size
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("furnace.db"),
            max_page_size: 500,
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

const NODES_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        path TEXT NOT NULL,
        node_type TEXT NOT NULL,
        parent_id INTEGER REFERENCES nodes(id),
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        data_status TEXT NOT NULL DEFAULT 'new',
        description TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
    CREATE INDEX IF NOT EXISTS idx_nodes_type_modified ON nodes(node_type, modified_at);
"#;

const NODE_COLUMNS: &str = "n.id AS id, n.name AS name, n.path AS path, n.node_type AS node_type, \
     n.parent_id AS parent_id, n.created_at AS created_at, n.modified_at AS modified_at, \
     n.data_status AS data_status, n.description AS description";

/// SQLite-backed hierarchical node store.
///
/// Nodes of every type live in `nodes`; `node_closure` indexes the full
/// ancestor/descendant relation; each type keeps its attributes in a side
/// table. Every multi-step mutation runs in one transaction.
///
/// Structural mutations also pass through a process-wide writer gate, so two
/// requests never interleave their transactions. SQLite admits a single
/// writer anyway; the gate turns lock-upgrade failures between deferred
/// transactions into queueing. Reads never take the gate.
pub struct NodeStore {
    pool: SqlitePool,
    config: StoreConfig,
    writer: Mutex<()>,
}

impl NodeStore {
    /// Create a new store and run migrations
    pub async fn new(config: StoreConfig) -> Result<Self, NodeError> {
        let mut connect_options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);
        connect_options.disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(connect_options)
            .await
            .map_err(|e| format!("Failed to connect to database: {}", e))?;

        let storage = Self {
            pool,
            config,
            writer: Mutex::new(()),
        };
        storage.run_migrations().await?;

        info!(db = %storage.config.db_path.display(), "node store ready");
        Ok(storage)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), NodeError> {
        for (name, ddl) in [
            ("nodes", NODES_SCHEMA),
            ("closure", closure::SCHEMA),
            ("attributes", attributes::SCHEMA),
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| format!("Failed to run {} migrations: {}", name, e))?;
        }
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a node together with its attributes and closure edges
    pub async fn node_create(&self, new: NewNode) -> Result<Node, NodeError> {
        let name = path::validate_name(&new.name)?;
        let kind = new.payload.kind();
        let description = new.description.filter(|d| !d.is_empty());

        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let parent_path = match new.parent {
            Some(parent_id) => Some(fetch_node(&mut tx, parent_id).await?.path),
            None => None,
        };
        let node_path = path::join(parent_path.as_deref(), &name);
        let now = current_timestamp();

        let id = sqlx::query(
            "INSERT INTO nodes (name, path, node_type, parent_id, created_at, modified_at, data_status, description)
             VALUES (?, ?, ?, ?, ?, ?, 'new', ?)",
        )
        .bind(&name)
        .bind(&node_path)
        .bind(kind.as_str())
        .bind(new.parent.map(NodeId::get))
        .bind(now)
        .bind(now)
        .bind(description.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| format!("Failed to create node: {}", e))?
        .last_insert_rowid();
        let id = NodeId::new(id);

        new.payload.insert(&mut tx, id).await?;
        closure::insert_self(&mut tx, id).await?;
        let ancestor_edges = match new.parent {
            Some(parent_id) => closure::attach_leaf(&mut tx, id, parent_id).await?,
            None => 0,
        };

        tx.commit().await?;

        info!(%id, %kind, path = %node_path, ancestor_edges, "node created");
        Ok(Node {
            id,
            name,
            path: node_path,
            kind,
            parent_id: new.parent,
            created_at: now,
            modified_at: now,
            data_status: "new".to_string(),
            description,
        })
    }

    /// Rename a node, change its description and/or replace its attributes
    ///
    /// A rename rewrites the path of every descendant.
    pub async fn node_update(&self, id: NodeId, update: NodeUpdate) -> Result<Node, NodeError> {
        let new_name = update
            .name
            .as_deref()
            .map(path::validate_name)
            .transpose()?;

        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let node = fetch_node(&mut tx, id).await?;
        if let Some(payload) = &update.payload {
            if payload.kind() != node.kind {
                return Err(NodeError::Validation(format!(
                    "Node {} is a {}, cannot store {} attributes",
                    id,
                    node.kind,
                    payload.kind()
                )));
            }
        }

        let now = current_timestamp();

        if let Some(name) = new_name.filter(|name| *name != node.name) {
            let parent_path = match node.parent_id {
                Some(parent_id) => Some(fetch_node(&mut tx, parent_id).await?.path),
                None => None,
            };
            let new_path = path::join(parent_path.as_deref(), &name);

            sqlx::query("UPDATE nodes SET name = ?, path = ? WHERE id = ?")
                .bind(&name)
                .bind(&new_path)
                .bind(id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| format!("Failed to rename node: {}", e))?;

            let rewritten =
                path::rewrite_descendants(&mut tx, id, &node.path, &new_path, now).await?;
            info!(%id, from = %node.path, to = %new_path, rewritten, "node renamed");
        }

        if let Some(description) = &update.description {
            let description = Some(description.as_str()).filter(|d| !d.is_empty());
            sqlx::query("UPDATE nodes SET description = ? WHERE id = ?")
                .bind(description)
                .bind(id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| format!("Failed to update description: {}", e))?;
        }

        if let Some(payload) = &update.payload {
            payload.update(&mut tx, id).await?;
        }

        touch(&mut tx, id, now).await?;
        let updated = fetch_node(&mut tx, id).await?;
        tx.commit().await?;

        debug!(%id, "node updated");
        Ok(updated)
    }

    /// Re-parent a node and its whole subtree
    ///
    /// `None` turns the subtree into a new root. Moving a node below itself or
    /// one of its descendants is rejected.
    pub async fn node_move(
        &self,
        id: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<Node, NodeError> {
        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let node = fetch_node(&mut tx, id).await?;
        if node.parent_id == new_parent {
            return Ok(node);
        }

        let parent_path = match new_parent {
            Some(parent_id) => {
                let parent = fetch_node(&mut tx, parent_id).await?;
                if closure::is_within(&mut tx, id, parent_id).await? {
                    return Err(NodeError::Validation(format!(
                        "Cannot move node {} below its own subtree (node {})",
                        id, parent_id
                    )));
                }
                Some(parent.path)
            }
            None => None,
        };
        let new_path = path::join(parent_path.as_deref(), &node.name);
        let now = current_timestamp();

        let detached = closure::detach_subtree(&mut tx, id).await?;
        let grafted = match new_parent {
            Some(parent_id) => closure::graft_subtree(&mut tx, id, parent_id).await?,
            None => 0,
        };

        sqlx::query("UPDATE nodes SET parent_id = ?, path = ?, modified_at = ? WHERE id = ?")
            .bind(new_parent.map(NodeId::get))
            .bind(&new_path)
            .bind(now)
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| format!("Failed to move node: {}", e))?;
        let rewritten = path::rewrite_descendants(&mut tx, id, &node.path, &new_path, now).await?;

        let moved = fetch_node(&mut tx, id).await?;
        tx.commit().await?;

        info!(%id, from = %node.path, to = %new_path, detached, grafted, rewritten, "node moved");
        Ok(moved)
    }

    /// Delete a node and its whole subtree, side rows and closure edges
    pub async fn node_delete(&self, id: NodeId) -> Result<DeletedNode, NodeError> {
        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let subtree = closure::subtree(&mut tx, id).await?;
        if subtree.is_empty() {
            return Err(NodeError::node_not_found(id));
        }

        let attribute_rows = attributes::delete_for_nodes(&mut tx, &subtree).await?;
        let edges = closure::remove_nodes(&mut tx, &subtree).await?;

        // deepest first, so no chunk removes a parent before its children
        let mut removed = 0;
        for chunk in subtree.chunks(ID_CHUNK) {
            let sql = format!(
                "DELETE FROM nodes WHERE id IN ({})",
                attributes::placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for node_id in chunk {
                query = query.bind(node_id.get());
            }
            removed += query
                .execute(&mut *tx)
                .await
                .map_err(|e| format!("Failed to delete nodes: {}", e))?
                .rows_affected();
        }

        tx.commit().await?;

        info!(%id, removed, edges, attribute_rows, "subtree deleted");
        Ok(DeletedNode { id, removed })
    }

    /// Clear every table. Returns the cleared table names in deletion order.
    pub async fn node_wipe(&self) -> Result<Vec<String>, NodeError> {
        let _gate = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut tables: Vec<&'static str> = NodeKind::ALL.iter().map(NodeKind::table).collect();
        tables.push("node_closure");
        tables.push("nodes");

        for table in &tables {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(|e| format!("Failed to clear {}: {}", table, e))?;
        }

        tx.commit().await?;

        info!(tables = tables.len(), "all nodes wiped");
        Ok(tables.into_iter().map(String::from).collect())
    }

    /// Store a lifecycle tag verbatim
    pub async fn node_set_status(&self, id: NodeId, status: &str) -> Result<String, NodeError> {
        let _gate = self.writer.lock().await;

        let result = sqlx::query("UPDATE nodes SET data_status = ?, modified_at = ? WHERE id = ?")
            .bind(status)
            .bind(current_timestamp())
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to update status: {}", e))?;

        if result.rows_affected() == 0 {
            return Err(NodeError::node_not_found(id));
        }

        debug!(%id, status, "status updated");
        Ok(status.to_string())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a node by id
    pub async fn node_get(&self, id: NodeId) -> Result<Node, NodeError> {
        let mut conn = self.pool.acquire().await?;
        fetch_node(&mut conn, id).await
    }

    /// Get a node joined with its typed attributes
    ///
    /// Fails with `NotFound` when the node is missing, is of another type, or
    /// has no attribute row.
    pub async fn node_details(&self, id: NodeId, kind: NodeKind) -> Result<NodeDetails, NodeError> {
        let mut conn = self.pool.acquire().await?;

        let node = fetch_node(&mut conn, id).await?;
        if node.kind != kind {
            return Err(NodeError::NotFound(format!(
                "Node {} is a {}, not a {}",
                id, node.kind, kind
            )));
        }

        let payload = NodePayload::load(kind, &mut conn, id)
            .await?
            .ok_or_else(|| NodeError::NotFound(format!("No {} attributes for node {}", kind, id)))?;

        Ok(NodeDetails { node, payload })
    }

    /// List nodes matching a filter, most recently modified first
    pub async fn node_list(&self, filter: NodeFilter, page: Page) -> Result<Vec<Node>, NodeError> {
        let sql = format!(
            "SELECT {} {} ORDER BY n.modified_at DESC, n.id DESC LIMIT ? OFFSET ?",
            NODE_COLUMNS,
            filter_clause(&filter)
        );
        let rows = bind_filter(sqlx::query(&sql), &filter)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to list nodes: {}", e))?;

        debug!(?filter, ?page, found = rows.len(), "nodes listed");
        rows.iter().map(row_to_node).collect()
    }

    /// Count nodes matching a filter
    pub async fn node_count(&self, filter: NodeFilter) -> Result<i64, NodeError> {
        let sql = format!("SELECT COUNT(*) AS total {}", filter_clause(&filter));
        let row = bind_filter(sqlx::query(&sql), &filter)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| format!("Failed to count nodes: {}", e))?;

        Ok(row.try_get("total")?)
    }

    /// Ancestry chain from the root down to `id`, inclusive
    pub async fn node_ancestors(&self, id: NodeId) -> Result<Vec<Node>, NodeError> {
        let sql = format!(
            "SELECT {} FROM node_closure c JOIN nodes n ON n.id = c.ancestor_id
             WHERE c.descendant_id = ? ORDER BY c.depth DESC",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to fetch ancestors: {}", e))?;

        if rows.is_empty() {
            return Err(NodeError::node_not_found(id));
        }
        rows.iter().map(row_to_node).collect()
    }

    /// Closure edges ending at `id`, the self edge first
    pub async fn node_closure(&self, id: NodeId) -> Result<Vec<closure::ClosureEdge>, NodeError> {
        let mut conn = self.pool.acquire().await?;
        closure::edges_to(&mut conn, id).await
    }

    /// Direct children of `parent`, or the roots, ordered by name
    pub async fn node_children(&self, parent: Option<NodeId>) -> Result<Vec<Node>, NodeError> {
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.parent_id IS ? ORDER BY n.name, n.id",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parent.map(NodeId::get))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to fetch children: {}", e))?;

        rows.iter().map(row_to_node).collect()
    }

    /// One page of the hierarchy view: direct children of `parent` (or the
    /// roots) with their own child counts
    pub async fn node_table(
        &self,
        parent: Option<NodeId>,
        page_number: u32,
        page: Page,
    ) -> Result<TablePage, NodeError> {
        let parent_id = parent.map(NodeId::get);

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM nodes WHERE parent_id IS ?")
            .bind(parent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| format!("Failed to count table rows: {}", e))?
            .try_get("total")?;

        let sql = format!(
            "SELECT {}, (SELECT COUNT(*) FROM nodes k WHERE k.parent_id = n.id) AS child_count
             FROM nodes n WHERE n.parent_id IS ?
             ORDER BY n.name, n.id LIMIT ? OFFSET ?",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to fetch table rows: {}", e))?;

        let rows = rows
            .iter()
            .map(|row| {
                Ok(TableRow {
                    node: row_to_node(row)?,
                    child_count: row.try_get("child_count")?,
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;

        Ok(TablePage {
            rows,
            pagination: Pagination::new(total, page_number, page.limit),
        })
    }
}

// ============================================================================
// Row helpers
// ============================================================================

/// `FROM ... WHERE ...` for a filter; binds in the order of [`bind_filter`]
fn filter_clause(filter: &NodeFilter) -> String {
    match (filter.ancestor, filter.depth) {
        (Some(_), Some(_)) => "FROM nodes n JOIN node_closure c ON c.descendant_id = n.id
             WHERE c.ancestor_id = ? AND n.node_type = ? AND c.depth = ?"
            .to_string(),
        (Some(_), None) => "FROM nodes n JOIN node_closure c ON c.descendant_id = n.id
             WHERE c.ancestor_id = ? AND n.node_type = ? AND c.depth > 0"
            .to_string(),
        (None, Some(_)) => "FROM nodes n
             WHERE n.node_type = ?
               AND EXISTS (
                   SELECT 1 FROM node_closure c WHERE c.descendant_id = n.id AND c.depth = ?
               )"
            .to_string(),
        (None, None) => "FROM nodes n WHERE n.node_type = ?".to_string(),
    }
}

fn bind_filter<'q>(query: SqliteQuery<'q>, filter: &NodeFilter) -> SqliteQuery<'q> {
    let query = match filter.ancestor {
        Some(ancestor) => query.bind(ancestor.get()),
        None => query,
    };
    let query = query.bind(filter.kind.as_str());
    match filter.depth {
        Some(depth) => query.bind(i64::from(depth)),
        None => query,
    }
}

fn row_to_node(row: &SqliteRow) -> Result<Node, NodeError> {
    let node_type: String = row.try_get("node_type")?;
    let parent_id: Option<i64> = row.try_get("parent_id")?;

    Ok(Node {
        id: NodeId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        kind: node_type.parse().map_err(|_| {
            NodeError::Storage(format!("Unknown node type in database: {}", node_type))
        })?,
        parent_id: parent_id.map(NodeId::new),
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
        data_status: row.try_get("data_status")?,
        description: row.try_get("description")?,
    })
}

async fn fetch_node(conn: &mut SqliteConnection, id: NodeId) -> Result<Node, NodeError> {
    let sql = format!("SELECT {} FROM nodes n WHERE n.id = ?", NODE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| format!("Failed to fetch node: {}", e))?
        .ok_or_else(|| NodeError::node_not_found(id))?;

    row_to_node(&row)
}

async fn touch(conn: &mut SqliteConnection, id: NodeId, now: i64) -> Result<(), NodeError> {
    sqlx::query("UPDATE nodes SET modified_at = ? WHERE id = ?")
        .bind(now)
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to touch node: {}", e))?;
    Ok(())
}

/// Current Unix timestamp in milliseconds
pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
