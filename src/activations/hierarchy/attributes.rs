//! Typed side tables
//!
//! Every node type keeps its own attributes in a table keyed 1:1 by node id.
//! [`Attributes`] describes one such table; [`NodePayload`] is the tagged
//! union the repository dispatches on.

use super::types::{NodeError, NodeId, NodeKind};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Max ids bound into a single `IN (...)` list
pub(crate) const ID_CHUNK: usize = 500;

/// Side-table DDL, one table per [`NodeKind`]
pub(crate) const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS client_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        country TEXT,
        city TEXT,
        contact_name TEXT,
        contact_email TEXT
    );

    CREATE TABLE IF NOT EXISTS order_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        reference TEXT,
        ordered_on TEXT,
        deadline TEXT,
        commercial_contact TEXT
    );

    CREATE TABLE IF NOT EXISTS part_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        designation TEXT NOT NULL,
        reference TEXT,
        quantity INTEGER,
        mass_kg REAL,
        shape TEXT
    );

    CREATE TABLE IF NOT EXISTS steel_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        grade TEXT NOT NULL,
        standard TEXT,
        family TEXT,
        equivalents TEXT NOT NULL DEFAULT '[]',
        chemistry TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS trial_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        code TEXT NOT NULL,
        load_number TEXT,
        process TEXT,
        trial_date TEXT,
        recipe TEXT
    );

    CREATE TABLE IF NOT EXISTS file_attributes (
        node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
        file_name TEXT NOT NULL,
        mime_type TEXT,
        size_bytes INTEGER,
        category TEXT,
        storage_key TEXT
    );
"#;

/// A type-specific attribute record stored in its own side table
pub trait Attributes: Sized {
    const KIND: NodeKind;
    const TABLE: &'static str;
    /// Columns besides `node_id`, in binding order
    const COLUMNS: &'static [&'static str];

    /// Bind one value per entry of [`Self::COLUMNS`], in order
    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError>;

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError>;
}

// ============================================================================
// Per-type records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientAttributes {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
}

impl Attributes for ClientAttributes {
    const KIND: NodeKind = NodeKind::Client;
    const TABLE: &'static str = "client_attributes";
    const COLUMNS: &'static [&'static str] = &["country", "city", "contact_name", "contact_email"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        Ok(query
            .bind(self.country.as_deref())
            .bind(self.city.as_deref())
            .bind(self.contact_name.as_deref())
            .bind(self.contact_email.as_deref()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        Ok(Self {
            country: row.try_get("country")?,
            city: row.try_get("city")?,
            contact_name: row.try_get("contact_name")?,
            contact_email: row.try_get("contact_email")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderAttributes {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub ordered_on: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub commercial_contact: Option<String>,
}

impl Attributes for OrderAttributes {
    const KIND: NodeKind = NodeKind::Order;
    const TABLE: &'static str = "order_attributes";
    const COLUMNS: &'static [&'static str] =
        &["reference", "ordered_on", "deadline", "commercial_contact"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        Ok(query
            .bind(self.reference.as_deref())
            .bind(self.ordered_on)
            .bind(self.deadline)
            .bind(self.commercial_contact.as_deref()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        Ok(Self {
            reference: row.try_get("reference")?,
            ordered_on: row.try_get("ordered_on")?,
            deadline: row.try_get("deadline")?,
            commercial_contact: row.try_get("commercial_contact")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartAttributes {
    pub designation: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub mass_kg: Option<f64>,
    #[serde(default)]
    pub shape: Option<String>,
}

impl Attributes for PartAttributes {
    const KIND: NodeKind = NodeKind::Part;
    const TABLE: &'static str = "part_attributes";
    const COLUMNS: &'static [&'static str] =
        &["designation", "reference", "quantity", "mass_kg", "shape"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        Ok(query
            .bind(self.designation.as_str())
            .bind(self.reference.as_deref())
            .bind(self.quantity)
            .bind(self.mass_kg)
            .bind(self.shape.as_deref()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        Ok(Self {
            designation: row.try_get("designation")?,
            reference: row.try_get("reference")?,
            quantity: row.try_get("quantity")?,
            mass_kg: row.try_get("mass_kg")?,
            shape: row.try_get("shape")?,
        })
    }
}

/// Steel grade. `chemistry` maps element symbols to mass percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SteelAttributes {
    pub grade: String,
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub equivalents: Vec<String>,
    #[serde(default)]
    pub chemistry: BTreeMap<String, f64>,
}

impl Attributes for SteelAttributes {
    const KIND: NodeKind = NodeKind::Steel;
    const TABLE: &'static str = "steel_attributes";
    const COLUMNS: &'static [&'static str] =
        &["grade", "standard", "family", "equivalents", "chemistry"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        let equivalents = serde_json::to_string(&self.equivalents)?;
        let chemistry = serde_json::to_string(&self.chemistry)?;
        Ok(query
            .bind(self.grade.as_str())
            .bind(self.standard.as_deref())
            .bind(self.family.as_deref())
            .bind(equivalents)
            .bind(chemistry))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        let equivalents: String = row.try_get("equivalents")?;
        let chemistry: String = row.try_get("chemistry")?;
        Ok(Self {
            grade: row.try_get("grade")?,
            standard: row.try_get("standard")?,
            family: row.try_get("family")?,
            equivalents: serde_json::from_str(&equivalents)?,
            chemistry: serde_json::from_str(&chemistry)?,
        })
    }
}

/// Heat-treatment trial. `recipe` is the cycle definition, kept opaque here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrialAttributes {
    pub code: String,
    #[serde(default)]
    pub load_number: Option<String>,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub trial_date: Option<NaiveDate>,
    #[serde(default)]
    pub recipe: Option<Value>,
}

impl Attributes for TrialAttributes {
    const KIND: NodeKind = NodeKind::Trial;
    const TABLE: &'static str = "trial_attributes";
    const COLUMNS: &'static [&'static str] =
        &["code", "load_number", "process", "trial_date", "recipe"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        let recipe = self
            .recipe
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(query
            .bind(self.code.as_str())
            .bind(self.load_number.as_deref())
            .bind(self.process.as_deref())
            .bind(self.trial_date)
            .bind(recipe))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        let recipe: Option<String> = row.try_get("recipe")?;
        Ok(Self {
            code: row.try_get("code")?,
            load_number: row.try_get("load_number")?,
            process: row.try_get("process")?,
            trial_date: row.try_get("trial_date")?,
            recipe: recipe.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }
}

/// Result file metadata. The bytes live elsewhere, under `storage_key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub storage_key: Option<String>,
}

impl Attributes for FileAttributes {
    const KIND: NodeKind = NodeKind::File;
    const TABLE: &'static str = "file_attributes";
    const COLUMNS: &'static [&'static str] =
        &["file_name", "mime_type", "size_bytes", "category", "storage_key"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>, NodeError> {
        Ok(query
            .bind(self.file_name.as_str())
            .bind(self.mime_type.as_deref())
            .bind(self.size_bytes)
            .bind(self.category.as_deref())
            .bind(self.storage_key.as_deref()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, NodeError> {
        Ok(Self {
            file_name: row.try_get("file_name")?,
            mime_type: row.try_get("mime_type")?,
            size_bytes: row.try_get("size_bytes")?,
            category: row.try_get("category")?,
            storage_key: row.try_get("storage_key")?,
        })
    }
}

// ============================================================================
// Tagged payload
// ============================================================================

/// Typed attributes of a node, tagged with the node type
///
/// Serializes as `{"type": "part", "attributes": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "attributes", rename_all = "snake_case")]
pub enum NodePayload {
    Client(ClientAttributes),
    Order(OrderAttributes),
    Part(PartAttributes),
    Steel(SteelAttributes),
    Trial(TrialAttributes),
    File(FileAttributes),
}

impl NodePayload {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Client(_) => NodeKind::Client,
            NodePayload::Order(_) => NodeKind::Order,
            NodePayload::Part(_) => NodeKind::Part,
            NodePayload::Steel(_) => NodeKind::Steel,
            NodePayload::Trial(_) => NodeKind::Trial,
            NodePayload::File(_) => NodeKind::File,
        }
    }

    pub(crate) async fn insert(
        &self,
        conn: &mut SqliteConnection,
        node_id: NodeId,
    ) -> Result<(), NodeError> {
        match self {
            NodePayload::Client(a) => insert_row(conn, node_id, a).await,
            NodePayload::Order(a) => insert_row(conn, node_id, a).await,
            NodePayload::Part(a) => insert_row(conn, node_id, a).await,
            NodePayload::Steel(a) => insert_row(conn, node_id, a).await,
            NodePayload::Trial(a) => insert_row(conn, node_id, a).await,
            NodePayload::File(a) => insert_row(conn, node_id, a).await,
        }
    }

    pub(crate) async fn update(
        &self,
        conn: &mut SqliteConnection,
        node_id: NodeId,
    ) -> Result<(), NodeError> {
        match self {
            NodePayload::Client(a) => update_row(conn, node_id, a).await,
            NodePayload::Order(a) => update_row(conn, node_id, a).await,
            NodePayload::Part(a) => update_row(conn, node_id, a).await,
            NodePayload::Steel(a) => update_row(conn, node_id, a).await,
            NodePayload::Trial(a) => update_row(conn, node_id, a).await,
            NodePayload::File(a) => update_row(conn, node_id, a).await,
        }
    }

    /// Load the side-table row of a node of the given kind
    pub(crate) async fn load(
        kind: NodeKind,
        conn: &mut SqliteConnection,
        node_id: NodeId,
    ) -> Result<Option<NodePayload>, NodeError> {
        Ok(match kind {
            NodeKind::Client => load_row(conn, node_id).await?.map(NodePayload::Client),
            NodeKind::Order => load_row(conn, node_id).await?.map(NodePayload::Order),
            NodeKind::Part => load_row(conn, node_id).await?.map(NodePayload::Part),
            NodeKind::Steel => load_row(conn, node_id).await?.map(NodePayload::Steel),
            NodeKind::Trial => load_row(conn, node_id).await?.map(NodePayload::Trial),
            NodeKind::File => load_row(conn, node_id).await?.map(NodePayload::File),
        })
    }
}

impl NodeKind {
    /// Side table holding attributes of this kind
    pub fn table(&self) -> &'static str {
        match self {
            NodeKind::Client => ClientAttributes::TABLE,
            NodeKind::Order => OrderAttributes::TABLE,
            NodeKind::Part => PartAttributes::TABLE,
            NodeKind::Steel => SteelAttributes::TABLE,
            NodeKind::Trial => TrialAttributes::TABLE,
            NodeKind::File => FileAttributes::TABLE,
        }
    }
}

macro_rules! payload_from {
    ($($attrs:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$attrs> for NodePayload {
                fn from(attrs: $attrs) -> Self {
                    NodePayload::$variant(attrs)
                }
            }
        )*
    };
}

payload_from! {
    ClientAttributes => Client,
    OrderAttributes => Order,
    PartAttributes => Part,
    SteelAttributes => Steel,
    TrialAttributes => Trial,
    FileAttributes => File,
}

// ============================================================================
// Generic row access
// ============================================================================

fn insert_sql<A: Attributes>() -> String {
    format!(
        "INSERT INTO {} (node_id, {}) VALUES (?{})",
        A::TABLE,
        A::COLUMNS.join(", "),
        ", ?".repeat(A::COLUMNS.len())
    )
}

fn update_sql<A: Attributes>() -> String {
    let assignments: Vec<String> = A::COLUMNS.iter().map(|c| format!("{} = ?", c)).collect();
    format!(
        "UPDATE {} SET {} WHERE node_id = ?",
        A::TABLE,
        assignments.join(", ")
    )
}

fn select_sql<A: Attributes>() -> String {
    format!(
        "SELECT node_id, {} FROM {} WHERE node_id = ?",
        A::COLUMNS.join(", "),
        A::TABLE
    )
}

async fn insert_row<A: Attributes>(
    conn: &mut SqliteConnection,
    node_id: NodeId,
    attrs: &A,
) -> Result<(), NodeError> {
    let sql = insert_sql::<A>();
    attrs
        .bind(sqlx::query(&sql).bind(node_id.get()))?
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to insert {} attributes: {}", A::KIND, e))?;
    Ok(())
}

async fn update_row<A: Attributes>(
    conn: &mut SqliteConnection,
    node_id: NodeId,
    attrs: &A,
) -> Result<(), NodeError> {
    let sql = update_sql::<A>();
    let result = attrs
        .bind(sqlx::query(&sql))?
        .bind(node_id.get())
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to update {} attributes: {}", A::KIND, e))?;

    if result.rows_affected() == 0 {
        return Err(NodeError::NotFound(format!(
            "No {} attributes for node {}",
            A::KIND,
            node_id
        )));
    }
    Ok(())
}

async fn load_row<A: Attributes>(
    conn: &mut SqliteConnection,
    node_id: NodeId,
) -> Result<Option<A>, NodeError> {
    let sql = select_sql::<A>();
    let row = sqlx::query(&sql)
        .bind(node_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| format!("Failed to fetch {} attributes: {}", A::KIND, e))?;

    row.as_ref().map(A::from_row).transpose()
}

/// Delete the side-table rows of every listed node, whatever its kind
pub(crate) async fn delete_for_nodes(
    conn: &mut SqliteConnection,
    ids: &[NodeId],
) -> Result<u64, NodeError> {
    let mut removed = 0;
    for kind in NodeKind::ALL {
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE node_id IN ({})",
                kind.table(),
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.get());
            }
            removed += query
                .execute(&mut *conn)
                .await
                .map_err(|e| format!("Failed to delete {} attributes: {}", kind, e))?
                .rows_affected();
        }
    }
    Ok(removed)
}

/// `?, ?, ?` with `n` markers
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_sql_matches_columns() {
        assert_eq!(
            insert_sql::<ClientAttributes>(),
            "INSERT INTO client_attributes (node_id, country, city, contact_name, contact_email) VALUES (?, ?, ?, ?, ?)"
        );
        assert_eq!(
            update_sql::<PartAttributes>(),
            "UPDATE part_attributes SET designation = ?, reference = ?, quantity = ?, mass_kg = ?, shape = ? WHERE node_id = ?"
        );
        assert_eq!(
            select_sql::<FileAttributes>(),
            "SELECT node_id, file_name, mime_type, size_bytes, category, storage_key FROM file_attributes WHERE node_id = ?"
        );
    }

    #[test]
    fn test_every_kind_has_a_table_in_schema() {
        for kind in NodeKind::ALL {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} (", kind.table());
            assert!(SCHEMA.contains(&ddl), "missing side table for {}", kind);
        }
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = NodePayload::from(PartAttributes {
            designation: "Gear".to_string(),
            quantity: Some(12),
            ..Default::default()
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "part");
        assert_eq!(value["attributes"]["designation"], "Gear");
        assert_eq!(value["attributes"]["quantity"], 12);

        let parsed: NodePayload = serde_json::from_value(json!({
            "type": "steel",
            "attributes": { "grade": "42CrMo4", "chemistry": { "C": 0.42, "Cr": 1.05 } }
        }))
        .unwrap();
        assert_eq!(parsed.kind(), NodeKind::Steel);
        match parsed {
            NodePayload::Steel(steel) => {
                assert_eq!(steel.grade, "42CrMo4");
                assert!(steel.equivalents.is_empty());
                assert_eq!(steel.chemistry.get("Cr"), Some(&1.05));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
