use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow_schema::{Schema, SchemaRef};
use qrx_common::{QrxError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One registered table: a logical name mapped to a partition-tree root on
/// disk, with an optional declared schema. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Logical table name referenced from SQL.
    pub name: String,
    /// Root directory of the `k=v` partition tree.
    pub root: String,

    #[serde(default)]
    pub schema: Option<Schema>,

    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            schema: None,
            options: HashMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }

    pub fn schema_ref(&self) -> Option<SchemaRef> {
        self.schema.clone().map(Arc::new)
    }
}

/// Name-to-table mapping shared by every engine call.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn register_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| QrxError::UnknownTable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            serde_json::from_str(&s).map_err(|e| QrxError::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    pub fn load_from_toml(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            toml::from_str(&s).map_err(|e| QrxError::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    /// Load a catalog file, dispatching on the `.json`/`.toml` extension.
    pub fn load(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_from_json(path),
            Some("toml") => Self::load_from_toml(path),
            Some(other) => Err(QrxError::InvalidConfig(format!(
                "unsupported catalog extension '.{other}'; use .json or .toml"
            ))),
            None => Err(QrxError::InvalidConfig(
                "catalog path must include extension .json or .toml".to_string(),
            )),
        }
    }

    fn from_tables(tables: Vec<TableDef>) -> Result<Self> {
        let mut cat = Catalog::new();
        for t in tables {
            if t.root.is_empty() {
                return Err(QrxError::InvalidConfig(format!(
                    "table '{}' must define a root directory",
                    t.name
                )));
            }
            cat.register_table(t);
        }
        Ok(cat)
    }

    /// Registered tables, sorted by name.
    pub fn tables(&self) -> Vec<TableDef> {
        let mut v = self.tables.values().cloned().collect::<Vec<_>>();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn save_to_json(&self, path: &str) -> Result<()> {
        let payload = serde_json::to_string_pretty(&CatalogFile::Wrapped {
            tables: self.tables(),
        })
        .map_err(|e| QrxError::InvalidConfig(format!("catalog json encode failed: {e}")))?;
        write_atomically(path, payload.as_bytes())
    }

    pub fn save_to_toml(&self, path: &str) -> Result<()> {
        let payload = toml::to_string_pretty(&CatalogFile::Wrapped {
            tables: self.tables(),
        })
        .map_err(|e| QrxError::InvalidConfig(format!("catalog toml encode failed: {e}")))?;
        write_atomically(path, payload.as_bytes())
    }

    pub fn save(&self, path: &str) -> Result<()> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => self.save_to_json(path),
            Some("toml") => self.save_to_toml(path),
            Some(other) => Err(QrxError::InvalidConfig(format!(
                "unsupported catalog extension '.{other}'; use .json or .toml"
            ))),
            None => Err(QrxError::InvalidConfig(
                "catalog path must include extension .json or .toml".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    TableList(Vec<TableDef>),
    Wrapped { tables: Vec<TableDef> },
}

impl CatalogFile {
    fn into_tables(self) -> Vec<TableDef> {
        match self {
            Self::TableList(tables) => tables,
            Self::Wrapped { tables } => tables,
        }
    }
}

// Stage next to the target, then rename over it, so readers never observe a
// half-written catalog.
fn write_atomically(path: &str, content: &[u8]) -> Result<()> {
    let target = PathBuf::from(path);
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = dir.join(format!(".catalog-{unique}.tmp"));
    fs::write(&tmp, content)?;
    if let Err(e) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        return Err(QrxError::InvalidConfig(format!(
            "failed to commit catalog to {}: {e}",
            target.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field, Schema};
    use qrx_common::QrxError;

    use super::{Catalog, TableDef};

    #[test]
    fn loads_catalog_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");
        let payload = r#"[{"name":"sales","root":"/data/sales"}]"#;
        std::fs::write(&path, payload).expect("write json");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load json");
        let table = catalog.get("sales").expect("table exists");
        assert_eq!(table.root, "/data/sales");
        assert!(table.schema.is_none());
    }

    #[test]
    fn loads_catalog_from_toml_wrapped_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.toml");
        let payload = r#"
            [[tables]]
            name = "events"
            root = "/data/events"
        "#;
        std::fs::write(&path, payload).expect("write toml");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load toml");
        assert!(catalog.contains("events"));
    }

    #[test]
    fn unknown_table_lookup_fails() {
        let catalog = Catalog::new();
        let err = catalog.get("missing").expect_err("unknown");
        assert!(matches!(err, QrxError::UnknownTable(t) if t == "missing"));
    }

    #[test]
    fn rejects_table_without_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"[{"name":"t","root":""}]"#).expect("write json");
        let err = Catalog::load(path.to_str().expect("path utf8")).expect_err("no root");
        assert!(matches!(err, QrxError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn save_and_reload_round_trips_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");

        let mut catalog = Catalog::new();
        catalog.register_table(
            TableDef::new("sales", "/data/sales").with_schema(Schema::new(vec![
                Field::new("date", DataType::Date32, false),
                Field::new("amount", DataType::Float64, true),
            ])),
        );
        catalog.save(path.to_str().expect("path utf8")).expect("save");

        let reloaded = Catalog::load(path.to_str().expect("path utf8")).expect("reload");
        let table = reloaded.get("sales").expect("table");
        assert_eq!(table.schema.as_ref().map(|s| s.fields().len()), Some(2));
    }
}
