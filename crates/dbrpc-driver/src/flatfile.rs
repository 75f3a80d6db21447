use crate::backend::{no_database, DriverBackend, ResultSet, RowId};
use crate::store::{Database, Table};
use dbrpc_core::error::RpcError;
use dbrpc_core::types::{DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const TABLE_SUFFIX: &str = ".table.json";
const INDEX_FILE: &str = "indexes.json";

/// One directory per database under the workspace, one JSON file per
/// table. Every change is written through before the call returns.
/// Cursors are forward-only.
#[derive(Debug)]
pub struct FlatFileBackend {
    root: PathBuf,
    current: Option<OpenDatabase>,
}

#[derive(Debug)]
struct OpenDatabase {
    dir: PathBuf,
    db: Database,
}

fn backend_io(path: &Path, err: impl std::fmt::Display) -> RpcError {
    RpcError::Backend(format!("{}: {err}", path.display()))
}

fn check_name(kind: &str, name: &str) -> Result<(), RpcError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(RpcError::Backend(format!("invalid {kind} name: {name:?}")));
    }
    Ok(())
}

impl FlatFileBackend {
    /// Fails when the workspace directory is missing, which the driver
    /// reports as an initialization failure.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RpcError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(RpcError::Backend(format!(
                "workspace {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root, current: None })
    }

    fn location_dir(&self, location: &str) -> Result<PathBuf, RpcError> {
        let mut dir = self.root.clone();
        for part in location.split('/').filter(|p| !p.is_empty()) {
            check_name("location", part)?;
            dir.push(part);
        }
        Ok(dir)
    }

    fn database_dir(&self, handle: &DatabaseHandle) -> Result<PathBuf, RpcError> {
        check_name("database", &handle.name)?;
        Ok(self.location_dir(&handle.location)?.join(&handle.name))
    }

    fn db(&self) -> Result<&Database, RpcError> {
        self.current.as_ref().map(|open| &open.db).ok_or_else(no_database)
    }

    /// Apply `change` to a copy of the open database, write the touched
    /// tables and, if asked, the index file, then swap the copy in. A failed
    /// change or write leaves the open database as it was.
    fn commit<T>(
        &mut self,
        tables: &[&str],
        indexes: bool,
        change: impl FnOnce(&mut Database) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let open = self.current.as_mut().ok_or_else(no_database)?;
        let mut next = open.db.clone();
        let out = change(&mut next)?;
        for table in tables {
            persist_table(&open.dir, &next, table)?;
        }
        if indexes {
            write_json(&open.dir.join(INDEX_FILE), &next.indexes)?;
        }
        open.db = next;
        Ok(out)
    }

    /// JSON has no spelling for NaN or the infinities.
    fn check_finite<'a>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (usize, &'a Value)>,
    ) -> Result<(), RpcError> {
        for (column, value) in values {
            let Value::Double(v) = value else { continue };
            if !v.is_finite() {
                let descriptor = self.db()?.describe_table(table)?;
                let name = descriptor
                    .column(column)
                    .map_or_else(|| format!("#{column}"), |c| c.name.clone());
                return Err(RpcError::Backend(format!(
                    "column {name} of {table} cannot store {v} in a flat file"
                )));
            }
        }
        Ok(())
    }
}

/// Write `table` back, or remove its file once it no longer exists.
fn persist_table(dir: &Path, db: &Database, table: &str) -> Result<(), RpcError> {
    let path = dir.join(format!("{table}{TABLE_SUFFIX}"));
    match db.tables.get(table) {
        Some(data) => write_json(&path, data),
        None => match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(backend_io(&path, err)),
        },
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), RpcError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| backend_io(path, e))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| backend_io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| backend_io(path, e))?;
    debug!(path = %path.display(), "wrote");
    Ok(())
}

fn load_database(dir: &Path) -> Result<Database, RpcError> {
    let mut db = Database::new();
    let entries = fs::read_dir(dir).map_err(|e| backend_io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| backend_io(dir, e))?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(table_name) = file_name.strip_suffix(TABLE_SUFFIX) {
            let raw = fs::read(&path).map_err(|e| backend_io(&path, e))?;
            let mut table: Table = serde_json::from_slice(&raw).map_err(|e| backend_io(&path, e))?;
            table.normalize()?;
            db.tables.insert(table_name.to_string(), table);
        }
    }
    let index_path = dir.join(INDEX_FILE);
    if index_path.exists() {
        let raw = fs::read(&index_path).map_err(|e| backend_io(&index_path, e))?;
        let indexes: BTreeMap<String, IndexInfo> =
            serde_json::from_slice(&raw).map_err(|e| backend_io(&index_path, e))?;
        db.indexes = indexes;
    }
    Ok(db)
}

impl DriverBackend for FlatFileBackend {
    fn name(&self) -> &'static str {
        "flatfile"
    }

    fn supports_scrolling(&self) -> bool {
        false
    }

    fn list_databases(&self, location: &str) -> Result<Vec<String>, RpcError> {
        let dir = self.location_dir(location)?;
        let entries = fs::read_dir(&dir).map_err(|e| backend_io(&dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| backend_io(&dir, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        let dir = self.database_dir(handle)?;
        if dir.exists() {
            return Err(RpcError::Backend(format!("database already exists: {}", handle.name)));
        }
        fs::create_dir_all(&dir).map_err(|e| backend_io(&dir, e))
    }

    fn open_database(&mut self, handle: &DatabaseHandle) -> Result<(), RpcError> {
        let dir = self.database_dir(handle)?;
        if !dir.is_dir() {
            return Err(RpcError::Backend(format!("no such database: {}", handle.name)));
        }
        let db = load_database(&dir)?;
        debug!(dir = %dir.display(), tables = db.tables.len(), "opened database");
        self.current = Some(OpenDatabase { dir, db });
        Ok(())
    }

    fn close_database(&mut self) -> Result<(), RpcError> {
        self.current.take().map(|_| ()).ok_or_else(no_database)
    }

    fn list_tables(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.db()?.list_tables())
    }

    fn describe_table(&self, table: &str) -> Result<RowDescriptor, RpcError> {
        self.db()?.describe_table(table)
    }

    fn create_table(&mut self, definition: &TableDefinition) -> Result<(), RpcError> {
        check_name("table", &definition.name)?;
        self.commit(&[definition.name.as_str()], false, |db| db.create_table(definition))
    }

    fn drop_table(&mut self, table: &str) -> Result<(), RpcError> {
        self.commit(&[table], true, |db| db.drop_table(table))
    }

    fn num_rows(&self, table: &str) -> Result<i64, RpcError> {
        self.db()?.num_rows(table)
    }

    fn select(&self, table: &str) -> Result<ResultSet, RpcError> {
        self.db()?.select(table)
    }

    fn insert_row(&mut self, table: &str, row: Row) -> Result<RowId, RpcError> {
        self.check_finite(table, row.values.iter().enumerate())?;
        self.commit(&[table], false, |db| db.insert_row(table, row))
    }

    fn update_row(&mut self, table: &str, id: RowId, values: &[(usize, Value)]) -> Result<(), RpcError> {
        self.check_finite(table, values.iter().map(|(column, value)| (*column, value)))?;
        self.commit(&[table], false, |db| db.update_row(table, id, values))
    }

    fn delete_row(&mut self, table: &str, id: RowId) -> Result<(), RpcError> {
        self.commit(&[table], false, |db| db.delete_row(table, id))
    }

    fn create_index(&mut self, index: &IndexInfo) -> Result<(), RpcError> {
        self.commit(&[], true, |db| db.create_index(index))
    }

    fn drop_index(&mut self, name: &str) -> Result<(), RpcError> {
        self.commit(&[], true, |db| db.drop_index(name))
    }

    fn list_indexes(&self, table: &str) -> Result<Vec<IndexInfo>, RpcError> {
        self.db()?.list_indexes(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrpc_core::types::{Column, ColumnType};
    use tempfile::TempDir;

    fn wells() -> TableDefinition {
        TableDefinition {
            name: "wells".into(),
            descriptor: RowDescriptor::new(vec![
                Column::new("cat", ColumnType::Integer).not_null(),
                Column::new("depth", ColumnType::Double),
            ]),
        }
    }

    #[test]
    fn missing_workspace_fails_to_open() {
        let dir = TempDir::new().expect("tempdir");
        assert!(FlatFileBackend::open(dir.path().join("missing")).is_err());
    }

    #[test]
    fn changes_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let handle = DatabaseHandle::new("hydro").at("region1");
        let mut backend = FlatFileBackend::open(dir.path()).expect("open");
        backend.create_database(&handle).expect("create db");
        backend.open_database(&handle).expect("open db");
        backend.create_table(&wells()).expect("create table");
        backend
            .insert_row("wells", Row::new(vec![Value::Integer(1), Value::Double(12.5)]))
            .expect("insert");
        let id = backend
            .insert_row("wells", Row::new(vec![Value::Integer(2), Value::Double(3.0)]))
            .expect("insert");
        backend
            .update_row("wells", id, &[(1, Value::Double(40.0))])
            .expect("update");
        backend
            .create_index(&IndexInfo {
                name: "wells_cat".into(),
                table: "wells".into(),
                unique: true,
                columns: vec!["cat".into()],
            })
            .expect("index");
        drop(backend);

        let mut reopened = FlatFileBackend::open(dir.path()).expect("open");
        assert_eq!(reopened.list_databases("region1").expect("dbs"), vec!["hydro"]);
        reopened.open_database(&handle).expect("open db");
        assert_eq!(reopened.num_rows("wells").expect("count"), 2);
        let rows = reopened.select("wells").expect("select").rows;
        assert_eq!(rows[1].1.values[1], Value::Double(40.0));
        assert_eq!(reopened.list_indexes("wells").expect("indexes").len(), 1);
        // Row ids keep counting after reload.
        let next = reopened
            .insert_row("wells", Row::new(vec![Value::Integer(3), Value::Null]))
            .expect("insert");
        assert!(next > id);
    }

    #[test]
    fn drop_table_removes_its_file() {
        let dir = TempDir::new().expect("tempdir");
        let handle = DatabaseHandle::new("db");
        let mut backend = FlatFileBackend::open(dir.path()).expect("open");
        backend.create_database(&handle).expect("create db");
        backend.open_database(&handle).expect("open db");
        backend.create_table(&wells()).expect("create");
        let file = dir.path().join("db").join("wells.table.json");
        assert!(file.exists());
        backend.drop_table("wells").expect("drop");
        assert!(!file.exists());
    }

    #[test]
    fn failed_write_leaves_the_open_database_unchanged() {
        let dir = TempDir::new().expect("tempdir");
        let handle = DatabaseHandle::new("db");
        let mut backend = FlatFileBackend::open(dir.path()).expect("open");
        backend.create_database(&handle).expect("create db");
        backend.open_database(&handle).expect("open db");
        backend.create_table(&wells()).expect("create");
        fs::remove_dir_all(dir.path().join("db")).expect("remove db dir");

        let row = Row::new(vec![Value::Integer(1), Value::Double(2.0)]);
        assert!(matches!(
            backend.insert_row("wells", row),
            Err(RpcError::Backend(_))
        ));
        assert_eq!(backend.num_rows("wells").expect("count"), 0);
        assert!(backend.drop_table("wells").is_err());
        assert_eq!(backend.list_tables().expect("tables"), vec!["wells"]);
    }

    #[test]
    fn non_finite_doubles_are_refused_and_the_file_stays_readable() {
        let dir = TempDir::new().expect("tempdir");
        let handle = DatabaseHandle::new("db");
        let mut backend = FlatFileBackend::open(dir.path()).expect("open");
        backend.create_database(&handle).expect("create db");
        backend.open_database(&handle).expect("open db");
        backend.create_table(&wells()).expect("create");

        let err = backend
            .insert_row("wells", Row::new(vec![Value::Integer(1), Value::Double(f64::INFINITY)]))
            .expect_err("infinity");
        assert!(err.to_string().contains("depth"));
        assert!(err.is_recoverable());
        let id = backend
            .insert_row("wells", Row::new(vec![Value::Integer(2), Value::Double(5.0)]))
            .expect("finite insert");
        assert!(backend
            .update_row("wells", id, &[(1, Value::Double(f64::NAN))])
            .is_err());
        drop(backend);

        let mut reopened = FlatFileBackend::open(dir.path()).expect("open");
        reopened.open_database(&handle).expect("reopen db");
        assert_eq!(reopened.num_rows("wells").expect("count"), 1);
        let rows = reopened.select("wells").expect("select").rows;
        assert_eq!(rows[0].1.values[1], Value::Double(5.0));
    }

    #[test]
    fn names_cannot_escape_the_workspace() {
        let dir = TempDir::new().expect("tempdir");
        let mut backend = FlatFileBackend::open(dir.path()).expect("open");
        assert!(backend
            .create_database(&DatabaseHandle::new("..").at(""))
            .is_err());
        assert!(backend
            .create_database(&DatabaseHandle::new("ok").at("../up"))
            .is_err());
    }
}
