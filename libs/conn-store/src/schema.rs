//! Mapping-driven schema builder (§4.F): the `connections` table is declared
//! once as a column list and the `CREATE TABLE` / upsert SQL are derived
//! from it, rather than hand-written and kept in sync by hand.

/// SQL storage classes the builder can emit. Sqlite only really
/// distinguishes storage classes at the type-affinity level, but the
/// declared width/variant still documents intent for anyone reading the
/// schema.
#[derive(Debug, Clone, Copy)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Varchar(u16),
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(width) => format!("VARCHAR({width})"),
            SqlType::Blob => "BLOB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

pub const CONNECTIONS_TABLE: &str = "connections";

/// Declaration of the `Connection` entity (`intel_model::connection::Connection`):
/// field names, declared widths, nullability, and primary key.
pub const CONNECTION_COLUMNS: &[Column] = &[
    Column { name: "id", sql_type: SqlType::Varchar(64), nullable: false, primary_key: true },
    Column { name: "kind", sql_type: SqlType::Text, nullable: false, primary_key: false },
    Column { name: "ip_version", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "protocol", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "local_ip", sql_type: SqlType::Text, nullable: false, primary_key: false },
    Column { name: "local_port", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "remote_ip", sql_type: SqlType::Text, nullable: false, primary_key: false },
    Column { name: "remote_port", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "domain", sql_type: SqlType::Text, nullable: true, primary_key: false },
    Column { name: "country", sql_type: SqlType::Varchar(2), nullable: true, primary_key: false },
    Column { name: "asn", sql_type: SqlType::Integer, nullable: true, primary_key: false },
    Column { name: "as_owner", sql_type: SqlType::Text, nullable: true, primary_key: false },
    Column { name: "latitude", sql_type: SqlType::Real, nullable: true, primary_key: false },
    Column { name: "longitude", sql_type: SqlType::Real, nullable: true, primary_key: false },
    Column { name: "scope", sql_type: SqlType::Text, nullable: false, primary_key: false },
    Column { name: "verdict", sql_type: SqlType::Text, nullable: false, primary_key: false },
    Column { name: "started", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "ended", sql_type: SqlType::Integer, nullable: true, primary_key: false },
    Column { name: "tunneled", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "encrypted", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "internal", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "inbound", sql_type: SqlType::Integer, nullable: false, primary_key: false },
    Column { name: "extra_data", sql_type: SqlType::Text, nullable: false, primary_key: false },
];

pub fn create_table_sql(table: &str, columns: &[Column]) -> String {
    let body: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
            if column.primary_key {
                def.push_str(" PRIMARY KEY");
            } else if !column.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    format!("CREATE TABLE IF NOT EXISTS {table} ({})", body.join(", "))
}

/// `INSERT … ON CONFLICT(id) DO UPDATE SET <each column>` (§4.F "Save").
/// Parameter names mirror the column names so the generated SQL reads as
/// named parameters even though sqlx binds them positionally.
pub fn upsert_sql(table: &str, columns: &[Column]) -> String {
    let primary_key = columns
        .iter()
        .find(|column| column.primary_key)
        .expect("schema requires a primary key column")
        .name;

    let names: Vec<&str> = columns.iter().map(|column| column.name).collect();
    let placeholders: Vec<String> = names.iter().map(|name| format!(":{name}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|column| !column.primary_key)
        .map(|column| format!("{0} = excluded.{0}", column.name))
        .collect();

    format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals}) ON CONFLICT({primary_key}) DO UPDATE SET {updates}",
        cols = names.join(", "),
        vals = placeholders.join(", "),
        updates = updates.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_sql_marks_primary_key_and_not_null() {
        let sql = create_table_sql(CONNECTIONS_TABLE, CONNECTION_COLUMNS);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS connections ("));
        assert!(sql.contains("id VARCHAR(64) PRIMARY KEY"));
        assert!(sql.contains("started INTEGER NOT NULL"));
        assert!(!sql.contains("domain TEXT NOT NULL"));
    }

    #[test]
    fn upsert_sql_updates_every_non_key_column() {
        let sql = upsert_sql(CONNECTIONS_TABLE, CONNECTION_COLUMNS);
        assert!(sql.starts_with("INSERT INTO connections ("));
        assert!(sql.contains("ON CONFLICT(id) DO UPDATE SET"));
        assert!(sql.contains("kind = excluded.kind"));
        assert!(!sql.contains("id = excluded.id"));
    }
}
