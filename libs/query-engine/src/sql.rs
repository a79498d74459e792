//! Safe parameterized SQL generation (§4.G "SQL generation").

use crate::language::{ColumnFilters, Matcher, OrderItem, QueryDocument, Select};
use conn_store::schema::Column;
use conn_store::SqlValue;
use serde_json::Value as Json;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("$count.as must match ^[a-zA-Z]+$: {0}")]
    InvalidCountAlias(String),

    #[error("invalid parameter value for column {column}: {reason}")]
    InvalidParameterValue { column: String, reason: String },

    #[error("malformed query document: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

fn is_known_column(columns: &[Column], name: &str) -> bool {
    columns.iter().any(|column| column.name == name)
}

fn require_column<'a>(columns: &[Column], name: &'a str) -> Result<&'a str, QueryError> {
    if is_known_column(columns, name) {
        Ok(name)
    } else {
        Err(QueryError::UnknownColumn(name.to_string()))
    }
}

fn count_alias_pattern_ok(alias: &str) -> bool {
    !alias.is_empty() && alias.chars().all(|c| c.is_ascii_alphabetic())
}

/// Converts a query-language JSON value into the same [`SqlValue`] encoding
/// `conn_store::store` uses for writes (§4.G: "Parameter values flow
/// through the same value encoder as writes").
fn json_to_sql_value(column: &str, value: &Json) -> Result<SqlValue, QueryError> {
    match value {
        Json::Null => Ok(SqlValue::Null),
        Json::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(QueryError::InvalidParameterValue {
                    column: column.to_string(),
                    reason: "number out of range".to_string(),
                })
            }
        }
        Json::String(s) => Ok(SqlValue::Text(s.clone())),
        Json::Array(_) | Json::Object(_) => Err(QueryError::InvalidParameterValue {
            column: column.to_string(),
            reason: "arrays and objects cannot be bound as parameters".to_string(),
        }),
    }
}

fn matcher_op_name(matcher: &Matcher) -> &'static str {
    match matcher {
        Matcher::Eq(_) => "eq",
        Matcher::Ne(_) => "ne",
        Matcher::In(_) => "in",
        Matcher::NotIn(_) => "notIn",
        Matcher::Like(_) => "like",
    }
}

/// Builds the AND-joined (OR-joined per column) WHERE fragments for a set
/// of column filters, without the leading `WHERE` keyword, so the same
/// builder can also feed the chart handler's join condition.
///
/// Parameter names follow `:<column><index><op><subindex>`, where `index`
/// is the column's position among the filtered columns and `subindex` is
/// the matcher's position within that column's OR-list (§4.G). `$in`/
/// `$notIn` value lists get an additional `_<value index>` suffix, since
/// the spec's naming scheme does not by itself disambiguate multiple bound
/// values within a single matcher.
pub fn build_clauses(
    columns: &[Column],
    filters: &ColumnFilters,
) -> Result<(Vec<String>, Vec<(String, SqlValue)>), QueryError> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    let mut seen_param_names = std::collections::HashSet::new();

    for (column_index, (column, matchers)) in filters.iter().enumerate() {
        let column = require_column(columns, column)?;
        let mut matcher_clauses = Vec::with_capacity(matchers.len());

        for (matcher_index, matcher) in matchers.iter().enumerate() {
            let op = matcher_op_name(matcher);
            let base_name = format!(":{column}{column_index}{op}{matcher_index}");

            let clause = match matcher {
                Matcher::Eq(value) => {
                    bind_one(&mut params, &mut seen_param_names, column, &base_name, value)?;
                    format!("{column} = {base_name}")
                }
                Matcher::Ne(value) => {
                    bind_one(&mut params, &mut seen_param_names, column, &base_name, value)?;
                    format!("{column} != {base_name}")
                }
                Matcher::Like(text) => {
                    bind_one(
                        &mut params,
                        &mut seen_param_names,
                        column,
                        &base_name,
                        &Json::String(text.clone()),
                    )?;
                    format!("{column} LIKE {base_name}")
                }
                Matcher::In(values) | Matcher::NotIn(values) => {
                    let mut names = Vec::with_capacity(values.len());
                    for (value_index, value) in values.iter().enumerate() {
                        let name = format!("{base_name}_{value_index}");
                        bind_one(&mut params, &mut seen_param_names, column, &name, value)?;
                        names.push(name);
                    }
                    let keyword = if matches!(matcher, Matcher::In(_)) { "IN" } else { "NOT IN" };
                    format!("{column} {keyword} ({})", names.join(", "))
                }
            };

            matcher_clauses.push(clause);
        }

        clauses.push(format!("( {} )", matcher_clauses.join(" OR ")));
    }

    Ok((clauses, params))
}

fn bind_one(
    params: &mut Vec<(String, SqlValue)>,
    seen: &mut std::collections::HashSet<String>,
    column: &str,
    name: &str,
    value: &Json,
) -> Result<(), QueryError> {
    if !seen.insert(name.to_string()) {
        panic!("query-engine generated a duplicate parameter name: {name}");
    }
    params.push((name.to_string(), json_to_sql_value(column, value)?));
    Ok(())
}

fn select_sql(columns: &[Column], items: &[Select]) -> Result<String, QueryError> {
    if items.is_empty() {
        return Ok("*".to_string());
    }

    let mut exprs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Select::Field(field) => {
                let field = require_column(columns, field)?;
                exprs.push(field.to_string());
            }
            Select::Count { alias, field, distinct } => {
                if !count_alias_pattern_ok(alias) {
                    return Err(QueryError::InvalidCountAlias(alias.clone()));
                }
                let inner = match field {
                    Some(field) => {
                        let field = require_column(columns, field)?;
                        if *distinct {
                            format!("DISTINCT {field}")
                        } else {
                            field.to_string()
                        }
                    }
                    None => "*".to_string(),
                };
                exprs.push(format!("COUNT({inner}) AS {alias}"));
            }
        }
    }
    Ok(exprs.join(", "))
}

fn order_by_sql(columns: &[Column], items: &[OrderItem]) -> Result<String, QueryError> {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let field = require_column(columns, &item.field)?;
        let direction = if item.desc { "DESC" } else { "ASC" };
        parts.push(format!("{field} {direction}"));
    }
    Ok(parts.join(", "))
}

fn group_by_sql(columns: &[Column], fields: &[String]) -> Result<String, QueryError> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        parts.push(require_column(columns, field)?.to_string());
    }
    Ok(parts.join(", "))
}

/// Generates the full `SELECT … FROM <table> [WHERE …] [GROUP BY …]
/// [ORDER BY …]` statement and its bound parameters for a [`QueryDocument`].
pub fn generate_query(
    table: &str,
    columns: &[Column],
    doc: &QueryDocument,
) -> Result<GeneratedQuery, QueryError> {
    let select = select_sql(columns, &doc.select)?;
    let (where_clauses, params) = build_clauses(columns, &doc.query)?;
    let group_by = group_by_sql(columns, &doc.group_by)?;
    let order_by = order_by_sql(columns, &doc.order_by)?;

    let mut fragments = vec![format!("SELECT {select} FROM {table}")];
    if !where_clauses.is_empty() {
        fragments.push(format!("WHERE {}", where_clauses.join(" AND ")));
    }
    if !group_by.is_empty() {
        fragments.push(format!("GROUP BY {group_by}"));
    }
    if !order_by.is_empty() {
        fragments.push(format!("ORDER BY {order_by}"));
    }

    Ok(GeneratedQuery {
        sql: fragments.join(" "),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conn_store::schema::CONNECTION_COLUMNS;

    #[test]
    fn matches_the_spec_example_verbatim() {
        let doc: QueryDocument = serde_json::from_str(
            r#"{"select":["domain","country"],"query":{"domain":{"$like":"example.%"}},"orderBy":[{"field":"started","desc":true}]}"#,
        )
        .unwrap();

        let generated = generate_query("connections", CONNECTION_COLUMNS, &doc).unwrap();

        assert_eq!(
            generated.sql,
            "SELECT domain, country FROM connections WHERE ( domain LIKE :domain0like0 ) ORDER BY started DESC"
        );
        assert_eq!(generated.params.len(), 1);
        assert_eq!(generated.params[0].0, ":domain0like0");
        assert!(matches!(&generated.params[0].1, SqlValue::Text(v) if v == "example.%"));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let doc: QueryDocument =
            serde_json::from_str(r#"{"select":["not_a_real_column"]}"#).unwrap();
        let error = generate_query("connections", CONNECTION_COLUMNS, &doc).unwrap_err();
        assert!(matches!(error, QueryError::UnknownColumn(column) if column == "not_a_real_column"));
    }

    #[test]
    fn count_alias_must_be_letters_only() {
        let doc: QueryDocument = serde_json::from_str(
            r#"{"select":{"$count":{"as":"total_1","field":"id"}}}"#,
        )
        .unwrap();
        let error = generate_query("connections", CONNECTION_COLUMNS, &doc).unwrap_err();
        assert!(matches!(error, QueryError::InvalidCountAlias(alias) if alias == "total_1"));
    }

    #[test]
    fn in_matcher_binds_one_parameter_per_value() {
        let doc: QueryDocument =
            serde_json::from_str(r#"{"query":{"verdict":{"$in":["accept","block"]}}}"#).unwrap();
        let generated = generate_query("connections", CONNECTION_COLUMNS, &doc).unwrap();
        assert!(generated
            .sql
            .contains("( verdict IN (:verdict0in0_0, :verdict0in0_1) )"));
        assert_eq!(generated.params.len(), 2);
    }

    #[test]
    fn distinct_columns_are_and_joined() {
        let doc: QueryDocument = serde_json::from_str(
            r#"{"query":{"domain":"a.com.","country":"US"}}"#,
        )
        .unwrap();
        let generated = generate_query("connections", CONNECTION_COLUMNS, &doc).unwrap();
        assert!(generated.sql.contains(" AND "));
    }
}
