//! JSON query language (§4.G).
//!
//! Single-object and single-string forms are promoted to a one-element
//! list wherever the grammar calls for a list, matching the spec's
//! "single-object and single-string forms are promoted to a list" note for
//! `select` (and, by the same shorthand, `orderBy`/`groupBy`).

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq)]
pub enum Select {
    Field(String),
    Count {
        alias: String,
        field: Option<String>,
        distinct: bool,
    },
}

impl<'de> Deserialize<'de> for Select {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Json::deserialize(deserializer)?
            .try_into()
            .map_err(de::Error::custom)
    }
}

impl TryFrom<Json> for Select {
    type Error = String;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        match value {
            Json::String(field) => Ok(Select::Field(field)),
            Json::Object(mut map) => {
                if let Some(count) = map.remove("$count") {
                    let count = count
                        .as_object()
                        .ok_or("$count must be an object")?;
                    let alias = count
                        .get("as")
                        .and_then(Json::as_str)
                        .ok_or("$count.as is required")?
                        .to_string();
                    let field = count
                        .get("field")
                        .and_then(Json::as_str)
                        .map(str::to_string);
                    let distinct = count
                        .get("distinct")
                        .and_then(Json::as_bool)
                        .unwrap_or(false);
                    Ok(Select::Count { alias, field, distinct })
                } else if let Some(field) = map.remove("field") {
                    let field = field.as_str().ok_or("field must be a string")?.to_string();
                    Ok(Select::Field(field))
                } else {
                    Err("select item must have a \"field\" or \"$count\" key".to_string())
                }
            }
            _ => Err("select item must be a string or an object".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub field: String,
    pub desc: bool,
}

impl<'de> Deserialize<'de> for OrderItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Json::deserialize(deserializer)?;
        match value {
            Json::String(field) => Ok(OrderItem { field, desc: false }),
            Json::Object(map) => {
                let field = map
                    .get("field")
                    .and_then(Json::as_str)
                    .ok_or_else(|| de::Error::custom("orderBy.field is required"))?
                    .to_string();
                let desc = map.get("desc").and_then(Json::as_bool).unwrap_or(false);
                Ok(OrderItem { field, desc })
            }
            _ => Err(de::Error::custom("orderBy item must be a string or an object")),
        }
    }
}

/// A single matcher (`{$eq}`, `{$ne}`, `{$in:[…]}`, `{$notIn:[…]}`,
/// `{$like:"…"}`, or a JSON primitive promoted to `$eq`).
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Eq(Json),
    Ne(Json),
    In(Vec<Json>),
    NotIn(Vec<Json>),
    Like(String),
}

impl Matcher {
    fn from_json(value: Json) -> Result<Self, String> {
        if let Json::Object(map) = &value {
            if map.len() == 1 {
                let (op, operand) = map.iter().next().expect("len checked above");
                let operand = operand.clone();
                return match op.as_str() {
                    "$eq" => Ok(Matcher::Eq(operand)),
                    "$ne" => Ok(Matcher::Ne(operand)),
                    "$in" => Ok(Matcher::In(into_array(operand)?)),
                    "$notIn" => Ok(Matcher::NotIn(into_array(operand)?)),
                    "$like" => Ok(Matcher::Like(
                        operand
                            .as_str()
                            .ok_or("$like requires a string operand")?
                            .to_string(),
                    )),
                    other => Err(format!("unrecognized matcher operator: {other}")),
                };
            }
        }
        Ok(Matcher::Eq(value))
    }
}

fn into_array(value: Json) -> Result<Vec<Json>, String> {
    match value {
        Json::Array(items) => Ok(items),
        _ => Err("expected a JSON array".to_string()),
    }
}

/// `{column: matcher-or-list}`, in the deterministic column order produced
/// by `serde_json`'s default (sorted, not insertion-order) map — so the
/// same document always generates the same SQL string.
pub type ColumnFilters = Vec<(String, Vec<Matcher>)>;

pub(crate) fn deserialize_column_filters<'de, D>(deserializer: D) -> Result<ColumnFilters, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Map::<String, Json>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(column, value)| {
            let matchers = match value {
                Json::Array(items) => items
                    .into_iter()
                    .map(Matcher::from_json)
                    .collect::<Result<Vec<_>, _>>(),
                other => Matcher::from_json(other).map(|matcher| vec![matcher]),
            }
            .map_err(de::Error::custom)?;
            Ok((column, matchers))
        })
        .collect()
}

fn deserialize_promoted<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::One(value) => Ok(vec![value]),
        OneOrMany::Many(values) => Ok(values),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct QueryDocument {
    #[serde(default, deserialize_with = "deserialize_promoted_select")]
    pub select: Vec<Select>,
    #[serde(default, deserialize_with = "deserialize_column_filters")]
    pub query: ColumnFilters,
    #[serde(default, rename = "orderBy", deserialize_with = "deserialize_promoted_order")]
    pub order_by: Vec<OrderItem>,
    #[serde(default, rename = "groupBy", deserialize_with = "deserialize_promoted_group")]
    pub group_by: Vec<String>,
}

fn deserialize_promoted_select<'de, D>(deserializer: D) -> Result<Vec<Select>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_promoted(deserializer)
}

fn deserialize_promoted_order<'de, D>(deserializer: D) -> Result<Vec<OrderItem>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_promoted(deserializer)
}

fn deserialize_promoted_group<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_promoted(deserializer)
}

/// A standalone filter document (§4.G "Optional WHERE clause from a query
/// sub-document"), used by the chart handler.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FilterDocument {
    #[serde(default, deserialize_with = "deserialize_column_filters")]
    pub query: ColumnFilters,
}
