//! Hosted catalog access.
//!
//! [`DataClient`] is the narrow table interface (list/insert/update/delete of JSON
//! rows). [`RestClient`] talks to a PostgREST-style endpoint; [`MemoryClient`] keeps
//! rows in process. [`Catalog`] maps snake_case rows to the camelCase models.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use calmwave_types::{
    BreathingPattern, BreathingPatternRow, Meditation, MeditationRow, RadioStream,
    RadioStreamRow, Soundscape, SoundscapeRow, Table,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Row selection for [`DataClient::list`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Equality filters on columns.
    pub eq: Vec<(String, String)>,
    /// Ascending sort column.
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::all().eq("id", id).limit(1)
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.eq.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, row: &Value) -> bool {
        self.eq.iter().all(|(column, value)| match row.get(column) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == *value,
            None => false,
        })
    }
}

/// Remote table operations on snake_case JSON rows.
pub trait DataClient: Send + Sync {
    fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>>;

    /// Insert a row and return it as stored.
    fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Merge `patch` into the row with `id` and return the result.
    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value>;

    fn delete(&self, table: Table, id: &str) -> Result<()>;
}

/// PostgREST-style HTTP client (`/rest/v1/<table>`).
pub struct RestClient {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn id_url(&self, table: Table, id: &str) -> String {
        format!("{}?id=eq.{}", self.table_url(table), urlencoding::encode(id))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Query string for a list request.
fn list_query(query: &Query) -> String {
    let mut parts = vec!["select=*".to_string()];
    for (column, value) in &query.eq {
        parts.push(format!(
            "{}=eq.{}",
            urlencoding::encode(column),
            urlencoding::encode(value)
        ));
    }
    if let Some(column) = &query.order_by {
        parts.push(format!("order={}.asc", urlencoding::encode(column)));
    }
    if let Some(limit) = query.limit {
        parts.push(format!("limit={limit}"));
    }
    parts.join("&")
}

impl DataClient for RestClient {
    fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        let url = format!("{}?{}", self.table_url(table), list_query(query));
        debug!(table = table.name(), %url, "catalog list");
        read_json(
            self.agent
                .get(&url)
                .header("apikey", &self.api_key)
                .header("Authorization", &self.bearer())
                .call()
                .with_context(|| format!("request {}", table.name()))?,
            table.name(),
        )
    }

    fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let url = self.table_url(table);
        let rows: Vec<Value> = read_json(
            self.agent
                .post(&url)
                .header("apikey", &self.api_key)
                .header("Authorization", &self.bearer())
                .header("Prefer", "return=representation")
                .send_json(&row)
                .with_context(|| format!("insert into {}", table.name()))?,
            table.name(),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("insert into {} returned no row", table.name()))
    }

    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let url = self.id_url(table, id);
        let rows: Vec<Value> = read_json(
            self.agent
                .patch(&url)
                .header("apikey", &self.api_key)
                .header("Authorization", &self.bearer())
                .header("Prefer", "return=representation")
                .send_json(&patch)
                .with_context(|| format!("update {} {id}", table.name()))?,
            table.name(),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} {id} not found", table.name()))
    }

    fn delete(&self, table: Table, id: &str) -> Result<()> {
        let url = self.id_url(table, id);
        let resp = self
            .agent
            .delete(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", &self.bearer())
            .call()
            .with_context(|| format!("delete {} {id}", table.name()))?;
        if !resp.status().is_success() {
            bail!("delete {} {id} failed with {}", table.name(), resp.status());
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(
    mut resp: ureq::http::Response<ureq::Body>,
    label: &str,
) -> Result<T> {
    let body = resp
        .body_mut()
        .read_to_string()
        .with_context(|| format!("read {label} response body"))?;
    serde_json::from_str(&body).with_context(|| format!("decode {label} response"))
}

/// In-process tables keyed by row id.
#[derive(Default)]
pub struct MemoryClient {
    tables: Mutex<BTreeMap<&'static str, Vec<Value>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

impl DataClient for MemoryClient {
    fn list(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        let tables = self.tables.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        let mut rows: Vec<Value> = tables
            .get(table.name())
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(column) = &query.order_by {
            rows.sort_by_key(|r| r.get(column).map(|v| v.to_string()).unwrap_or_default());
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let Some(id) = row_id(&row) else {
            bail!("{} row has no id", table.name());
        };
        let mut tables = self.tables.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        let rows = tables.entry(table.name()).or_default();
        if rows.iter().any(|r| row_id(r) == Some(id)) {
            bail!("{} {id} already exists", table.name());
        }
        rows.push(row.clone());
        Ok(row)
    }

    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            bail!("update patch for {} must be an object", table.name());
        };
        let mut tables = self.tables.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        let row = tables
            .get_mut(table.name())
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .ok_or_else(|| anyhow!("{} {id} not found", table.name()))?;
        if let Value::Object(fields) = &mut *row {
            fields.extend(patch);
        }
        Ok(row.clone())
    }

    fn delete(&self, table: Table, id: &str) -> Result<()> {
        let mut tables = self.tables.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        if let Some(rows) = tables.get_mut(table.name()) {
            rows.retain(|r| row_id(r) != Some(id));
        }
        Ok(())
    }
}

/// Row type paired with its model for one table.
pub trait CatalogEntry: Clone + Sized {
    type Row: Serialize + DeserializeOwned + From<Self> + Into<Self>;
    const TABLE: Table;

    fn id(&self) -> &str;
}

impl CatalogEntry for Meditation {
    type Row = MeditationRow;
    const TABLE: Table = Table::Meditations;

    fn id(&self) -> &str {
        &self.id
    }
}

impl CatalogEntry for Soundscape {
    type Row = SoundscapeRow;
    const TABLE: Table = Table::Soundscapes;

    fn id(&self) -> &str {
        &self.id
    }
}

impl CatalogEntry for RadioStream {
    type Row = RadioStreamRow;
    const TABLE: Table = Table::RadioStreams;

    fn id(&self) -> &str {
        &self.id
    }
}

impl CatalogEntry for BreathingPattern {
    type Row = BreathingPatternRow;
    const TABLE: Table = Table::BreathingPatterns;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Typed view over a [`DataClient`].
pub struct Catalog<C: DataClient> {
    client: C,
}

impl<C: DataClient> Catalog<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn list<T: CatalogEntry>(&self) -> Result<Vec<T>> {
        let rows = self.client.list(T::TABLE, &Query::all().order_by("id"))?;
        rows.into_iter().map(decode_row::<T>).collect()
    }

    pub fn get<T: CatalogEntry>(&self, id: &str) -> Result<Option<T>> {
        let rows = self.client.list(T::TABLE, &Query::by_id(id))?;
        rows.into_iter().next().map(decode_row::<T>).transpose()
    }

    pub fn insert<T: CatalogEntry>(&self, entry: T) -> Result<T> {
        let row = encode_row(entry)?;
        decode_row(self.client.insert(T::TABLE, row)?)
    }

    /// Replace every column of an existing entry.
    pub fn update<T: CatalogEntry>(&self, entry: T) -> Result<T> {
        let id = entry.id().to_string();
        let row = encode_row(entry)?;
        decode_row(self.client.update(T::TABLE, &id, row)?)
    }

    pub fn delete<T: CatalogEntry>(&self, id: &str) -> Result<()> {
        self.client.delete(T::TABLE, id)
    }

    pub fn meditations(&self) -> Result<Vec<Meditation>> {
        self.list()
    }

    pub fn soundscapes(&self) -> Result<Vec<Soundscape>> {
        self.list()
    }

    pub fn radio_streams(&self) -> Result<Vec<RadioStream>> {
        self.list()
    }

    pub fn breathing_patterns(&self) -> Result<Vec<BreathingPattern>> {
        self.list()
    }
}

fn decode_row<T: CatalogEntry>(row: Value) -> Result<T> {
    let row: T::Row = serde_json::from_value(row)
        .with_context(|| format!("decode {} row", T::TABLE.name()))?;
    Ok(row.into())
}

fn encode_row<T: CatalogEntry>(entry: T) -> Result<Value> {
    serde_json::to_value(T::Row::from(entry))
        .with_context(|| format!("encode {} row", T::TABLE.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meditation(id: &str, title: &str) -> Meditation {
        Meditation {
            id: id.to_string(),
            title: title.to_string(),
            audio_url: format!("https://cdn.example/{id}.mp3"),
            duration: Some(600),
            ..Meditation::default()
        }
    }

    #[test]
    fn catalog_crud_round_trips_through_rows() {
        let catalog = Catalog::new(MemoryClient::new());
        catalog.insert(meditation("m-2", "Evening")).unwrap();
        catalog.insert(meditation("m-1", "Morning")).unwrap();

        let raw = catalog.client().list(Table::Meditations, &Query::by_id("m-1")).unwrap();
        assert_eq!(raw[0]["audio_url"], "https://cdn.example/m-1.mp3");

        let all = catalog.meditations().unwrap();
        assert_eq!(all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m-1", "m-2"]);

        let mut updated = meditation("m-1", "Morning Calm");
        updated.category = Some("sleep".to_string());
        catalog.update(updated.clone()).unwrap();
        assert_eq!(catalog.get::<Meditation>("m-1").unwrap(), Some(updated));

        catalog.delete::<Meditation>("m-1").unwrap();
        assert_eq!(catalog.get::<Meditation>("m-1").unwrap(), None);
    }

    #[test]
    fn breathing_pattern_rows_keep_every_field() {
        let catalog = Catalog::new(MemoryClient::new());
        let pattern = BreathingPattern {
            id: "box".to_string(),
            name: "Box".to_string(),
            inhale: 4,
            hold1: 4,
            exhale: 4,
            hold2: 4,
            cycles: 5,
            hold_text: Some("Hold gently".to_string()),
            exhale_audio_url: Some("https://cdn/out.mp3".to_string()),
            ..BreathingPattern::default()
        };
        catalog.insert(pattern.clone()).unwrap();
        assert_eq!(catalog.breathing_patterns().unwrap(), vec![pattern]);
    }

    #[test]
    fn memory_client_rejects_duplicates_and_unknown_rows() {
        let client = MemoryClient::new();
        client.insert(Table::Soundscapes, json!({"id": "s1"})).unwrap();
        assert!(client.insert(Table::Soundscapes, json!({"id": "s1"})).is_err());
        assert!(client.insert(Table::Soundscapes, json!({"title": "x"})).is_err());
        assert!(client.update(Table::Soundscapes, "nope", json!({})).is_err());
    }

    #[test]
    fn query_string_encodes_filters() {
        let query = Query::all().eq("category", "deep sleep").order_by("title").limit(5);
        assert_eq!(
            list_query(&query),
            "select=*&category=eq.deep%20sleep&order=title.asc&limit=5"
        );
    }

    #[test]
    fn rest_client_builds_table_urls() {
        let client = RestClient::new("https://db.example.com/", "key");
        assert_eq!(
            client.table_url(Table::RadioStreams),
            "https://db.example.com/rest/v1/radio_streams"
        );
        assert_eq!(
            client.id_url(Table::Meditations, "a b"),
            "https://db.example.com/rest/v1/meditations?id=eq.a%20b"
        );
    }
}
