//! Stream configuration
//!
//! A [`TailConfig`] fixes everything a change stream needs at creation time:
//! the table set (and therefore the slot's `add-tables` filter), the poll
//! cadence, the schema used to qualify bare table names, and the identity
//! columns surfaced on delete events.

use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Prefix of every replication slot created by this crate.
pub const SLOT_NAME_PREFIX: &str = "app_slot_";

/// Default interval between change polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Schema assumed for table names configured without a schema qualifier.
pub const DEFAULT_SCHEMA: &str = "public";

/// Maximum length for PostgreSQL identifiers (NAMEDATALEN - 1).
const PG_MAX_IDENTIFIER_LEN: usize = 63;

/// Number of decimal digits in a generated slot id. Wide enough that
/// concurrent streams against the same database will not collide.
const SLOT_ID_DIGITS: u32 = 15;

/// Configuration for a change stream
///
/// Built via [`TailConfig::builder`]. The table set is required; everything
/// else has defaults. The slot id is generated at build time when not
/// supplied, so a built config always names a concrete slot.
#[derive(Debug, Clone)]
pub struct TailConfig {
    slot_id: String,
    poll_interval: Duration,
    assume_schema: String,
    primary_key_map: HashMap<String, Vec<String>>,
    tables: Vec<String>,
}

impl TailConfig {
    /// Create a new configuration builder
    pub fn builder() -> TailConfigBuilder {
        TailConfigBuilder::default()
    }

    /// The full replication slot name, `app_slot_{slot_id}`
    pub fn slot_name(&self) -> String {
        format!("{SLOT_NAME_PREFIX}{}", self.slot_id)
    }

    /// The slot id suffix
    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    /// Interval between change polls
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Schema used to qualify bare table names
    pub fn assume_schema(&self) -> &str {
        &self.assume_schema
    }

    /// Identity columns per table, as configured
    pub fn primary_key_map(&self) -> &HashMap<String, Vec<String>> {
        &self.primary_key_map
    }

    /// The configured table set, as supplied by the caller
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Whether events carry schema-qualified table names
    ///
    /// Fixed at creation: qualified as soon as any configured table name
    /// contains a dot, bare otherwise.
    pub fn qualified_names(&self) -> bool {
        self.tables.iter().any(|t| t.contains('.'))
    }

    /// Fully qualify a configured table name for the slot filter
    pub(crate) fn qualify(&self, table: &str) -> String {
        if table.contains('.') {
            table.to_string()
        } else {
            format!("{}.{}", self.assume_schema, table)
        }
    }

    /// The comma-joined `add-tables` option passed to the slot
    pub fn add_tables(&self) -> String {
        self.tables
            .iter()
            .map(|t| self.qualify(t))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Builder for [`TailConfig`]
#[derive(Debug, Default)]
pub struct TailConfigBuilder {
    slot_id: Option<String>,
    poll_interval: Option<Duration>,
    assume_schema: Option<String>,
    primary_key_map: HashMap<String, Vec<String>>,
    tables: Vec<String>,
}

impl TailConfigBuilder {
    /// Set an explicit slot id suffix
    pub fn slot_id(mut self, id: impl Into<String>) -> Self {
        self.slot_id = Some(id.into());
        self
    }

    /// Override the poll interval (default 50 ms)
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Override the schema assumed for bare table names (default `public`)
    pub fn assume_schema(mut self, schema: impl Into<String>) -> Self {
        self.assume_schema = Some(schema.into());
        self
    }

    /// Declare the identity columns for a table (default `["id"]`)
    ///
    /// Delete events for the table expose exactly these columns, in this
    /// order, when present in the decoded record.
    pub fn primary_key<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key_map
            .insert(table.into(), columns.into_iter().map(Into::into).collect());
        self
    }

    /// Add a table to tail. Names with a dot are taken as `schema.table`;
    /// bare names are qualified with the assumed schema for the slot filter.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    /// Add several tables to tail
    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TailConfig> {
        if self.tables.is_empty() {
            return Err(Error::config("at least one table must be configured"));
        }
        if let Some(interval) = self.poll_interval {
            if interval.is_zero() {
                return Err(Error::config("poll interval must be non-zero"));
            }
        }

        let slot_id = match self.slot_id {
            Some(id) if id.is_empty() => {
                return Err(Error::config("slot id must not be empty"));
            }
            Some(id) => id,
            None => random_slot_id(),
        };

        let slot_name_len = SLOT_NAME_PREFIX.len() + slot_id.len();
        if slot_name_len > PG_MAX_IDENTIFIER_LEN {
            return Err(Error::config(format!(
                "slot name exceeds PostgreSQL identifier limit of {} characters (got {})",
                PG_MAX_IDENTIFIER_LEN, slot_name_len
            )));
        }

        Ok(TailConfig {
            slot_id,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            assume_schema: self
                .assume_schema
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            primary_key_map: self.primary_key_map,
            tables: self.tables,
        })
    }
}

/// Generate a random numeric slot id
fn random_slot_id() -> String {
    let mut rng = rand::thread_rng();
    let low = 10u64.pow(SLOT_ID_DIGITS - 1);
    let high = 10u64.pow(SLOT_ID_DIGITS);
    rng.gen_range(low..high).to_string()
}
