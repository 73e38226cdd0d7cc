//! Bounded aggregation store of the latest reading per sensor.
//!
//! Entries are kept in arrival order. Upserting an id that is already present
//! replaces its reading in place; a new id is appended and, when the store is
//! full, the oldest entry is evicted first. Every upsert may also be written to
//! a durable [`RowSink`]; a failing sink is logged and never blocks the store.

use crate::output::csv::format_row;
use crate::reading::Reading;
use log::{debug, error};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::time::Instant;

/// Destination for data log rows.
pub trait RowSink: Send {
    /// Append one row; the sink adds the line terminator.
    fn append_row(&mut self, row: &str) -> io::Result<()>;
}

/// Append-only CSV file, opened per row.
#[derive(Debug, Clone)]
pub struct CsvFile {
    path: PathBuf,
}

impl CsvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RowSink for CsvFile {
    fn append_row(&mut self, row: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{row}")
    }
}

/// Latest reading of one sensor plus its reporting state.
#[derive(Debug, Clone)]
pub struct Entry {
    id: String,
    reading: Reading,
    updated: bool,
    updated_at: Instant,
    pushed_at: Instant,
}

impl Entry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    /// True when the reading changed since it was last pushed.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn mark_pushed(&mut self) {
        self.updated = false;
        self.pushed_at = Instant::now();
    }

    /// Whole seconds since the reading was last replaced.
    pub fn update_age(&self) -> u64 {
        self.updated_at.elapsed().as_secs()
    }

    /// Whole seconds since the entry was last pushed (or since the store was created).
    pub fn push_age(&self) -> u64 {
        self.pushed_at.elapsed().as_secs()
    }
}

/// What an upsert did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Existing entry replaced in place
    Updated,
    /// New entry appended
    Inserted,
    /// New entry appended after evicting the oldest id
    Evicted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub change: Change,
    /// Index of the upserted entry after the operation
    pub position: usize,
    /// Data log failure, if a sink is configured and the append failed
    pub log_error: Option<String>,
}

/// Bounded FIFO of the latest reading per sensor.
///
/// Holds at least one entry; a capacity of zero is raised to one.
pub struct Store {
    entries: VecDeque<Entry>,
    capacity: usize,
    sink: Option<Box<dyn RowSink>>,
    created_at: Instant,
}

impl Store {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            sink: None,
            created_at: Instant::now(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn RowSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn upsert(&mut self, reading: Reading) -> UpsertOutcome {
        let log_error = self.append_row(&reading);
        let now = Instant::now();

        if let Some(position) = self.position(reading.id()) {
            let entry = &mut self.entries[position];
            entry.reading = reading;
            entry.updated = true;
            entry.updated_at = now;
            debug!("Updated entry #{position} ({})", entry.id);
            return UpsertOutcome {
                change: Change::Updated,
                position,
                log_error,
            };
        }

        let mut change = Change::Inserted;
        if self.entries.len() >= self.capacity
            && let Some(oldest) = self.entries.pop_front()
        {
            debug!("Store full ({}), evicting {}", self.capacity, oldest.id);
            change = Change::Evicted(oldest.id);
        }

        let id = reading.id().to_string();
        debug!("Inserted entry {id}");
        self.entries.push_back(Entry {
            id,
            reading,
            updated: true,
            updated_at: now,
            pushed_at: self.created_at,
        });

        UpsertOutcome {
            change,
            position: self.entries.len() - 1,
            log_error,
        }
    }

    fn append_row(&mut self, reading: &Reading) -> Option<String> {
        let sink = self.sink.as_mut()?;
        match sink.append_row(&format_row(reading)) {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to append to data log: {e}");
                Some(e.to_string())
            }
        }
    }

    /// Mark the entry for `id` as pushed. Returns false for unknown ids.
    pub fn mark_pushed(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.mark_pushed();
                true
            }
            None => false,
        }
    }

    pub fn update_age(&self, id: &str) -> Option<u64> {
        self.get(id).map(Entry::update_age)
    }

    pub fn push_age(&self, id: &str) -> Option<u64> {
        self.get(id).map(Entry::push_age)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entry_at(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}
