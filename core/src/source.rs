//! Input collaborators: where events and the ground-truth conversion total
//! come from.
//!
//! RULE: The engine never reaches for ambient data. Every run is handed an
//! `EventSource` and a `ConversionTotal` explicitly.

use crate::{
    error::{AttrError, AttrResult},
    event::TouchEvent,
};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub type EventIter<'a> = Box<dyn Iterator<Item = AttrResult<TouchEvent>> + 'a>;

/// A producer of touch events sorted by (customer_id, timestamp).
///
/// Sortedness is a precondition of every implementation; it is not checked.
/// `events()` may be called more than once and must replay the same stream.
pub trait EventSource {
    /// Stable short name, used in logs.
    fn name(&self) -> &'static str;

    fn events(&self) -> AttrResult<EventIter<'_>>;
}

/// Supplies the independently observed number of conversions used to scale
/// attribution proportions into conversion counts.
pub trait ConversionTotal {
    fn total_conversions(&self) -> AttrResult<u64>;
}

impl<T: EventSource + ?Sized> EventSource for &T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn events(&self) -> AttrResult<EventIter<'_>> {
        (**self).events()
    }
}

impl<T: ConversionTotal + ?Sized> ConversionTotal for &T {
    fn total_conversions(&self) -> AttrResult<u64> {
        (**self).total_conversions()
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    events: Vec<TouchEvent>,
}

impl MemoryEventSource {
    pub fn new(events: Vec<TouchEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[TouchEvent] {
        &self.events
    }
}

impl EventSource for MemoryEventSource {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn events(&self) -> AttrResult<EventIter<'_>> {
        Ok(Box::new(self.events.iter().cloned().map(Ok)))
    }
}

// ── JSON lines file ──────────────────────────────────────────────────────────

/// One `TouchEvent` JSON object per line. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesEventSource {
    path: PathBuf,
}

impl JsonLinesEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for JsonLinesEventSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn events(&self) -> AttrResult<EventIter<'_>> {
        let file = File::open(&self.path).map_err(|e| {
            AttrError::Other(anyhow::anyhow!("Cannot read {}: {e}", self.path.display()))
        })?;
        let lines = BufReader::new(file).lines();
        Ok(Box::new(lines.filter_map(|line| match line {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(serde_json::from_str::<TouchEvent>(&text).map_err(AttrError::from)),
            Err(e) => Some(Err(AttrError::from(e))),
        })))
    }
}

/// Write events as JSON lines. Returns the number of lines written.
pub fn write_json_lines<'a, I>(path: &Path, events: I) -> AttrResult<u64>
where
    I: IntoIterator<Item = &'a TouchEvent>,
{
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0u64;
    for event in events {
        serde_json::to_writer(&mut out, event)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

// ── Channel exclusion ────────────────────────────────────────────────────────

/// Drops every event whose state is in `excluded`.
///
/// Rebuilding a model through this adapter removes a channel at the data
/// level: the surrounding touches of each journey become adjacent.
pub struct ExcludeStates<S> {
    inner:    S,
    excluded: BTreeSet<String>,
}

impl<S: EventSource> ExcludeStates<S> {
    pub fn new<I, T>(inner: S, excluded: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            inner,
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: EventSource> EventSource for ExcludeStates<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn events(&self) -> AttrResult<EventIter<'_>> {
        let events = self.inner.events()?;
        Ok(Box::new(events.filter(move |event| match event {
            Ok(e) => !self.excluded.contains(&e.state),
            Err(_) => true,
        })))
    }
}

// ── Conversion totals ────────────────────────────────────────────────────────

/// A conversion total computed elsewhere and passed in as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedConversionTotal(pub u64);

impl ConversionTotal for FixedConversionTotal {
    fn total_conversions(&self) -> AttrResult<u64> {
        Ok(self.0)
    }
}

/// Counts distinct customers with at least one Conversion event in a source.
pub struct DistinctConverters<S>(pub S);

impl<S: EventSource> ConversionTotal for DistinctConverters<S> {
    fn total_conversions(&self) -> AttrResult<u64> {
        let mut converters = HashSet::new();
        for event in self.0.events()? {
            let event = event?;
            if event.is_conversion() {
                converters.insert(event.customer_id);
            }
        }
        Ok(converters.len() as u64)
    }
}
