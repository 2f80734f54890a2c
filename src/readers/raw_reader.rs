use crate::error::Result;
use crate::models::StreamKind;
use crate::readers::{ObjectMeta, RawStore};
use crate::utils::RetryPolicy;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::de::SliceRead;
use serde_json::{Map, StreamDeserializer, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// One entry produced while scanning a raw object.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// A JSON object, not yet validated
    Record(Map<String, Value>),
    /// Content that could not be read as a record
    Malformed { detail: String },
}

/// A raw object loaded into memory.
#[derive(Debug, Clone)]
pub struct RawObject {
    pub meta: ObjectMeta,
    pub content: Vec<u8>,
}

impl RawObject {
    /// Lazily scan the object. Each call starts again from the beginning.
    pub fn events(&self) -> RawEvents<'_> {
        RawEvents::new(&self.content)
    }
}

/// Iterator over the records of one object.
///
/// Accepts newline-delimited, concatenated and array-wrapped JSON objects.
/// The first syntax error yields a single `Malformed` event and ends the
/// scan, since the stream cannot be resynchronised past it.
pub struct RawEvents<'a> {
    stream: StreamDeserializer<'a, SliceRead<'a>, Value>,
    pending: VecDeque<Value>,
    done: bool,
}

impl<'a> RawEvents<'a> {
    pub fn new(content: &'a [u8]) -> Self {
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
        Self {
            stream: serde_json::Deserializer::from_slice(content).into_iter::<Value>(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn classify(value: Value) -> RawEvent {
        match value {
            Value::Object(map) => RawEvent::Record(map),
            other => RawEvent::Malformed {
                detail: format!("expected a JSON object, found {}", json_kind(&other)),
            },
        }
    }
}

impl Iterator for RawEvents<'_> {
    type Item = RawEvent;

    fn next(&mut self) -> Option<RawEvent> {
        if let Some(value) = self.pending.pop_front() {
            return Some(Self::classify(value));
        }
        if self.done {
            return None;
        }

        match self.stream.next()? {
            Ok(Value::Array(items)) => {
                self.pending.extend(items);
                self.next()
            }
            Ok(value) => Some(Self::classify(value)),
            Err(e) => {
                self.done = true;
                Some(RawEvent::Malformed {
                    detail: e.to_string(),
                })
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ingestion time of a raw object.
///
/// Taken from the key when it carries one (`date=YYYY-MM-DD` segments from
/// the weather fetcher, `YYYY/MM/DD/HH` segments from the delivery stream),
/// otherwise from the object's last-modified time.
pub fn ingestion_time(meta: &ObjectMeta) -> DateTime<Utc> {
    let segments: Vec<&str> = meta.key.split('/').collect();

    for segment in &segments {
        if let Some(date) = segment
            .strip_prefix("date=")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        {
            return date.and_time(NaiveTime::MIN).and_utc();
        }
    }

    for window in segments.windows(4) {
        let parts: Option<Vec<u32>> = window.iter().map(|s| s.parse::<u32>().ok()).collect();
        if let Some([year, month, day, hour]) = parts.as_deref() {
            if window[0].len() == 4 {
                if let Some(ts) = NaiveDate::from_ymd_opt(*year as i32, *month, *day)
                    .and_then(|d| d.and_hms_opt(*hour, 0, 0))
                {
                    return ts.and_utc();
                }
            }
        }
    }

    meta.last_modified
}

/// Enumerates and loads the raw objects of one stream.
pub struct RawReader {
    store: Arc<dyn RawStore>,
    retry: RetryPolicy,
}

impl RawReader {
    pub fn new(store: Arc<dyn RawStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Objects of `stream` ingested in `[start, end)`, sorted by key
    pub fn list_objects(
        &self,
        stream: StreamKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ObjectMeta>> {
        let store = Arc::clone(&self.store);
        let prefix = stream.raw_prefix();
        let mut objects = self
            .retry
            .run("list", move || store.list(prefix))?
            .into_iter()
            .filter(|meta| {
                let ingested = ingestion_time(meta);
                ingested >= start && ingested < end
            })
            .collect::<Vec<_>>();
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            stream = %stream,
            objects = objects.len(),
            "Listed raw objects"
        );
        Ok(objects)
    }

    pub fn fetch(&self, meta: &ObjectMeta) -> Result<RawObject> {
        let store = Arc::clone(&self.store);
        let key = meta.key.clone();
        let content = self.retry.run("get", move || store.get(&key))?;
        Ok(RawObject {
            meta: meta.clone(),
            content,
        })
    }
}
