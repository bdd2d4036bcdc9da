//! Compares a stream of incoming address features against the persistent
//! address table and emits the changes that would bring it up to date.
//!
//! Several workers can read the same stream; each one keeps only the lines
//! whose 1-based line number modulo the worker count equals its id.

use crate::sink::{OutputSink, SinkError};
use crate::store::{PersistentAddress, PersistentStore, StoreError};
use crate::types::Name;
use geo_types::Point;
use geojson::Feature;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// GeoJSON text sequences prefix every record with this
const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Error, Debug)]
pub enum ConflateError {
    #[error("worker id {id} is out of range for {total} workers")]
    InvalidOptions { id: usize, total: usize },
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] SinkError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflateOptions {
    pub id: usize,
    pub total: usize,
}

impl ConflateOptions {
    pub fn new(id: usize, total: usize) -> Result<Self, ConflateError> {
        if total == 0 || id >= total {
            return Err(ConflateError::InvalidOptions { id, total });
        }
        Ok(Self { id, total })
    }

    pub fn owns_line(&self, line_number: usize) -> bool {
        line_number % self.total == self.id
    }
}

/// Normalises a street name into the form stored as `tokenized`
pub trait Tokenize: Send + Sync {
    fn tokenize(&self, text: &str) -> String;
}

/// Lowercases, drops punctuation and collapses whitespace
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicTokenizer;

impl Tokenize for BasicTokenizer {
    fn tokenize(&self, text: &str) -> String {
        text.to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// No persistent address nearby carries this number
    Create,
    /// A nearby persistent address with the same number and street
    Modify { persistent_id: i64 },
    None,
}

/// Decide what an incoming address means for the persistent table
pub fn compare<T: Tokenize + ?Sized>(
    street: &[Name],
    candidates: &[PersistentAddress],
    tokenizer: &T,
) -> Action {
    if candidates.is_empty() {
        return Action::Create;
    }

    let potentials: Vec<String> = street
        .iter()
        .map(|name| tokenizer.tokenize(&name.display))
        .filter(|tokens| !tokens.is_empty())
        .collect();

    candidates
        .iter()
        .find(|candidate| {
            candidate
                .names
                .iter()
                .any(|known| potentials.contains(&known.tokenized))
        })
        .map_or(Action::None, |candidate| Action::Modify {
            persistent_id: candidate.id,
        })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConflateSummary {
    /// Non-empty lines this worker owned
    pub lines: usize,
    pub created: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

struct Incoming {
    number: String,
    street: Vec<Name>,
    point: Point<f64>,
    feature: Feature,
}

fn property<'a>(feature: &'a Feature, key: &str) -> Option<&'a Value> {
    feature.properties.as_ref()?.get(key)
}

fn parse_incoming(line: &str) -> Result<Incoming, String> {
    let feature: Feature = serde_json::from_str(line).map_err(|err| err.to_string())?;

    let number = match property(&feature, "number") {
        Some(Value::String(number)) => number.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => return Err("feature has no address number".to_string()),
    };

    let street: Vec<Name> = property(&feature, "street")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| format!("unreadable street names: {err}"))?
        .unwrap_or_default();

    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| "feature has no geometry".to_string())?;
    let point = Point::<f64>::try_from(geometry.value.clone())
        .map_err(|_| "address geometry must be a Point".to_string())?;

    Ok(Incoming {
        number,
        street,
        point,
        feature,
    })
}

fn create_record(incoming: &Incoming) -> Value {
    json!({
        "action": "create",
        "properties": {
            "number": incoming.number,
            "street": property(&incoming.feature, "street").cloned().unwrap_or(Value::Null),
            "source": property(&incoming.feature, "source").cloned().unwrap_or(Value::Null),
        },
        "geometry": incoming.feature.geometry,
    })
}

/// Read newline-delimited features and conflate the lines this worker owns.
/// Unparsable lines are logged and skipped.
pub async fn run<R, P, T>(
    options: ConflateOptions,
    reader: R,
    store: &P,
    tokenizer: &T,
    sink: &OutputSink,
) -> Result<ConflateSummary, ConflateError>
where
    R: AsyncBufRead + Unpin,
    P: PersistentStore,
    T: Tokenize + ?Sized,
{
    let mut lines = reader.lines();
    let mut summary = ConflateSummary::default();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }

        line_number += 1;
        if !options.owns_line(line_number) {
            continue;
        }
        summary.lines += 1;

        let line = line.replace(RECORD_SEPARATOR, "");

        let incoming = match parse_incoming(&line) {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!(worker_id = options.id, line_number, "unable to parse: {}", err);
                summary.skipped += 1;
                continue;
            }
        };

        let candidates = store.candidates(&incoming.number, incoming.point).await?;

        match compare(&incoming.street, &candidates, tokenizer) {
            Action::Create => {
                sink.write_records(&[create_record(&incoming)]).await?;
                summary.created += 1;
            }
            Action::Modify { persistent_id } => {
                debug!(
                    worker_id = options.id,
                    persistent_id,
                    number = incoming.number,
                    "address matches a persistent record, modify"
                );
                summary.modified += 1;
            }
            Action::None => summary.unchanged += 1,
        }
    }

    sink.flush().await?;

    info!(
        worker_id = options.id,
        lines = summary.lines,
        created = summary.created,
        modified = summary.modified,
        "conflation finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPersistentStore;
    use crate::types::JsonObject;

    fn persistent(id: i64, number: &str, x: f64, street: &str) -> PersistentAddress {
        PersistentAddress {
            id,
            number: number.to_string(),
            names: vec![Name::new(street, "", "")],
            props: JsonObject::new(),
            point: Point::new(x, 0.0),
        }
    }

    fn line(number: &str, x: f64, street: &str) -> String {
        json!({
            "type": "Feature",
            "properties": {
                "number": number,
                "street": [{ "display": street }],
                "source": "test"
            },
            "geometry": { "type": "Point", "coordinates": [x, 0.0] }
        })
        .to_string()
    }

    #[test]
    fn tokenizer_normalises() {
        assert_eq!(BasicTokenizer.tokenize("  Main   St. NW "), "main st nw");
        assert_eq!(BasicTokenizer.tokenize("--"), "");
    }

    #[test]
    fn worker_owns_its_share_of_lines() {
        let options = ConflateOptions::new(1, 3).unwrap();
        let owned: Vec<usize> = (1..=9).filter(|n| options.owns_line(*n)).collect();
        assert_eq!(owned, vec![1, 4, 7]);

        assert!(ConflateOptions::new(3, 3).is_err());
        assert!(ConflateOptions::new(0, 0).is_err());
    }

    #[test]
    fn compare_decides_action() {
        let street = vec![Name::new("", "", "Main St")];

        assert_eq!(compare(&street, &[], &BasicTokenizer), Action::Create);
        assert_eq!(
            compare(
                &street,
                &[persistent(1, "10", 0.0, "oak st"), persistent(2, "10", 0.0, "main st")],
                &BasicTokenizer
            ),
            Action::Modify { persistent_id: 2 }
        );
        assert_eq!(
            compare(&street, &[persistent(1, "10", 0.0, "oak st")], &BasicTokenizer),
            Action::None
        );
    }

    #[tokio::test]
    async fn conflates_owned_lines() {
        let store = MemoryPersistentStore::new(vec![persistent(7, "10", 0.0, "main st")]);
        let sink = OutputSink::memory();

        let input = [
            format!("\u{1e}{}", line("10", 0.001, "Main St")),
            String::new(),
            line("12", 0.0, "Main St"),
            "not json".to_string(),
            line("10", 0.0, "Oak St"),
        ]
        .join("\n");

        let summary = run(
            ConflateOptions::new(0, 1).unwrap(),
            input.as_bytes(),
            &store,
            &BasicTokenizer,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            ConflateSummary {
                lines: 4,
                created: 1,
                modified: 1,
                unchanged: 1,
                skipped: 1,
            }
        );

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        let created: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(created["action"], json!("create"));
        assert_eq!(created["properties"]["number"], json!("12"));
        assert_eq!(created["properties"]["source"], json!("test"));
        assert_eq!(created["geometry"]["type"], json!("Point"));
    }

    #[tokio::test]
    async fn workers_split_the_stream() {
        let store = MemoryPersistentStore::default();
        let input: String = (0..5)
            .map(|i| line(&i.to_string(), 0.0, "Main St") + "\n")
            .collect();

        let mut total = 0;
        for id in 0..2 {
            let sink = OutputSink::memory();
            let summary = run(
                ConflateOptions::new(id, 2).unwrap(),
                input.as_bytes(),
                &store,
                &BasicTokenizer,
                &sink,
            )
            .await
            .unwrap();
            total += summary.created;
        }

        assert_eq!(total, 5);
    }
}
