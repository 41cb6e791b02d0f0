//! Triple datasets: TSV parsing, vocabularies and id batches.
//!
//! Files hold one `head\trelation\ttail` triple per line. Lines starting
//! with `#` and blank lines are skipped.
//!
//! ```text
//! # user    relation   item
//! u1        likes      i7
//! u1        viewed     i3
//! ```
//!
//! The vocabulary is built from the training split only. Validation and test
//! triples must use entities and relations seen during training, since the
//! model has no embedding for anything else.

use crate::error::{Error, Result};
use crate::model::input_tensor;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A `(head, relation, tail)` triple of string labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub head: String,
    pub relation: String,
    pub tail: String,
}

impl Triple {
    pub fn new(head: impl Into<String>, relation: impl Into<String>, tail: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }
}

/// A triple of vocabulary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleIds {
    pub head: u32,
    pub relation: u32,
    pub tail: u32,
}

impl TripleIds {
    pub fn new(head: u32, relation: u32, tail: u32) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }

    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.head, self.relation, self.tail)
    }
}

/// Bidirectional label <-> id maps for entities and relations.
///
/// Ids are assigned in order of first appearance. Only the label lists are
/// serialized; the lookup indexes are rebuilt on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "VocabLabels")]
pub struct Vocab {
    entities: Vec<String>,
    relations: Vec<String>,
    #[serde(skip)]
    entity_index: HashMap<String, u32>,
    #[serde(skip)]
    relation_index: HashMap<String, u32>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vocabulary from labelled triples.
    pub fn from_triples(triples: &[Triple]) -> Self {
        let mut vocab = Self::new();
        for t in triples {
            vocab.add_entity(&t.head);
            vocab.add_relation(&t.relation);
            vocab.add_entity(&t.tail);
        }
        vocab
    }

    /// Insert an entity, returning its id.
    pub fn add_entity(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.entity_index.get(label) {
            return id;
        }
        let id = self.entities.len() as u32;
        self.entities.push(label.to_string());
        self.entity_index.insert(label.to_string(), id);
        id
    }

    /// Insert a relation, returning its id.
    pub fn add_relation(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.relation_index.get(label) {
            return id;
        }
        let id = self.relations.len() as u32;
        self.relations.push(label.to_string());
        self.relation_index.insert(label.to_string(), id);
        id
    }

    pub fn entity_id(&self, label: &str) -> Option<u32> {
        self.entity_index.get(label).copied()
    }

    pub fn relation_id(&self, label: &str) -> Option<u32> {
        self.relation_index.get(label).copied()
    }

    pub fn entity_label(&self, id: u32) -> Option<&str> {
        self.entities.get(id as usize).map(String::as_str)
    }

    pub fn relation_label(&self, id: u32) -> Option<&str> {
        self.relations.get(id as usize).map(String::as_str)
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }

    /// Map a labelled triple to ids, failing on unknown labels.
    pub fn encode(&self, triple: &Triple) -> Result<TripleIds> {
        let entity = |label: &str| {
            self.entity_id(label)
                .ok_or_else(|| Error::NotFound(format!("entity '{}'", label)))
        };
        let relation = self
            .relation_id(&triple.relation)
            .ok_or_else(|| Error::NotFound(format!("relation '{}'", triple.relation)))?;
        Ok(TripleIds::new(entity(&triple.head)?, relation, entity(&triple.tail)?))
    }
}

/// Serialized form of [`Vocab`]: the label lists in id order.
#[derive(Deserialize)]
struct VocabLabels {
    entities: Vec<String>,
    relations: Vec<String>,
}

impl From<VocabLabels> for Vocab {
    fn from(labels: VocabLabels) -> Self {
        let mut vocab = Self::new();
        for label in &labels.entities {
            vocab.add_entity(label);
        }
        for label in &labels.relations {
            vocab.add_relation(label);
        }
        vocab
    }
}

/// Train/validation/test splits encoded against one vocabulary.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub vocab: Vocab,
    pub train: Vec<TripleIds>,
    pub valid: Vec<TripleIds>,
    pub test: Vec<TripleIds>,
    /// Sorted, deduplicated tail ids of the training split.
    pub items: Vec<u32>,
}

impl Dataset {
    /// Encode labelled splits; the vocabulary comes from `train`.
    pub fn from_triples(train: &[Triple], valid: &[Triple], test: &[Triple]) -> Result<Self> {
        if train.is_empty() {
            return Err(Error::Validation("training split is empty".into()));
        }
        let vocab = Vocab::from_triples(train);
        let encode_all = |split: &[Triple]| -> Result<Vec<TripleIds>> {
            split.iter().map(|t| vocab.encode(t)).collect()
        };
        let train = encode_all(train)?;
        let valid = encode_all(valid)?;
        let test = encode_all(test)?;
        let items = collect_items(&train);

        Ok(Self {
            vocab,
            train,
            valid,
            test,
            items,
        })
    }

    /// Load splits from TSV files. Missing validation/test files give empty splits.
    pub fn from_tsv_files(train: &Path, valid: Option<&Path>, test: Option<&Path>) -> Result<Self> {
        let read_opt = |path: Option<&Path>| -> Result<Vec<Triple>> {
            match path {
                Some(p) => read_tsv(p),
                None => Ok(Vec::new()),
            }
        };
        let train = read_tsv(train)?;
        let valid = read_opt(valid)?;
        let test = read_opt(test)?;
        tracing::info!(
            "loaded {} train, {} valid, {} test triples",
            train.len(),
            valid.len(),
            test.len()
        );
        Self::from_triples(&train, &valid, &test)
    }

    /// Every known triple across all splits, for filtered ranking.
    pub fn all_triples(&self) -> impl Iterator<Item = &TripleIds> {
        self.train.iter().chain(&self.valid).chain(&self.test)
    }

    pub fn num_entities(&self) -> usize {
        self.vocab.num_entities()
    }

    pub fn num_relations(&self) -> usize {
        self.vocab.num_relations()
    }
}

fn collect_items(triples: &[TripleIds]) -> Vec<u32> {
    triples
        .iter()
        .map(|t| t.tail)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Read a TSV triple file.
pub fn read_tsv(path: &Path) -> Result<Vec<Triple>> {
    let file = File::open(path)?;
    parse_tsv(BufReader::new(file))
}

/// Parse TSV triples from any reader. Line numbers in errors are 1-based.
pub fn parse_tsv(reader: impl BufRead) -> Result<Vec<Triple>> {
    let mut triples = Vec::new();
    let mut skipped = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            skipped += 1;
            continue;
        }

        let fields: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
        match fields.as_slice() {
            [h, r, t] if !h.is_empty() && !r.is_empty() && !t.is_empty() => {
                triples.push(Triple::new(*h, *r, *t));
            }
            _ => {
                return Err(Error::Parse {
                    line: idx + 1,
                    message: format!("expected 3 tab-separated fields, got {}", fields.len()),
                })
            }
        }
    }
    if skipped > 0 {
        tracing::debug!("skipped {} comment/blank lines", skipped);
    }
    Ok(triples)
}

/// Build a `B x 3` input batch from id triples.
pub fn to_tensor(triples: &[TripleIds], device: &Device) -> Result<Tensor> {
    let tuples: Vec<(u32, u32, u32)> = triples.iter().map(TripleIds::as_tuple).collect();
    input_tensor(&tuples, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

    fn toy_triples() -> Vec<Triple> {
        vec![
            Triple::new("u1", "likes", "i1"),
            Triple::new("u1", "likes", "i2"),
            Triple::new("u2", "viewed", "i1"),
        ]
    }

    #[test]
    fn test_parse_tsv_skips_comments_and_blanks() {
        let text = "# header\nu1\tlikes\ti1\n\n  \nu2\tviewed\ti3\n";
        let triples = parse_tsv(Cursor::new(text)).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[1], Triple::new("u2", "viewed", "i3"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_tsv_logs_skipped_lines() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let text = "# header\nu1\tlikes\ti1\n\n# note\nu2\tviewed\ti3\n";
        let triples = tracing::subscriber::with_default(subscriber, || {
            parse_tsv(Cursor::new(text)).unwrap()
        });
        assert_eq!(triples.len(), 2);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("skipped 3 comment/blank lines"), "{}", output);
    }

    #[test]
    fn test_parse_tsv_reports_line_number() {
        let text = "u1\tlikes\ti1\nbroken line\n";
        match parse_tsv(Cursor::new(text)) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_vocab_assigns_ids_in_order() {
        let vocab = Vocab::from_triples(&toy_triples());
        assert_eq!(vocab.num_entities(), 4);
        assert_eq!(vocab.num_relations(), 2);
        assert_eq!(vocab.entity_id("u1"), Some(0));
        assert_eq!(vocab.entity_id("i1"), Some(1));
        assert_eq!(vocab.relation_label(1), Some("viewed"));
        assert_eq!(vocab.entity_id("nobody"), None);
    }

    #[test]
    fn test_vocab_serde_round_trip_keeps_lookups() {
        let vocab = Vocab::from_triples(&toy_triples());
        let json = serde_json::to_string(&vocab).unwrap();
        let restored: Vocab = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
        assert_eq!(restored.entity_id("u1"), Some(0));
        assert_eq!(restored.entity_id("i2"), Some(2));
        assert_eq!(restored.relation_id("viewed"), Some(1));
        assert_eq!(
            restored.encode(&Triple::new("u2", "likes", "i1")).unwrap(),
            TripleIds::new(3, 0, 1)
        );
    }

    #[test]
    fn test_dataset_items_sorted_unique() {
        let data = Dataset::from_triples(&toy_triples(), &[], &[]).unwrap();
        // i1 = 1, i2 = 2
        assert_eq!(data.items, vec![1, 2]);
        assert_eq!(data.train.len(), 3);
    }

    #[test]
    fn test_dataset_rejects_unknown_test_entity() {
        let test = vec![Triple::new("u3", "likes", "i1")];
        let err = Dataset::from_triples(&toy_triples(), &[], &test).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_dataset_rejects_empty_train() {
        assert!(Dataset::from_triples(&[], &[], &[]).is_err());
    }

    #[test]
    fn test_to_tensor_layout() {
        let triples = [TripleIds::new(0, 1, 2), TripleIds::new(3, 0, 4)];
        let t = to_tensor(&triples, &Device::Cpu).unwrap();
        assert_eq!(t.to_vec2::<u32>().unwrap(), vec![vec![0, 1, 2], vec![3, 0, 4]]);
    }
}
