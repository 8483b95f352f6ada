//! Inverted index: for every word, the sorted list of documents that
//! contain it.

use anyhow::Result;
use itertools::Itertools;

use common::KeyValue;

/// Emits `(word, filename)` once per distinct word in the document.
pub fn map(filename: &str, contents: &str) -> Result<Vec<KeyValue>> {
    Ok(contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .unique()
        .map(|word| KeyValue::new(word, filename))
        .collect())
}

/// Produces `"<count> <doc1>,<doc2>,..."` with documents sorted and deduplicated.
pub fn reduce(_key: &str, values: &[String]) -> Result<String> {
    let docs: Vec<&String> = values.iter().sorted().dedup().collect();
    Ok(format!("{} {}", docs.len(), docs.iter().join(",")))
}
