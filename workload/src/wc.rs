//! Word count.

use anyhow::Result;

use common::KeyValue;

/// Emits `(word, "1")` for every maximal run of letters.
pub fn map(_filename: &str, contents: &str) -> Result<Vec<KeyValue>> {
    Ok(contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect())
}

pub fn reduce(_key: &str, values: &[String]) -> Result<String> {
    let mut count = 0u64;
    for value in values {
        count += value.parse::<u64>()?;
    }
    Ok(count.to_string())
}
