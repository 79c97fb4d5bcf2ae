//! Corpus loading for the bundled section index.

use anyhow::Context;
use deepsift_core::{InferenceChunk, InferenceSection};
use serde::Deserialize;
use std::path::Path;

/// One corpus record: a full section, or a bare chunk wrapped into one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusEntry {
    Section(InferenceSection),
    Chunk(InferenceChunk),
}

impl From<CorpusEntry> for InferenceSection {
    fn from(entry: CorpusEntry) -> Self {
        match entry {
            CorpusEntry::Section(section) => section,
            CorpusEntry::Chunk(chunk) => InferenceSection::from_chunk(chunk),
        }
    }
}

/// Read sections from a `.json` array or a `.jsonl` file.
pub fn load_corpus(path: &Path) -> anyhow::Result<Vec<InferenceSection>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;
    parse_corpus(&raw, is_json_lines(path))
        .with_context(|| format!("Invalid corpus {}", path.display()))
}

fn is_json_lines(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
}

fn parse_corpus(raw: &str, json_lines: bool) -> anyhow::Result<Vec<InferenceSection>> {
    let entries: Vec<CorpusEntry> = if json_lines {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", n + 1))
            })
            .collect::<anyhow::Result<_>>()?
    } else {
        serde_json::from_str(raw)?
    };
    Ok(entries.into_iter().map(InferenceSection::from).collect())
}
