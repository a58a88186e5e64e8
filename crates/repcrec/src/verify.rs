//! Golden-file checks: every `NAME.in` script in a directory is run and its
//! transcript compared with the sibling `NAME.ans`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use repcrec_core::txn::SimConfig;

/// One `.in`/`.ans` pair.
#[derive(Clone, Debug)]
pub struct Case {
    pub name: String,
    pub input: PathBuf,
    pub expected: PathBuf,
}

#[derive(Clone, Debug)]
pub struct CaseResult {
    pub case: Case,
    /// `None` when the transcript matched.
    pub mismatch: Option<Mismatch>,
}

#[derive(Clone, Debug)]
pub struct Mismatch {
    pub expected: String,
    pub actual: String,
}

/// `.in` files in `dir` that have a matching `.ans`, sorted by name.
pub fn discover(dir: &Path) -> anyhow::Result<Vec<Case>> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    let mut cases = Vec::new();
    for entry in entries {
        let path = entry.context("read dir entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("in") {
            continue;
        }
        let expected = path.with_extension("ans");
        if !expected.is_file() {
            tracing::warn!(input = %path.display(), "no .ans file, skipping");
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        cases.push(Case {
            name,
            input: path,
            expected,
        });
    }
    cases.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(cases)
}

pub fn check(case: &Case, config: &SimConfig) -> anyhow::Result<CaseResult> {
    let script = fs::read_to_string(&case.input)
        .with_context(|| format!("read {}", case.input.display()))?;
    let expected = fs::read_to_string(&case.expected)
        .with_context(|| format!("read {}", case.expected.display()))?;
    let actual = crate::run_to_string(&script, config)?;
    let mismatch = (normalize(&actual) != normalize(&expected)).then(|| Mismatch {
        expected,
        actual,
    });
    Ok(CaseResult {
        case: case.clone(),
        mismatch,
    })
}

/// Trim the whole transcript and each line; line endings are unified.
fn normalize(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ignores_trailing_whitespace() {
        assert_eq!(normalize("T1 commits  \r\nx2: 20\n\n"), "T1 commits\nx2: 20");
    }
}
