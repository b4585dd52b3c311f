#![allow(dead_code)]

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

use stagehand::RuleTable;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Short names over a tiny alphabet, so rule patterns actually hit.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[abcx_]{0,12}"
}

pub fn arb_rule_table() -> impl Strategy<Value = RuleTable> {
    prop::collection::vec(("[abc_]{1,3}", "[abcx]{0,3}"), 1..5).prop_map(|pairs| {
        RuleTable::from_pairs(pairs.iter().map(|(p, r)| (p.as_str(), r.as_str())))
            .expect("generated rules are non-empty")
    })
}

/// One staged entry: a directory path (possibly empty) and a file stem.
#[derive(Clone, Debug)]
pub struct StagedFile {
    pub dir: Vec<String>,
    pub stem: String,
    pub extension: &'static str,
}

impl StagedFile {
    pub fn relative_path(&self, index: usize) -> String {
        let mut parts = self.dir.clone();
        parts.push(format!("{}_{}{}", self.stem, index, self.extension));
        parts.join("/")
    }
}

pub fn arb_staged_file() -> impl Strategy<Value = StagedFile> {
    (
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..3),
        "[a-z]{1,6}",
        prop::sample::select(vec![".tflite", ".onnx", ".pb", ".tflite.bak", ".yaml"]),
    )
        .prop_map(|(dir, stem, extension)| StagedFile {
            dir: dir.into_iter().map(str::to_string).collect(),
            stem,
            extension,
        })
}

pub fn arb_staging_tree() -> impl Strategy<Value = Vec<StagedFile>> {
    prop::collection::vec(arb_staged_file(), 0..16)
}
