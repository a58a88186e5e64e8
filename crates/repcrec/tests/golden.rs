//! Replays every `tests/data/*.in` script and compares with its `.ans`.

mod common;

use repcrec::verify;
use repcrec_core::txn::SimConfig;

#[test]
fn transcripts_match_answers() {
    let cases = verify::discover(&common::data_dir()).expect("discover cases");
    assert!(!cases.is_empty(), "no cases under {}", common::data_dir().display());
    for case in &cases {
        let result = verify::check(case, &SimConfig::default()).expect("run case");
        if let Some(mismatch) = result.mismatch {
            panic!(
                "{} mismatch\n--- expected\n{}\n--- actual\n{}",
                case.name, mismatch.expected, mismatch.actual
            );
        }
    }
}
