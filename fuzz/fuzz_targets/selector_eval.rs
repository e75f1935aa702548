#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use felix_calc::Selector;
use libfuzzer_sys::fuzz_target;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    selector: String,
    /// 엔드포인트 레이블 (키/값 쌍)
    labels: Vec<(String, String)>,
}

fuzz_target!(|input: FuzzInput| {
    if input.selector.len() > 1024 {
        return;
    }
    let Ok(selector) = Selector::parse(&input.selector) else {
        return;
    };
    let labels: BTreeMap<String, String> = input.labels.into_iter().take(16).collect();

    // 정규 표기로 다시 파싱해도 평가 결과가 같아야 한다
    let reparsed = Selector::parse(&selector.to_string()).expect("canonical form must parse");
    assert_eq!(selector.matches(&labels), reparsed.matches(&labels));
});
