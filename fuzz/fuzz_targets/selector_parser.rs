#![no_main]

use felix_calc::Selector;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // 패닉 없이 Ok 또는 Err을 반환해야 한다
    let Ok(selector) = Selector::parse(input) else {
        return;
    };

    // 정규 표기는 공백이 늘어나므로 길이 한도에 걸리지 않는 입력만 비교
    if input.len() > 1024 {
        return;
    }
    let canonical = selector.to_string();
    let reparsed = Selector::parse(&canonical).expect("canonical form must parse");
    assert_eq!(reparsed, selector);
});
