#![no_main]

use felix_core::types::Tag;
use felix_iptables::restore::plan_remove;
use felix_iptables::save::parse_save;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    let Ok(tables) = parse_save(input) else {
        return;
    };

    // 파싱된 임의 상태에서도 제거 계획은 패닉 없이 만들어져야 한다
    let tag = Tag::default();
    for table in &tables {
        let _ = plan_remove(table, &tag).script.render();
    }
});
