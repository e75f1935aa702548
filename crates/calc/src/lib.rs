//! 정책 셀렉터를 로컬 엔드포인트에 대응시키고, 어떤 정책/프로파일이 활성인지 계산합니다.
//!
//! # 모듈
//!
//! - `selector`: 셀렉터 언어 파서와 평가기 (`all()`, `has(k)`, `k == "v"`, `k in {..}`, `!`, `&&`, `||`)
//! - `label_index`: 셀렉터와 엔드포인트 라벨의 매칭 인덱스 (프로파일 라벨 상속 포함)
//! - `active_rules`: 활성 정책/프로파일 계산기와 이벤트를 누적하는 스냅샷
//!
//! # 이벤트 흐름
//!
//! ```text
//! Update ──> ActiveRulesCalculator ──> LabelIndex ──> MatchEvent
//!                     │
//!                     └──> RuleEvent (PolicyActive, ProfileInactive, PolicyMatch, ...)
//!                                 │
//!                                 ▼
//!                           ActiveRules (생성기가 읽는 스냅샷)
//! ```

pub mod active_rules;
pub mod error;
pub mod label_index;
pub mod selector;

pub use active_rules::{
    ActiveRules, ActiveRulesCalculator, EndpointKey, ProfileRules, RuleEvent, Update,
};
pub use error::{CalcError, SelectorError};
pub use label_index::{LabelIndex, MatchEvent};
pub use selector::{Expr, LabelSource, Selector};
