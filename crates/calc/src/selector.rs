//! 셀렉터 언어 파서와 평가기
//!
//! # 문법
//! ```text
//! expr    := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | primary
//! primary := "(" expr ")"
//!          | "all()"
//!          | "has(" key ")"
//!          | key "==" string
//!          | key "!=" string
//!          | key "in" set
//!          | key "not" "in" set
//! set     := "{" [string ("," string)*] "}"
//! ```
//!
//! 문자열은 `"..."` 또는 `'...'`로 감쌉니다. 빈 셀렉터는 `all()`과 같습니다.
//!
//! # 사용 예시
//! ```
//! use std::collections::BTreeMap;
//! use felix_calc::selector::Selector;
//!
//! let sel = Selector::parse(r#"role == "db" && !has(legacy)"#).unwrap();
//! let labels = BTreeMap::from([("role".to_owned(), "db".to_owned())]);
//! assert!(sel.matches(&labels));
//! assert_eq!(sel.to_string(), r#"role == "db" && !has(legacy)"#);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::SelectorError;

/// 셀렉터 최대 길이 (바이트)
const MAX_SELECTOR_LEN: usize = 4096;

/// 최대 중첩 깊이
const MAX_DEPTH: usize = 64;

/// 라벨 조회 인터페이스
///
/// 프로파일 상속처럼 여러 라벨 집합을 겹쳐 보는 구현이 있어
/// 맵 대신 trait으로 평가합니다.
pub trait LabelSource {
    /// 라벨 값을 조회합니다.
    fn get(&self, key: &str) -> Option<&str>;
}

impl LabelSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }
}

/// 셀렉터 식
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// 모든 엔드포인트
    All,
    /// 라벨 키 존재
    Has(String),
    /// 라벨 값이 같음
    Eq(String, String),
    /// 라벨 값이 다름 (키가 없어도 참)
    Ne(String, String),
    /// 라벨 값이 집합에 속함
    In(String, BTreeSet<String>),
    /// 라벨 값이 집합에 속하지 않음 (키가 없어도 참)
    NotIn(String, BTreeSet<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn evaluate(&self, labels: &dyn LabelSource) -> bool {
        match self {
            Self::All => true,
            Self::Has(key) => labels.get(key).is_some(),
            Self::Eq(key, value) => labels.get(key) == Some(value.as_str()),
            Self::Ne(key, value) => labels.get(key) != Some(value.as_str()),
            Self::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Self::Not(inner) => !inner.evaluate(labels),
            Self::And(a, b) => a.evaluate(labels) && b.evaluate(labels),
            Self::Or(a, b) => a.evaluate(labels) || b.evaluate(labels),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all()"),
            Self::Has(key) => write!(f, "has({key})"),
            Self::Eq(key, value) => write!(f, "{key} == {}", quote(value)),
            Self::Ne(key, value) => write!(f, "{key} != {}", quote(value)),
            Self::In(key, values) => write!(f, "{key} in {}", format_set(values)),
            Self::NotIn(key, values) => write!(f, "{key} not in {}", format_set(values)),
            Self::Not(inner) => match inner.as_ref() {
                Self::And(..) | Self::Or(..) => write!(f, "!({inner})"),
                _ => write!(f, "!{inner}"),
            },
            // 괄호는 우선순위와 왼쪽 결합에 필요한 곳에만 (정규 표기 깊이 <= 입력 깊이)
            Self::And(a, b) => {
                write_operand(f, a, matches!(**a, Self::Or(..)))?;
                f.write_str(" && ")?;
                write_operand(f, b, matches!(**b, Self::And(..) | Self::Or(..)))
            }
            Self::Or(a, b) => {
                write!(f, "{a} || ")?;
                write_operand(f, b, matches!(**b, Self::Or(..)))
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, grouped: bool) -> fmt::Result {
    if grouped {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn quote(value: &str) -> String {
    if value.contains('"') {
        format!("'{value}'")
    } else {
        format!("\"{value}\"")
    }
}

fn format_set(values: &BTreeSet<String>) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{{{}}}", items.join(", "))
}

/// 파싱된 셀렉터
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    expr: Expr,
}

impl Selector {
    /// 모든 엔드포인트와 매칭되는 셀렉터
    pub fn all() -> Self {
        Self { expr: Expr::All }
    }

    /// 셀렉터 문자열을 파싱합니다.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        if input.len() > MAX_SELECTOR_LEN {
            return Err(SelectorError::new(
                0,
                format!(
                    "selector too long: {} bytes (max: {MAX_SELECTOR_LEN})",
                    input.len()
                ),
            ));
        }
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Self::all());
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
            end: input.len(),
        };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(SelectorError::new(
                tok.offset,
                format!("unexpected {}", tok.kind),
            ));
        }
        Ok(Self { expr })
    }

    /// 식 트리
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// 라벨 집합이 셀렉터와 매칭되는지 평가합니다.
    pub fn matches(&self, labels: &dyn LabelSource) -> bool {
        self.expr.evaluate(labels)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ─── Lexer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "identifier '{s}'"),
            Self::Str(s) => write!(f, "string \"{s}\""),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBrace => write!(f, "'{{'"),
            Self::RBrace => write!(f, "'}}'"),
            Self::Comma => write!(f, "','"),
            Self::EqEq => write!(f, "'=='"),
            Self::NotEq => write!(f, "'!='"),
            Self::Bang => write!(f, "'!'"),
            Self::AndAnd => write!(f, "'&&'"),
            Self::OrOr => write!(f, "'||'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

/// 현재 문자를 소비하고, 다음 문자가 `expect`이면 그것도 소비합니다.
fn pair(chars: &mut Peekable<CharIndices<'_>>, expect: char) -> bool {
    chars.next();
    if matches!(chars.peek(), Some(&(_, n)) if n == expect) {
        chars.next();
        true
    } else {
        false
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '{' => {
                chars.next();
                TokenKind::LBrace
            }
            '}' => {
                chars.next();
                TokenKind::RBrace
            }
            ',' => {
                chars.next();
                TokenKind::Comma
            }
            '=' if pair(&mut chars, '=') => TokenKind::EqEq,
            '=' => return Err(SelectorError::new(offset, "expected '=='")),
            '!' if pair(&mut chars, '=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '&' if pair(&mut chars, '&') => TokenKind::AndAnd,
            '&' => return Err(SelectorError::new(offset, "expected '&&'")),
            '|' if pair(&mut chars, '|') => TokenKind::OrOr,
            '|' => return Err(SelectorError::new(offset, "expected '||'")),
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(SelectorError::new(offset, "unterminated string literal"));
                }
                TokenKind::Str(value)
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_ident_char(ch) {
                        break;
                    }
                    ident.push(ch);
                    chars.next();
                }
                TokenKind::Ident(ident)
            }
            other => {
                return Err(SelectorError::new(
                    offset,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

// ─── Parser ────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    /// 입력 끝 오프셋 (토큰이 모자랄 때 에러 위치)
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    fn next(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SelectorError> {
        let offset = self.offset();
        match self.next() {
            Some(tok) if &tok.kind == kind => Ok(()),
            Some(tok) => Err(SelectorError::new(
                offset,
                format!("expected {kind}, found {}", tok.kind),
            )),
            None => Err(SelectorError::new(
                offset,
                format!("expected {kind}, found end of input"),
            )),
        }
    }

    fn enter(&mut self) -> Result<(), SelectorError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(SelectorError::new(
                self.offset(),
                format!("expression nested deeper than {MAX_DEPTH}"),
            ));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut lhs = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut lhs = self.parse_unary()?;
        while self.peek_kind() == Some(&TokenKind::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorError> {
        if self.peek_kind() == Some(&TokenKind::Bang) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorError> {
        let offset = self.offset();
        let Some(tok) = self.next().cloned() else {
            return Err(SelectorError::new(offset, "unexpected end of input"));
        };

        match tok.kind {
            TokenKind::LParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(ident) => {
                let is_call = self.peek_kind() == Some(&TokenKind::LParen);
                match ident.as_str() {
                    "all" if is_call => {
                        self.pos += 1;
                        self.expect(&TokenKind::RParen)?;
                        Ok(Expr::All)
                    }
                    "has" if is_call => {
                        self.pos += 1;
                        let key = self.parse_key()?;
                        self.expect(&TokenKind::RParen)?;
                        Ok(Expr::Has(key))
                    }
                    _ => self.parse_comparison(ident),
                }
            }
            other => Err(SelectorError::new(
                offset,
                format!("expected label key or '(', found {other}"),
            )),
        }
    }

    fn parse_key(&mut self) -> Result<String, SelectorError> {
        let offset = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::Ident(key),
                ..
            }) => Ok(key.clone()),
            Some(tok) => Err(SelectorError::new(
                offset,
                format!("expected label key, found {}", tok.kind),
            )),
            None => Err(SelectorError::new(offset, "expected label key")),
        }
    }

    fn parse_comparison(&mut self, key: String) -> Result<Expr, SelectorError> {
        let offset = self.offset();
        match self.next().map(|t| t.kind.clone()) {
            Some(TokenKind::EqEq) => Ok(Expr::Eq(key, self.parse_string()?)),
            Some(TokenKind::NotEq) => Ok(Expr::Ne(key, self.parse_string()?)),
            Some(TokenKind::Ident(op)) if op == "in" => Ok(Expr::In(key, self.parse_set()?)),
            Some(TokenKind::Ident(op)) if op == "not" => {
                let in_offset = self.offset();
                match self.next() {
                    Some(Token {
                        kind: TokenKind::Ident(word),
                        ..
                    }) if word == "in" => Ok(Expr::NotIn(key, self.parse_set()?)),
                    _ => Err(SelectorError::new(in_offset, "expected 'in' after 'not'")),
                }
            }
            Some(other) => Err(SelectorError::new(
                offset,
                format!("expected operator after '{key}', found {other}"),
            )),
            None => Err(SelectorError::new(
                offset,
                format!("expected operator after '{key}'"),
            )),
        }
    }

    fn parse_string(&mut self) -> Result<String, SelectorError> {
        let offset = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::Str(value),
                ..
            }) => Ok(value.clone()),
            Some(tok) => Err(SelectorError::new(
                offset,
                format!("expected string literal, found {}", tok.kind),
            )),
            None => Err(SelectorError::new(offset, "expected string literal")),
        }
    }

    fn parse_set(&mut self) -> Result<BTreeSet<String>, SelectorError> {
        self.expect(&TokenKind::LBrace)?;
        let mut values = BTreeSet::new();
        if self.peek_kind() == Some(&TokenKind::RBrace) {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            values.insert(self.parse_string()?);
            let offset = self.offset();
            match self.next().map(|t| t.kind.clone()) {
                Some(TokenKind::Comma) => continue,
                Some(TokenKind::RBrace) => return Ok(values),
                _ => return Err(SelectorError::new(offset, "expected ',' or '}' in set")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn all_matches_everything() {
        let sel = Selector::parse("all()").unwrap();
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn empty_selector_is_all() {
        assert_eq!(Selector::parse("   ").unwrap(), Selector::all());
    }

    #[test]
    fn has_and_not_has() {
        let has = Selector::parse("has(role)").unwrap();
        let not_has = Selector::parse("!has(role)").unwrap();
        let with = labels(&[("role", "db")]);
        let without = labels(&[("tier", "db")]);
        assert!(has.matches(&with));
        assert!(!has.matches(&without));
        assert!(!not_has.matches(&with));
        assert!(not_has.matches(&without));
    }

    #[test]
    fn equality_and_inequality() {
        let eq = Selector::parse(r#"role == "db""#).unwrap();
        let ne = Selector::parse("role != 'db'").unwrap();
        assert!(eq.matches(&labels(&[("role", "db")])));
        assert!(!eq.matches(&labels(&[("role", "web")])));
        assert!(!eq.matches(&labels(&[])));

        assert!(!ne.matches(&labels(&[("role", "db")])));
        assert!(ne.matches(&labels(&[("role", "web")])));
        assert!(ne.matches(&labels(&[])), "missing key satisfies !=");
    }

    #[test]
    fn set_membership() {
        let sel = Selector::parse(r#"env in {"prod", "staging"}"#).unwrap();
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[])));

        let not_in = Selector::parse(r#"env not in {"prod"}"#).unwrap();
        assert!(not_in.matches(&labels(&[("env", "dev")])));
        assert!(not_in.matches(&labels(&[])));
        assert!(!not_in.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn empty_set() {
        let sel = Selector::parse("env in {}").unwrap();
        assert!(!sel.matches(&labels(&[("env", "x")])));
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let sel = Selector::parse(r#"a == "1" || b == "1" && c == "1""#).unwrap();
        assert!(sel.matches(&labels(&[("a", "1")])));
        assert!(!sel.matches(&labels(&[("b", "1")])));
        assert!(sel.matches(&labels(&[("b", "1"), ("c", "1")])));

        let grouped = Selector::parse(r#"(a == "1" || b == "1") && c == "1""#).unwrap();
        assert!(!grouped.matches(&labels(&[("a", "1")])));
    }

    #[test]
    fn negation_of_group() {
        let sel = Selector::parse(r#"!(role == "db" || role == "cache")"#).unwrap();
        assert!(sel.matches(&labels(&[("role", "web")])));
        assert!(!sel.matches(&labels(&[("role", "cache")])));
    }

    #[test]
    fn keys_may_contain_dots_and_slashes() {
        let sel = Selector::parse(r#"projectcalico.org/namespace == "kube-system""#).unwrap();
        assert!(sel.matches(&labels(&[("projectcalico.org/namespace", "kube-system")])));
    }

    #[test]
    fn label_named_all_is_a_key() {
        let sel = Selector::parse(r#"all == "x""#).unwrap();
        assert!(sel.matches(&labels(&[("all", "x")])));
    }

    #[test]
    fn display_is_canonical_and_reparses() {
        let inputs = [
            "all()",
            "has(a)",
            "!has(a)",
            r#"a == "x""#,
            r#"a != "x""#,
            r#"a in {"y", "x"}"#,
            r#"a not in {"x"}"#,
            r#"!(a == "x")"#,
            r#"a == "1" && (b == "2" || !has(c))"#,
            r#"v == 'say "hi"'"#,
        ];
        for input in inputs {
            let sel = Selector::parse(input).unwrap();
            let canonical = sel.to_string();
            let reparsed = Selector::parse(&canonical).unwrap();
            assert_eq!(sel, reparsed, "round trip failed for {input} -> {canonical}");
            assert_eq!(canonical, reparsed.to_string());
        }
    }

    #[test]
    fn display_uses_minimal_parentheses() {
        let cases = [
            (r#"a == "1" && b == "2" && c == "3""#, r#"a == "1" && b == "2" && c == "3""#),
            (r#"(a == "1" || b == "2") && has(c)"#, r#"(a == "1" || b == "2") && has(c)"#),
            (r#"has(a) || (has(b) && has(c))"#, "has(a) || has(b) && has(c)"),
            (r#"has(a) && (has(b) && has(c))"#, "has(a) && (has(b) && has(c))"),
            (r#"!(has(a) || has(b))"#, "!(has(a) || has(b))"),
            (r#"!(a == "x")"#, r#"!a == "x""#),
        ];
        for (input, expected) in cases {
            assert_eq!(Selector::parse(input).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn long_chains_stay_reparseable() {
        let input = (0..200)
            .map(|i| format!("k{i} == \"v\""))
            .collect::<Vec<_>>()
            .join(" && ");
        let sel = Selector::parse(&input).unwrap();
        assert_eq!(Selector::parse(&sel.to_string()).unwrap(), sel);
    }

    #[test]
    fn display_sorts_set_members() {
        let sel = Selector::parse(r#"a in {"z", "b", "m"}"#).unwrap();
        assert_eq!(sel.to_string(), r#"a in {"b", "m", "z"}"#);
    }

    #[test]
    fn error_reports_offset() {
        let err = Selector::parse(r#"role == db"#).unwrap_err();
        assert_eq!(err.offset, 8);
        assert!(err.reason.contains("string literal"));

        let err = Selector::parse(r#"role = "db""#).unwrap_err();
        assert_eq!(err.offset, 5);

        let err = Selector::parse(r#"role == "db"#).unwrap_err();
        assert!(err.reason.contains("unterminated"));
    }

    #[test]
    fn errors_on_trailing_and_missing_tokens() {
        assert!(Selector::parse("has(a) has(b)").is_err());
        assert!(Selector::parse("has(a) &&").is_err());
        assert!(Selector::parse("(has(a)").is_err());
        assert!(Selector::parse("a not {\"x\"}").is_err());
        assert!(Selector::parse("a in {\"x\" \"y\"}").is_err());
        assert!(Selector::parse("role").is_err());
        assert!(Selector::parse("a == \"x\" $").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let input = format!("{}all(){}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(Selector::parse(&input).is_err());

        let ok = format!("{}all(){}", "(".repeat(10), ")".repeat(10));
        assert!(Selector::parse(&ok).is_ok());
    }

    #[test]
    fn oversized_input_is_rejected() {
        let input = "a".repeat(MAX_SELECTOR_LEN + 1);
        assert!(Selector::parse(&input).is_err());
    }
}
