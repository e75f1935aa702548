//! 메모리 내 iptables 시뮬레이터
//!
//! [`IptablesRunner`]를 구현하여 `iptables-save` 출력을 만들고
//! `iptables-restore --noflush` 스크립트를 트랜잭션으로 적용합니다.
//! 호스트를 건드리지 않고 백엔드와 정리 도구의 동작을 검증하는 데 씁니다.
//!
//! 지원하는 명령: `*table`, `:chain policy [c]`, `-A`, `-I`, `-D`, `-F`, `-N`, `-X`, `COMMIT`.
//! 실패한 트랜잭션은 상태를 바꾸지 않습니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use felix_core::types::IpVersion;
use tokio::sync::Mutex;

use crate::error::RunnerError;
use crate::runner::IptablesRunner;
use crate::save::{parse_save, quote_arg, split_args};

const BUILTIN_FILTER_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimChain {
    name: String,
    policy: Option<String>,
    rules: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimTable {
    chains: Vec<SimChain>,
}

impl SimTable {
    fn filter() -> Self {
        Self {
            chains: BUILTIN_FILTER_CHAINS
                .iter()
                .map(|name| SimChain {
                    name: (*name).to_owned(),
                    policy: Some("ACCEPT".to_owned()),
                    rules: Vec::new(),
                })
                .collect(),
        }
    }

    fn chain(&self, name: &str) -> Option<&SimChain> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn chain_mut(&mut self, name: &str) -> Result<&mut SimChain, String> {
        self.chains
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| format!("chain '{name}' does not exist"))
    }

    fn is_referenced(&self, name: &str) -> bool {
        self.chains
            .iter()
            .flat_map(|c| c.rules.iter())
            .any(|rule| target_of(rule) == Some(name))
    }

    fn check_target(&self, rule: &[String]) -> Result<(), String> {
        match target_of(rule) {
            Some(target) if !is_extension_target(target) && self.chain(target).is_none() => {
                Err(format!("target chain '{target}' does not exist"))
            }
            _ => Ok(()),
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        out.push_str(&format!("*{name}\n"));
        let mut ordered: Vec<&SimChain> = self.chains.iter().filter(|c| c.policy.is_some()).collect();
        let mut user: Vec<&SimChain> = self.chains.iter().filter(|c| c.policy.is_none()).collect();
        user.sort_by(|a, b| a.name.cmp(&b.name));
        ordered.extend(user);

        for chain in &ordered {
            let policy = chain.policy.as_deref().unwrap_or("-");
            out.push_str(&format!(":{} {policy} [0:0]\n", chain.name));
        }
        for chain in &ordered {
            for rule in &chain.rules {
                let spec: Vec<String> = rule.iter().map(|a| quote_arg(a)).collect();
                out.push_str(&format!("-A {} {}\n", chain.name, spec.join(" ")));
            }
        }
        out.push_str("COMMIT\n");
    }
}

fn target_of(rule: &[String]) -> Option<&str> {
    rule.windows(2)
        .rev()
        .find(|w| w[0] == "-j" || w[0] == "-g")
        .map(|w| w[1].as_str())
}

/// 대문자로만 된 대상은 ACCEPT, DROP, LOG 같은 확장 대상으로 봅니다.
fn is_extension_target(target: &str) -> bool {
    target.chars().all(|c| c.is_ascii_uppercase())
}

#[derive(Debug, Default)]
struct SimState {
    tables: BTreeMap<(IpVersion, String), SimTable>,
    restores: Vec<(IpVersion, String)>,
    fail_save: Option<RunnerError>,
    fail_restore: Option<RunnerError>,
}

fn initial_state() -> SimState {
    let mut state = SimState::default();
    for version in [IpVersion::V4, IpVersion::V6] {
        state
            .tables
            .insert((version, "filter".to_owned()), SimTable::filter());
    }
    state
}

impl SimState {
    fn table(&self, ip_version: IpVersion, name: &str) -> Option<&SimTable> {
        self.tables.get(&(ip_version, name.to_owned()))
    }
}

/// 시뮬레이션된 iptables
///
/// 복제본은 같은 상태를 공유합니다.
#[derive(Debug, Clone)]
pub struct SimulatedIptables {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedIptables {
    /// IPv4/IPv6 filter 테이블에 내장 체인만 있는 호스트
    pub fn new() -> Self {
        Self::from_state(initial_state())
    }

    /// iptables-save 형식 텍스트로 테이블을 채운 호스트
    pub fn with_saved(ip_version: IpVersion, saved: &str) -> Result<Self, RunnerError> {
        let tables = parse_save(saved).map_err(|e| invalid_input(e.to_string()))?;
        let mut state = initial_state();
        for table in tables {
            let mut chains: Vec<SimChain> = table
                .chains
                .into_iter()
                .map(|c| SimChain {
                    name: c.name,
                    policy: c.policy,
                    rules: Vec::new(),
                })
                .collect();
            for rule in table.rules {
                if let Some(chain) = chains.iter_mut().find(|c| c.name == rule.chain) {
                    chain.rules.push(rule.args);
                }
            }
            state
                .tables
                .insert((ip_version, table.name), SimTable { chains });
        }
        Ok(Self::from_state(state))
    }

    fn from_state(state: SimState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 이후 save 호출이 실패하도록 설정합니다.
    pub async fn fail_save_with(&self, err: RunnerError) {
        self.state.lock().await.fail_save = Some(err);
    }

    /// 이후 restore 호출이 실패하도록 설정합니다.
    pub async fn fail_restore_with(&self, err: RunnerError) {
        self.state.lock().await.fail_restore = Some(err);
    }

    /// 실패 설정을 지웁니다.
    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.fail_save = None;
        state.fail_restore = None;
    }

    /// 성공한 restore 스크립트 목록
    pub async fn restores(&self) -> Vec<(IpVersion, String)> {
        self.state.lock().await.restores.clone()
    }

    /// 체인 이름 목록 (선언 순서)
    pub async fn chains(&self, ip_version: IpVersion, table: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .table(ip_version, table)
            .map(|t| t.chains.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// 체인의 규칙을 `-A` 뒤 명세 문자열로 반환합니다.
    pub async fn rules(&self, ip_version: IpVersion, table: &str, chain: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .table(ip_version, table)
            .and_then(|t| t.chain(chain))
            .map(|c| {
                c.rules
                    .iter()
                    .map(|r| r.iter().map(|a| quote_arg(a)).collect::<Vec<_>>().join(" "))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// iptables-save 형식 덤프
    pub async fn dump(&self, ip_version: IpVersion) -> String {
        let state = self.state.lock().await;
        let mut out = String::new();
        for ((version, name), table) in &state.tables {
            if *version == ip_version {
                table.render(name, &mut out);
            }
        }
        out
    }
}

impl IptablesRunner for SimulatedIptables {
    async fn save(&self, ip_version: IpVersion, table: &str) -> Result<String, RunnerError> {
        let state = self.state.lock().await;
        if let Some(err) = &state.fail_save {
            return Err(err.clone());
        }
        let mut out = String::from("# Generated by felix simulator\n");
        if let Some(sim) = state.table(ip_version, table) {
            sim.render(table, &mut out);
        }
        Ok(out)
    }

    async fn restore(&self, ip_version: IpVersion, script: &str) -> Result<(), RunnerError> {
        let mut state = self.state.lock().await;
        if let Some(err) = &state.fail_restore {
            return Err(err.clone());
        }
        let mut staged = state.tables.clone();
        apply_script(&mut staged, ip_version, script)?;
        state.tables = staged;
        state.restores.push((ip_version, script.to_owned()));
        Ok(())
    }
}

fn invalid_input(reason: String) -> RunnerError {
    RunnerError::Failed {
        program: "iptables-restore".to_owned(),
        status: 2,
        stderr: reason,
    }
}

fn line_failed(line: usize, reason: &str) -> RunnerError {
    invalid_input(format!("iptables-restore: line {line} failed: {reason}"))
}

fn apply_script(
    tables: &mut BTreeMap<(IpVersion, String), SimTable>,
    ip_version: IpVersion,
    script: &str,
) -> Result<(), RunnerError> {
    let mut open: Option<(String, SimTable)> = None;
    let mut last_line = 0;

    for (idx, raw) in script.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('*') {
            if open.is_some() {
                return Err(line_failed(line_no, "table not committed"));
            }
            let table = tables
                .get(&(ip_version, name.to_owned()))
                .cloned()
                .unwrap_or(SimTable { chains: Vec::new() });
            open = Some((name.to_owned(), table));
            continue;
        }

        let Some((name, table)) = open.as_mut() else {
            return Err(line_failed(line_no, "no table selected"));
        };

        if line == "COMMIT" {
            tables.insert((ip_version, name.clone()), table.clone());
            open = None;
            continue;
        }

        apply_line(table, line).map_err(|reason| line_failed(line_no, &reason))?;
    }

    if open.is_some() {
        return Err(line_failed(last_line, "missing COMMIT"));
    }
    Ok(())
}

fn apply_line(table: &mut SimTable, line: &str) -> Result<(), String> {
    if let Some(decl) = line.strip_prefix(':') {
        let mut parts = decl.split_whitespace();
        let name = parts.next().ok_or("missing chain name")?;
        let policy = parts.next().ok_or("missing policy")?;
        match table.chains.iter_mut().find(|c| c.name == name) {
            Some(chain) if chain.policy.is_some() => {
                if policy != "-" {
                    chain.policy = Some(policy.to_owned());
                }
            }
            Some(chain) => chain.rules.clear(),
            None => table.chains.push(SimChain {
                name: name.to_owned(),
                policy: None,
                rules: Vec::new(),
            }),
        }
        return Ok(());
    }

    let args = split_args(line, 0, 0).map_err(|e| e.reason)?;
    let (command, rest) = args.split_first().ok_or("empty command")?;
    match command.as_str() {
        "-A" => {
            let (chain, rule) = rest.split_first().ok_or("missing chain")?;
            table.check_target(rule)?;
            table.chain_mut(chain)?.rules.push(rule.to_vec());
        }
        "-I" => {
            let (chain, rest) = rest.split_first().ok_or("missing chain")?;
            let (position, rule) = match rest.first().map(|p| p.parse::<usize>()) {
                Some(Ok(position)) => (position, &rest[1..]),
                _ => (1, rest),
            };
            table.check_target(rule)?;
            let chain = table.chain_mut(chain)?;
            if position == 0 || position > chain.rules.len() + 1 {
                return Err(format!("index {position} out of range"));
            }
            chain.rules.insert(position - 1, rule.to_vec());
        }
        "-D" => {
            let (chain, rule) = rest.split_first().ok_or("missing chain")?;
            let chain = table.chain_mut(chain)?;
            let index = match rule {
                [n] if n.parse::<usize>().is_ok() => n
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .filter(|i| *i < chain.rules.len()),
                _ => chain.rules.iter().position(|r| r.as_slice() == rule),
            };
            let index = index.ok_or("no matching rule")?;
            chain.rules.remove(index);
        }
        "-F" => match rest.first() {
            Some(chain) => table.chain_mut(chain)?.rules.clear(),
            None => table.chains.iter_mut().for_each(|c| c.rules.clear()),
        },
        "-N" => {
            let chain = rest.first().ok_or("missing chain")?;
            if table.chain(chain).is_some() {
                return Err(format!("chain '{chain}' already exists"));
            }
            table.chains.push(SimChain {
                name: chain.clone(),
                policy: None,
                rules: Vec::new(),
            });
        }
        "-X" => {
            let name = rest.first().ok_or("missing chain")?;
            let chain = table
                .chain(name)
                .ok_or_else(|| format!("chain '{name}' does not exist"))?;
            if chain.policy.is_some() {
                return Err(format!("cannot delete built-in chain '{name}'"));
            }
            if !chain.rules.is_empty() {
                return Err(format!("chain '{name}' is not empty"));
            }
            if table.is_referenced(name) {
                return Err(format!("chain '{name}' is still referenced"));
            }
            table.chains.retain(|c| c.name != *name);
        }
        other => return Err(format!("unknown command '{other}'")),
    }
    Ok(())
}
