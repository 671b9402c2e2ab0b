//! TPM state via `tpm_manager_client`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, Result};

pub const TPM_MANAGER_CMD: &str = "/usr/bin/tpm_manager_client";
pub const TPM_VERSION_CMD: &str = "tpm_version";

static ENABLED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"enabled: (true|false)").expect("INVARIANT: static regex is valid"));
static OWNED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"owned: (true|false)").expect("INVARIANT: static regex is valid"));
static PASSWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"owner_password: (\w*)").expect("INVARIANT: static regex is valid"));
static SPEC_REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Spec Revision: +(\d+)").expect("INVARIANT: static regex is valid"));

/// Ownership state reported by `tpm_manager_client status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmStatus {
    pub enabled: bool,
    pub owned: bool,
    /// Enabled and owned
    pub ready: bool,
}

/// A value reported by `tpm_manager_client get_da_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaValue {
    Bool(bool),
    Int(u64),
    Str(String),
}

impl fmt::Display for DaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaValue::Bool(v) => write!(f, "{v}"),
            DaValue::Int(v) => write!(f, "{v}"),
            DaValue::Str(v) => f.write_str(v),
        }
    }
}

/// Dictionary attack information, keyed by the names `tpm_manager_client` prints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmDaInfo(pub BTreeMap<String, DaValue>);

impl TpmDaInfo {
    pub fn get(&self, key: &str) -> Option<&DaValue> {
        self.0.get(key)
    }

    fn int(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(DaValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(DaValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn counter(&self) -> Option<u64> {
        self.int("dictionary_attack_counter")
    }

    pub fn threshold(&self) -> Option<u64> {
        self.int("dictionary_attack_threshold")
    }

    pub fn lockout_in_effect(&self) -> Option<bool> {
        self.flag("dictionary_attack_lockout_in_effect")
    }

    pub fn lockout_seconds_remaining(&self) -> Option<u64> {
        self.int("dictionary_attack_lockout_seconds_remaining")
    }
}

/// Run a TPM utility, folding stderr into the output and ignoring the exit status.
fn run_cmd(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<String> {
    let spec = CmdSpec::new(program)
        .args(args.iter().copied())
        .ignore_status()
        .merge_stderr();
    runner.output(&spec)
}

pub fn get_tpm_status(runner: &dyn CommandRunner) -> Result<TpmStatus> {
    let out = run_cmd(runner, TPM_MANAGER_CMD, &["status"])?;
    let field = |re: &Regex| {
        re.captures(&out)
            .map(|c| &c[1] == "true")
            .ok_or_else(|| AutotestError::test_error(format!("Invalid TPM status: \"{out}\".")))
    };
    let enabled = field(&ENABLED_RE)?;
    let owned = field(&OWNED_RE)?;
    Ok(TpmStatus {
        enabled,
        owned,
        ready: enabled && owned,
    })
}

pub fn get_tpm_da_info(runner: &dyn CommandRunner) -> Result<TpmDaInfo> {
    let out = run_cmd(runner, TPM_MANAGER_CMD, &["get_da_info"])?;
    Ok(parse_da_info(&out))
}

/// Parse `get_da_info` output.
///
/// The first and last lines are the reply's framing (`Message Reply: [...] {` / `}`); every line in between that
/// holds exactly one `key: value` pair is kept.
pub fn parse_da_info(out: &str) -> TpmDaInfo {
    let lines: Vec<&str> = out.lines().collect();
    let body = if lines.len() > 2 { &lines[1..lines.len() - 1] } else { &[][..] };

    let mut info = BTreeMap::new();
    for line in body {
        let items: Vec<&str> = line.trim().split(':').collect();
        let [key, raw] = items.as_slice() else {
            continue;
        };
        info.insert(key.trim().to_string(), parse_da_value(raw));
    }
    TpmDaInfo(info)
}

fn parse_da_value(raw: &str) -> DaValue {
    match raw.trim() {
        "false" => return DaValue::Bool(false),
        "true" => return DaValue::Bool(true),
        _ => {}
    }
    let number = raw.split('(').next().unwrap_or_default().trim();
    if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = number.parse() {
            return DaValue::Int(n);
        }
    }
    DaValue::Str(raw.trim_matches(|c| c == ' ' || c == '"').to_string())
}

/// Spec revision reported by `tpm_version`.
pub fn get_tpm_spec_revision(runner: &dyn CommandRunner) -> Result<u32> {
    let out = run_cmd(runner, TPM_VERSION_CMD, &[])?;
    SPEC_REVISION_RE
        .captures(&out)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| AutotestError::test_error(format!("Unexpected tpm_version output: {out}")))
}

pub fn take_ownership(runner: &dyn CommandRunner) -> Result<()> {
    run_cmd(runner, TPM_MANAGER_CMD, &["take_ownership"]).map(|_| ())
}

/// The owner password, decoded from the hex string in `status`. Empty when none is reported.
pub fn get_tpm_password(runner: &dyn CommandRunner) -> Result<String> {
    let out = run_cmd(runner, TPM_MANAGER_CMD, &["status"])?;
    let Some(caps) = PASSWORD_RE.captures(&out) else {
        return Ok(String::new());
    };
    decode_hex_password(&caps[1])
}

fn decode_hex_password(hex: &str) -> Result<String> {
    if hex.len() % 2 != 0 {
        return Err(AutotestError::parse("TPM owner password", format!("odd-length hex '{hex}'")));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .map(char::from)
                .ok_or_else(|| AutotestError::parse("TPM owner password", format!("invalid hex '{hex}'")))
        })
        .collect()
}

/// Whether a dictionary attack lockout is in effect; `None` when the TPM does not report it.
pub fn is_tpm_lockout_in_effect(runner: &dyn CommandRunner) -> Result<Option<bool>> {
    Ok(get_tpm_da_info(runner)?.lockout_in_effect())
}
