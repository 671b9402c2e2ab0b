//! Firmware and system properties reported by `crossystem`.

use std::collections::BTreeMap;

use autotest_common::{CmdSpec, CommandRunner, Result};

/// Snapshot of `crossystem` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crossystem {
    values: BTreeMap<String, String>,
}

impl Crossystem {
    /// Run `crossystem` and capture every property.
    pub fn read(runner: &dyn CommandRunner) -> Result<Self> {
        let out = runner.output(&CmdSpec::new("crossystem"))?;
        Ok(Self {
            values: parse_crossystem(&out),
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// Parse `name = value # comment` lines. Lines without `=` are ignored.
pub fn parse_crossystem(out: &str) -> BTreeMap<String, String> {
    out.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default();
            let (name, value) = line.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotest_common::{CmdResult, ScriptedRunner};
    use proptest::prelude::*;

    const OUTPUT: &str = "\
arch                    = x86                            # [RO/str] Platform architecture
cros_debug              = 1                              # [RO/int] OS should allow debug features
fwid                    = Google_Brya.14505.0.0          # [RO/str] Active firmware ID
mainfw_type             = developer                      # [RO/str] Active main firmware type
wpsw_cur                = 0                              # [RO/int] Firmware write protect hardware switch
";

    #[test]
    fn test_read_parses_properties() {
        let runner = ScriptedRunner::new().expect(["crossystem"], CmdResult::ok(OUTPUT));
        let cs = Crossystem::read(&runner).unwrap();
        assert_eq!(cs.get("mainfw_type"), Some("developer"));
        assert_eq!(cs.get("fwid"), Some("Google_Brya.14505.0.0"));
        assert_eq!(cs.get("nope"), None);
        assert_eq!(cs.values().len(), 5);
    }

    #[test]
    fn test_value_with_equals_sign() {
        let map = parse_crossystem("kernel_cmdline = console= quiet # [RO/str]\n");
        assert_eq!(map["kernel_cmdline"], "console= quiet");
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(input in "\\PC*") {
            let _ = parse_crossystem(&input);
        }

        #[test]
        fn prop_simple_pairs_round_trip(name in "[a-z_]{1,12}", value in "[A-Za-z0-9._-]{0,12}") {
            let map = parse_crossystem(&format!("{name} = {value} # comment"));
            prop_assert_eq!(map.get(&name).map(String::as_str), Some(value.as_str()));
        }
    }
}
