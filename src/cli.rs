use crate::config::RuntimeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    pub steps: Option<usize>,
    pub dt: Option<f64>,
    pub seed: Option<u64>,
    pub max_ops: Option<u64>,
}

impl CliOverrides {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --steps/--dt/--seed/--max-ops with values.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "steps" => {
                    overrides.steps =
                        Some(value.parse::<usize>().with_context(|| format!("Invalid steps '{value}'"))?);
                }
                "dt" => {
                    let dt = value.parse::<f64>().with_context(|| format!("Invalid dt '{value}'"))?;
                    if !(dt.is_finite() && dt > 0.0) {
                        bail!("Invalid dt '{value}'. Use a positive number of seconds.");
                    }
                    overrides.dt = Some(dt);
                }
                "seed" => {
                    overrides.seed = Some(value.parse::<u64>().with_context(|| format!("Invalid seed '{value}'"))?);
                }
                "max-ops" => {
                    overrides.max_ops =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid max-ops '{value}'"))?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --steps, --dt, --seed, --max-ops."),
            }
        }
        Ok(overrides)
    }

    pub fn config_overrides(&self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides { max_operations: self.max_ops, seed: self.seed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_flag() {
        let args = ["harness", "--steps", "120", "--dt", "0.016", "--seed", "7", "--max-ops", "5000"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.steps, Some(120));
        assert_eq!(overrides.dt, Some(0.016));
        let config = overrides.config_overrides();
        assert_eq!((config.seed, config.max_operations), (Some(7), Some(5000)));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_values() {
        assert!(CliOverrides::parse(["harness", "--fps", "60"]).is_err());
        assert!(CliOverrides::parse(["harness", "--dt", "-1"]).is_err());
        assert!(CliOverrides::parse(["harness", "--steps"]).is_err());
        assert!(CliOverrides::parse(["harness", "steps"]).is_err());
    }

    #[test]
    fn empty_args_yield_no_overrides() {
        let overrides = CliOverrides::parse(["harness"]).expect("parse");
        assert_eq!(overrides, CliOverrides::default());
        assert!(overrides.config_overrides().is_empty());
    }
}
