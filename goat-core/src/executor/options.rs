use super::error::Error;
use crate::requestfile::Value;
use indexmap::IndexMap;
use std::time::Duration;

/// Failure handling options of a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbortOptions {
    /// A failure of this request does not abort the batch.
    pub no_abort: bool,
    /// A failure of this request aborts the batch even when aborting is disabled globally.
    pub always_abort: bool,
}

impl AbortOptions {
    pub fn from_options(options: &IndexMap<String, Value>) -> Result<AbortOptions, Error> {
        Ok(AbortOptions {
            no_abort: bool_option(options, "noabort", false)?,
            always_abort: bool_option(options, "alwaysabort", false)?,
        })
    }

    /// Whether a failure aborts the batch given the global no-abort flag.
    pub fn aborts(&self, global_no_abort: bool) -> bool {
        self.always_abort || !(self.no_abort || global_no_abort)
    }
}

/// Execution options of a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    pub condition: bool,
    pub delay: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            condition: true,
            delay: None,
        }
    }
}

impl ExecOptions {
    pub fn from_options(options: &IndexMap<String, Value>) -> Result<ExecOptions, Error> {
        let delay = match options.get("delay") {
            None => None,
            Some(Value::Integer(ms)) if *ms >= 0 => Some(Duration::from_millis(*ms as u64)),
            Some(Value::String(s)) => Some(
                humantime::parse_duration(s).map_err(|err| {
                    Error::InvalidOption {
                        name: "delay".into(),
                        message: err.to_string(),
                    }
                })?,
            ),
            Some(_) => {
                return Err(Error::InvalidOption {
                    name: "delay".into(),
                    message: "expected a duration string or milliseconds".into(),
                })
            }
        };

        Ok(ExecOptions {
            condition: bool_option(options, "condition", true)?,
            delay,
        })
    }
}

fn bool_option(options: &IndexMap<String, Value>, name: &str, default: bool) -> Result<bool, Error> {
    match options.get(name) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(Error::InvalidOption {
            name: name.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn options(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test_case(false, false, false, true; "default aborts")]
    #[test_case(false, false, true, false; "global no abort")]
    #[test_case(true, false, false, false; "request no abort")]
    #[test_case(false, true, true, true; "always abort wins over global")]
    #[test_case(true, true, false, true; "always abort wins over request")]
    fn aborts(no_abort: bool, always_abort: bool, global: bool, expected: bool) {
        let opts = AbortOptions {
            no_abort,
            always_abort,
        };
        assert_eq!(opts.aborts(global), expected);
    }

    #[test_case(Value::Integer(250), Duration::from_millis(250); "milliseconds")]
    #[test_case(Value::String("500ms".into()), Duration::from_millis(500); "humantime millis")]
    #[test_case(Value::String("2s".into()), Duration::from_secs(2); "humantime seconds")]
    fn delay(value: Value, expected: Duration) {
        let opts = ExecOptions::from_options(&options(&[("delay", value)])).unwrap();
        assert_eq!(opts.delay, Some(expected));
    }

    #[test]
    fn invalid_options() {
        assert!(ExecOptions::from_options(&options(&[("delay", Value::Bool(true))])).is_err());
        assert!(ExecOptions::from_options(&options(&[("condition", Value::Integer(1))])).is_err());
        assert!(AbortOptions::from_options(&options(&[("noabort", "yes".into())])).is_err());
    }

    #[test]
    fn defaults() -> eyre::Result<()> {
        assert_eq!(ExecOptions::from_options(&IndexMap::new())?, ExecOptions::default());
        assert_eq!(AbortOptions::from_options(&IndexMap::new())?, AbortOptions::default());
        Ok(())
    }
}
