use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sandbox::Sandbox;

/// Object slot under which the sandbox environment is attached.
pub const SANDBOX_TYPE_NAME: &str = "sandbox";

/// A runnable configuration: its identity, the command line that produced it,
/// and the option values it resolved to.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    name: String,
    description: Option<String>,
    command_line: Vec<String>,
    options: BTreeMap<String, Vec<String>>,
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl Configuration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// The command line this configuration is reported under.
    #[must_use]
    pub fn command_line(&self) -> &[String] {
        &self.command_line
    }

    pub fn set_command_line(&mut self, args: Vec<String>) {
        self.command_line = args;
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<&[String]> {
        self.options.get(key).map(Vec::as_slice)
    }

    /// First value of `key`.
    #[must_use]
    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.option(key)
            .and_then(<[String]>::first)
            .map(String::as_str)
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, Vec<String>> {
        &self.options
    }

    pub fn set_option(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.options.insert(key.into(), values);
    }

    pub fn add_option_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.entry(key.into()).or_default().push(value.into());
    }

    #[must_use]
    pub fn sandbox(&self) -> Option<&Arc<dyn Sandbox>> {
        self.sandbox.as_ref()
    }

    pub fn set_sandbox(&mut self, sandbox: Arc<dyn Sandbox>) {
        tracing::trace!(slot = SANDBOX_TYPE_NAME, config = %self.name, "Attaching sandbox");
        self.sandbox = Some(sandbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accumulate_per_key() {
        let mut config = Configuration::new("suite");
        config.add_option_value("module", "a");
        config.add_option_value("module", "b");
        config.set_option("retries", vec!["3".to_string()]);

        assert_eq!(
            config.option("module"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(config.option_value("module"), Some("a"));
        assert_eq!(config.option_value("retries"), Some("3"));
        assert_eq!(config.option_value("missing"), None);
    }

    #[test]
    fn command_line_is_replaced_wholesale() {
        let mut config = Configuration::new("suite");
        config.set_command_line(vec!["/tmp/dump.toml".to_string()]);
        config.set_command_line(vec!["suite".to_string(), "--retries".to_string()]);
        assert_eq!(config.command_line(), ["suite", "--retries"]);
    }
}
