//! GitHub Actions implementation of [`CiPlatform`]
//!
//! Inputs come from `INPUT_<NAME>` environment variables. Outputs go to the
//! `$GITHUB_OUTPUT` file when the runner provides one and fall back to
//! `::set-output` workflow commands otherwise. Log lines, masks and failures
//! are workflow commands on stdout.

use evalstep_core::{CiPlatform, ConfigError, EnvSnapshot, InputOptions, LogLevel, PlatformError};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Escapes a workflow command message
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escapes a workflow command property value
pub fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

/// Formats a workflow command line
pub fn workflow_command(command: &str, properties: &[(&str, &str)], message: &str) -> String {
    let mut line = format!("::{}", command);
    if !properties.is_empty() {
        let properties: Vec<String> = properties
            .iter()
            .map(|(key, value)| format!("{}={}", key, escape_property(value)))
            .collect();
        line.push(' ');
        line.push_str(&properties.join(","));
    }
    line.push_str("::");
    line.push_str(&escape_data(message));
    line
}

/// Environment variable holding an input's value
pub fn input_variable(name: &str) -> String {
    format!("INPUT_{}", name.replace(' ', "_").to_uppercase())
}

pub struct GitHubPlatform {
    env: EnvSnapshot,
    overrides: HashMap<String, String>,
    output_file: Option<PathBuf>,
    commands: Mutex<Box<dyn Write + Send>>,
}

impl GitHubPlatform {
    /// # Arguments
    /// * `env` - process environment snapshot
    /// * `overrides` - input values that win over `INPUT_*` variables
    /// * `output_file` - the `$GITHUB_OUTPUT` file, if any
    pub fn new(
        env: EnvSnapshot,
        overrides: HashMap<String, String>,
        output_file: Option<PathBuf>,
    ) -> Self {
        Self::with_writer(env, overrides, output_file, Box::new(std::io::stdout()))
    }

    /// Like [`GitHubPlatform::new`], writing workflow commands to `commands`
    pub fn with_writer(
        env: EnvSnapshot,
        overrides: HashMap<String, String>,
        output_file: Option<PathBuf>,
        commands: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            env,
            overrides,
            output_file,
            commands: Mutex::new(commands),
        }
    }

    fn issue(&self, line: &str) {
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(commands, "{}", line).and_then(|_| commands.flush()) {
            tracing::warn!("Failed to write workflow command: {}", e);
        }
    }

    fn append_to_file(&self, path: &Path, name: &str, value: &str) -> Result<(), PlatformError> {
        let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
        if name.contains(&delimiter) || value.contains(&delimiter) {
            return Err(PlatformError::InvalidOutput {
                name: name.to_string(),
                reason: "name or value contains the delimiter".to_string(),
            });
        }

        let io_error = |source| PlatformError::Output {
            name: name.to_string(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;
        write!(file, "{name}<<{delimiter}\n{value}\n{delimiter}\n").map_err(io_error)?;
        Ok(())
    }
}

impl CiPlatform for GitHubPlatform {
    fn read_input(&self, name: &str, options: InputOptions) -> Result<String, ConfigError> {
        let value = self
            .overrides
            .get(name)
            .map(String::as_str)
            .or_else(|| self.env.get(&input_variable(name)))
            .unwrap_or_default();

        if options.required && value.is_empty() {
            return Err(ConfigError::MissingInput(name.to_string()));
        }

        Ok(if options.trim_whitespace {
            value.trim().to_string()
        } else {
            value.to_string()
        })
    }

    fn write_output(&self, name: &str, value: &str) -> Result<(), PlatformError> {
        if name.is_empty() {
            return Err(PlatformError::InvalidOutput {
                name: name.to_string(),
                reason: "output names can't be empty".to_string(),
            });
        }

        match &self.output_file {
            Some(path) => self.append_to_file(path, name, value),
            None => {
                self.issue(&workflow_command("set-output", &[("name", name)], value));
                Ok(())
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        let line = match level {
            LogLevel::Debug => workflow_command("debug", &[], message),
            LogLevel::Info => message.to_string(),
            LogLevel::Warning => workflow_command("warning", &[], message),
            LogLevel::Error => workflow_command("error", &[], message),
        };
        self.issue(&line);
    }

    fn mask(&self, secret: &str) {
        self.issue(&workflow_command("add-mask", &[], secret));
    }

    fn mark_failed(&self, message: &str) {
        self.issue(&workflow_command("error", &[], message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn platform(
        vars: &[(&str, &str)],
        output_file: Option<PathBuf>,
    ) -> (GitHubPlatform, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let env = EnvSnapshot::from_vars(vars.iter().copied());
        let platform =
            GitHubPlatform::with_writer(env, HashMap::new(), output_file, Box::new(buffer.clone()));
        (platform, buffer)
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_data("50%\r\nnext"), "50%25%0D%0Anext");
        assert_eq!(escape_property("a:b,c"), "a%3Ab%2Cc");
        assert_eq!(
            workflow_command("set-output", &[("name", "x:y")], "line1\nline2"),
            "::set-output name=x%3Ay::line1%0Aline2"
        );
        assert_eq!(workflow_command("debug", &[], "hi"), "::debug::hi");
    }

    #[test]
    fn test_input_variable() {
        assert_eq!(input_variable("jsonInputs"), "INPUT_JSONINPUTS");
        assert_eq!(input_variable("my input"), "INPUT_MY_INPUT");
    }

    #[test]
    fn test_read_input() {
        let (platform, _) = platform(&[("INPUT_EXPRESSION", "  1 + 1 \n")], None);

        assert_eq!(
            platform.read_input("expression", InputOptions::default()).unwrap(),
            "1 + 1"
        );
        assert_eq!(
            platform.read_input("expression", InputOptions::raw()).unwrap(),
            "  1 + 1 \n"
        );
        assert_eq!(platform.read_input("missing", InputOptions::default()).unwrap(), "");
        assert_eq!(
            platform
                .read_input("missing", InputOptions::required())
                .unwrap_err(),
            ConfigError::MissingInput("missing".to_string())
        );
    }

    #[test]
    fn test_overrides_win() {
        let overrides = [("timeoutMs".to_string(), "20".to_string())].into_iter().collect();
        let platform = GitHubPlatform::with_writer(
            EnvSnapshot::from_vars([("INPUT_TIMEOUTMS", "10")]),
            overrides,
            None,
            Box::new(SharedBuffer::default()),
        );

        assert_eq!(
            platform.read_input("timeoutMs", InputOptions::default()).unwrap(),
            "20"
        );
    }

    #[test]
    fn test_output_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output");
        let (platform, buffer) = platform(&[], Some(path.clone()));

        platform.write_output("result", "multi\nline").unwrap();
        platform.write_output("timedOut", "false").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("result<<ghadelimiter_"));
        assert_eq!(lines[1], "multi");
        assert_eq!(lines[2], "line");
        assert_eq!(lines[3], &lines[0]["result<<".len()..]);
        assert!(lines[4].starts_with("timedOut<<ghadelimiter_"));
        assert_eq!(lines[5], "false");
        assert_eq!(lines[6], &lines[4]["timedOut<<".len()..]);
        assert_ne!(lines[3], lines[6]);
        assert!(buffer.text().is_empty());
    }

    #[test]
    fn test_set_output_command_fallback() {
        let (platform, buffer) = platform(&[], None);

        platform.write_output("result", "21").unwrap();
        assert_eq!(buffer.text(), "::set-output name=result::21\n");
        assert!(platform.write_output("", "x").is_err());
    }

    #[test]
    fn test_log_commands() {
        let (platform, buffer) = platform(&[], None);

        platform.log(LogLevel::Debug, "d");
        platform.log(LogLevel::Info, "i");
        platform.log(LogLevel::Warning, "w");
        platform.mask("secret");
        platform.mark_failed("failed: 100%");

        assert_eq!(
            buffer.text(),
            "::debug::d\ni\n::warning::w\n::add-mask::secret\n::error::failed: 100%25\n"
        );
    }
}
