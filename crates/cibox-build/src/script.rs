//! Shell script rendering for container steps

/// A shell script assembled from step options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    lines: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
    errexit: bool,
    xtrace: bool,
}

impl Script {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    /// Variables exported before the script body
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Directory to change into before the script body
    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Abort on the first failing command (`set -e`)
    pub fn with_errexit(mut self, errexit: bool) -> Self {
        self.errexit = errexit;
        self
    }

    /// Echo commands as they run (`set -x`)
    pub fn with_xtrace(mut self, xtrace: bool) -> Self {
        self.xtrace = xtrace;
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Render the script as a single string
    pub fn render(&self) -> String {
        let mut script = String::new();

        if self.errexit {
            script.push_str("set -e\n");
        }
        if self.xtrace {
            script.push_str("set -x\n");
        }
        for (key, value) in &self.env {
            script.push_str(&format!("export {key}={}\n", quote(value)));
        }
        if let Some(cwd) = &self.cwd {
            script.push_str(&format!("cd {}\n", quote(cwd)));
        }
        for line in &self.lines {
            script.push_str(line);
            script.push('\n');
        }

        script
    }

    /// Render for a shell reading from stdin that is never closed
    pub fn render_for_stdin(&self) -> String {
        let mut script = self.render();
        script.push_str("exit $?\n");
        script
    }
}

/// Single-quote a value for POSIX shells
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Check that a name is usable as a shell variable
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}
