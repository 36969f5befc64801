//! Path resolution for one agent's filesystem.
//!
//! Clients see every path under `/<server name>`; the agent sees the same
//! path with that prefix removed. The working directory never leaves the
//! prefix: anything that resolves to `/` or outside it is re-rooted.

/// Lexically normalize `path`: backslashes become slashes, `.` segments and
/// empty segments are dropped, `..` pops (never above `/`).
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Prefix confinement and agent/display mapping for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathScope {
    prefix: String,
}

impl PathScope {
    /// Scope rooted at `/<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            prefix: normalize(name),
        }
    }

    /// The display root, e.g. `/lobby`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `path` (normalized) lies inside the prefix.
    pub fn contains(&self, path: &str) -> bool {
        path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Resolve `path` against `cwd` into a display path inside the prefix.
    ///
    /// `.` (or nothing) is the working directory itself.
    pub fn resolve(&self, cwd: &str, path: &str) -> String {
        let path = path.trim();
        if path.is_empty() || path == "." {
            return cwd.to_owned();
        }
        let unified = path.replace('\\', "/");
        let resolved = if unified.starts_with('/') {
            normalize(&unified)
        } else {
            normalize(&format!("{cwd}/{unified}"))
        };
        self.confine(resolved)
    }

    fn confine(&self, resolved: String) -> String {
        if resolved == "/" {
            self.prefix.clone()
        } else if self.contains(&resolved) {
            resolved
        } else {
            normalize(&format!("{}{resolved}", self.prefix))
        }
    }

    /// Agent-relative form of a display path.
    pub fn to_agent(&self, display: &str) -> String {
        match display.strip_prefix(self.prefix.as_str()) {
            Some("") => "/".to_owned(),
            Some(rest) if rest.starts_with('/') => rest.to_owned(),
            _ => display.to_owned(),
        }
    }

    /// Display form of an agent-relative path.
    pub fn to_display(&self, agent: &str) -> String {
        match normalize(agent).as_str() {
            "/" => self.prefix.clone(),
            rest => format!("{}{rest}", self.prefix),
        }
    }
}
