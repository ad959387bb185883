//! Command line of a foreign process

use serde::{Deserialize, Serialize};

/// argv of a process, as read from the OS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn new(args: Vec<String>) -> Self {
        Self(args)
    }

    /// Parse the NUL-separated format of `/proc/<pid>/cmdline`
    pub fn from_nul_separated(raw: &[u8]) -> Self {
        let args = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();
        Self(args)
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-joined form, as a shell would display it
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.first().is_some_and(|program| program.starts_with(prefix))
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.joined().contains(needle)
    }

    /// Value of the first `<prefix><value>` argument, e.g. `--stage_hint=side_stage`
    pub fn value_of(&self, prefix: &str) -> Option<&str> {
        self.0.iter().find_map(|arg| arg.strip_prefix(prefix))
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(args: Vec<&str>) -> Self {
        Self(args.into_iter().map(String::from).collect())
    }
}
