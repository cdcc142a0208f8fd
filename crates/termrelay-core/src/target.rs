//! Terminal endpoint addressing.
//!
//! Path format: `/ws/v1/terminal/{cluster}/{pod}[/{container}]`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "/ws/v1/terminal/";

/// The pod (and optionally container) a terminal session attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TerminalTarget {
    cluster: String,
    pod: String,
    container: Option<String>,
}

impl TerminalTarget {
    /// Create a target for the pod's default container.
    pub fn new(
        cluster: impl Into<String>,
        pod: impl Into<String>,
    ) -> Result<Self, TargetParseError> {
        let target = Self {
            cluster: cluster.into(),
            pod: pod.into(),
            container: None,
        };
        check_segment("cluster", &target.cluster)?;
        check_segment("pod", &target.pod)?;
        Ok(target)
    }

    /// Select a specific container in the pod.
    pub fn with_container(
        mut self,
        container: impl Into<String>,
    ) -> Result<Self, TargetParseError> {
        let container = container.into();
        check_segment("container", &container)?;
        self.container = Some(container);
        Ok(self)
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// The endpoint path for this target.
    pub fn path(&self) -> String {
        self.to_string()
    }
}

fn check_segment(name: &'static str, value: &str) -> Result<(), TargetParseError> {
    if value.is_empty() {
        return Err(TargetParseError::EmptySegment(name));
    }
    if value.contains('/') {
        return Err(TargetParseError::SlashInSegment(name));
    }
    Ok(())
}

impl fmt::Display for TerminalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}/{}", self.cluster, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "/{container}")?;
        }
        Ok(())
    }
}

impl FromStr for TerminalTarget {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| TargetParseError::BadPrefix(s.to_string()))?;

        let mut segments = rest.split('/');
        let cluster = segments.next().unwrap_or_default();
        let pod = segments.next().ok_or(TargetParseError::EmptySegment("pod"))?;
        let target = Self::new(cluster, pod)?;

        match (segments.next(), segments.next()) {
            (None, _) => Ok(target),
            (Some(container), None) => target.with_container(container),
            (Some(_), Some(_)) => Err(TargetParseError::TooManySegments(s.to_string())),
        }
    }
}

impl TryFrom<String> for TerminalTarget {
    type Error = TargetParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TerminalTarget> for String {
    fn from(target: TerminalTarget) -> Self {
        target.to_string()
    }
}

/// Error parsing a terminal endpoint path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetParseError {
    #[error("terminal path must start with /ws/v1/terminal/, got: {0}")]
    BadPrefix(String),
    #[error("terminal path {0} segment cannot be empty")]
    EmptySegment(&'static str),
    #[error("terminal path {0} segment cannot contain '/'")]
    SlashInSegment(&'static str),
    #[error("terminal path has too many segments: {0}")]
    TooManySegments(String),
}
