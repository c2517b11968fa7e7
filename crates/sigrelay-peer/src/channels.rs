use std::collections::HashSet;

use sigrelay_transport::ChannelSpec;

use crate::error::{Result, SignalError};

/// Unordered channel that never retransmits.
pub const UNRELIABLE: &str = "unreliable";
/// Ordered, reliable channel.
pub const RELIABLE: &str = "reliable";
/// Reserved control channel carrying heartbeats. Never exposed to callers.
pub const INTERNAL: &str = "internal";

/// True for the reserved control channel.
pub fn is_internal(label: &str) -> bool {
    label == INTERNAL
}

/// Channels a session needs open before it counts as established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    specs: Vec<ChannelSpec>,
}

impl ChannelSet {
    /// `unreliable`, `reliable` and `internal`.
    pub fn standard() -> Self {
        Self {
            specs: vec![
                ChannelSpec::unreliable(UNRELIABLE),
                ChannelSpec::reliable(RELIABLE),
                ChannelSpec::reliable(INTERNAL),
            ],
        }
    }

    /// Custom set. Labels must be unique and include [`INTERNAL`].
    pub fn new(specs: Vec<ChannelSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.label.is_empty() {
                return Err(SignalError::InvalidChannelSet(
                    "empty channel label".to_string(),
                ));
            }
            if !seen.insert(spec.label.as_str()) {
                return Err(SignalError::InvalidChannelSet(format!(
                    "duplicate channel '{}'",
                    spec.label
                )));
            }
        }
        if !seen.contains(INTERNAL) {
            return Err(SignalError::InvalidChannelSet(format!(
                "missing reserved channel '{INTERNAL}'"
            )));
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.label.as_str())
    }

    /// Labels an application may send on.
    pub fn external_labels(&self) -> impl Iterator<Item = &str> {
        self.labels().filter(|label| !is_internal(label))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels().any(|candidate| candidate == label)
    }

    /// True once every required channel is in `opened`.
    pub fn is_complete(&self, opened: &HashSet<String>) -> bool {
        self.labels().all(|label| opened.contains(label))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::standard()
    }
}
