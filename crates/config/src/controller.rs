use serde::{Deserialize, Serialize};

/// Where results and the completion report are sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Controller {
    /// Address of the result server on the host side.
    pub host_ip: String,

    /// Port of the result server on the host side.
    pub host_port: u16,

    /// `host:port` of the in-guest agent that receives the completion
    /// report.
    pub agent_address: String,

    /// When set, artifacts are copied into this directory instead of being
    /// streamed to the result server. Useful for offline runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<std::path::PathBuf>,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            host_ip: "192.168.56.1".into(),
            host_port: 2042,
            agent_address: "127.0.0.1:8000".into(),
            export_dir: None,
        }
    }
}
