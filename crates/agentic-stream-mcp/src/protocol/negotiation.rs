//! MCP capability negotiation during initialization.

use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, McpResult, MCP_VERSION,
    SUPPORTED_VERSIONS,
};

/// Stored client capabilities after negotiation.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedCapabilities {
    pub client: ClientCapabilities,
    pub client_info: Option<Implementation>,
    pub protocol_version: String,
    pub initialized: bool,
}

impl NegotiatedCapabilities {
    pub fn negotiate(
        &mut self,
        params: InitializeParams,
        methods: &[String],
        instructions: Option<String>,
    ) -> McpResult<InitializeResult> {
        let version = if SUPPORTED_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.as_str()
        } else {
            tracing::warn!(
                "Client requested protocol version {}, server supports {}. Proceeding with server version.",
                params.protocol_version,
                MCP_VERSION
            );
            MCP_VERSION
        };

        self.protocol_version = version.to_string();
        self.client = params.capabilities;

        tracing::info!(
            "Initialized with client: {} v{}",
            params.client_info.name,
            params.client_info.version
        );
        self.client_info = Some(params.client_info);

        Ok(InitializeResult::new(version, methods, instructions))
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        tracing::info!("MCP handshake complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(version: &str) -> InitializeParams {
        InitializeParams {
            protocol_version: version.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "test-client".into(),
                version: "1.0".into(),
            },
        }
    }

    #[test]
    fn test_supported_version_is_echoed() {
        let mut caps = NegotiatedCapabilities::default();
        let result = caps.negotiate(params("2024-11-05"), &[], None).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(caps.protocol_version, "2024-11-05");
    }

    #[test]
    fn test_unknown_version_falls_back() {
        let mut caps = NegotiatedCapabilities::default();
        let result = caps.negotiate(params("2099-01-01"), &[], None).unwrap();
        assert_eq!(result.protocol_version, MCP_VERSION);
        assert!(!caps.initialized);
        caps.mark_initialized();
        assert!(caps.initialized);
    }
}
