use clawnet_core::constants::DEFAULT_LISTEN_ADDR;

/// Configuration for the ClawNet P2P transport.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen multiaddresses (e.g. "/ip4/0.0.0.0/tcp/9527").
    pub listen_addrs: Vec<String>,
    /// Bootstrap peer multiaddresses (must end in /p2p/<peer-id>).
    pub bootstrap_peers: Vec<String>,
    /// Protocol version string advertised via identify.
    pub protocol_version: String,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![DEFAULT_LISTEN_ADDR.into()],
            bootstrap_peers: Vec::new(),
            protocol_version: "/clawnet/1.0.0".into(),
        }
    }
}
