//! Resolved server configuration consumed by the protocol core

use crate::errors::ConfigError;
use crate::idlist::ServerType;
use crate::pattern::Pattern;
use crate::wire::AuthMethod;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

fn default_port() -> u16 {
    706
}

fn default_server_type() -> ServerType {
    ServerType::Server
}

fn default_zombie_expiry() -> i64 {
    300
}

fn default_pending_timeout() -> i64 {
    12
}

fn default_channel_cipher() -> String {
    "aes-256-cbc".to_string()
}

fn default_channel_hmac() -> String {
    "hmac-sha1-96".to_string()
}

/// How clients connecting from a matching host must authenticate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAcl {
    pub host: Pattern,
    #[serde(default = "default_auth_method")]
    pub auth: AuthMethod,
}

fn default_auth_method() -> AuthMethod {
    AuthMethod::None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    pub name: String,
    pub ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_server_type")]
    pub server_type: ServerType,
    /// Seconds a detached client is kept before it expires. Zero keeps it
    /// until it resumes.
    #[serde(default)]
    pub detach_timeout: i64,
    /// Seconds a signed-off client ID stays referenceable
    #[serde(default = "default_zombie_expiry")]
    pub zombie_expiry: i64,
    /// Seconds to wait for a command reply before failing the suspended flow
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout: i64,
    #[serde(default = "default_channel_cipher")]
    pub channel_cipher: String,
    #[serde(default = "default_channel_hmac")]
    pub channel_hmac: String,
    #[serde(default)]
    pub clients: Vec<ClientAcl>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, ip: IpAddr, server_type: ServerType) -> Self {
        Self {
            name: name.into(),
            ip,
            port: default_port(),
            server_type,
            detach_timeout: 0,
            zombie_expiry: default_zombie_expiry(),
            pending_timeout: default_pending_timeout(),
            channel_cipher: default_channel_cipher(),
            channel_hmac: default_channel_hmac(),
            clients: Vec::new(),
        }
    }

    pub fn from_json5(text: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(text)?)
    }

    /// The authentication method required of a client connecting from
    /// `hostname` or `ip`, if any ACL entry admits it
    pub fn client_auth_method(&self, hostname: Option<&str>, ip: &IpAddr) -> Option<AuthMethod> {
        let ip = ip.to_string();
        self.clients
            .iter()
            .find(|acl| acl.host.matches(&ip) || hostname.map_or(false, |h| acl.host.matches(h)))
            .map(|acl| acl.auth)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("silc.localhost", IpAddr::V4(Ipv4Addr::LOCALHOST), ServerType::Server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_fill_missing_fields() {
        let conf = ServerConfig::from_json5(
            r#"{
                name: "r1.example.org",
                ip: "10.0.0.1",
                "server-type": "router",
                clients: [ { host: "*.example.org", auth: "passphrase" } ],
            }"#,
        )
        .unwrap();

        assert_eq!(conf.port, 706);
        assert_eq!(conf.server_type, ServerType::Router);
        assert_eq!(conf.zombie_expiry, 300);
        assert_eq!(conf.channel_cipher, "aes-256-cbc");
        assert_eq!(
            conf.client_auth_method(Some("host.EXAMPLE.org"), &"192.0.2.1".parse().unwrap()),
            Some(AuthMethod::Passphrase)
        );
        assert_eq!(conf.client_auth_method(None, &"192.0.2.1".parse().unwrap()), None);
    }

    #[test]
    fn malformed_config_is_a_format_error() {
        assert!(matches!(
            ServerConfig::from_json5("{ name: 1 }"),
            Err(ConfigError::FormatError(_))
        ));
    }
}
