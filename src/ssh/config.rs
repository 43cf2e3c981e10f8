//! SSH hop configuration

use serde::{Deserialize, Serialize};

/// Credentials for one jump host in the chain
///
/// Serialized as a flat record so stored configs keep the
/// `{hostname, port, username, authMethod, password | privateKeyPath}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCredential {
    /// Jump host address
    pub hostname: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method and its secret material
    #[serde(flatten)]
    pub auth: AuthMethod,
}

/// Authentication methods supported for hops
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "authMethod", rename_all = "camelCase")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    #[serde(rename_all = "camelCase")]
    PrivateKey {
        /// Path to private key file
        private_key_path: String,
        /// Optional passphrase for encrypted keys
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn private_key(path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::PrivateKey {
            private_key_path: path.into(),
            passphrase,
        }
    }

    /// Wire name of the method, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::PrivateKey { .. } => "privateKey",
        }
    }
}

// Secrets stay out of Debug output (and therefore out of logs)
impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { .. } => f.debug_struct("Password").finish_non_exhaustive(),
            Self::PrivateKey {
                private_key_path,
                passphrase,
            } => f
                .debug_struct("PrivateKey")
                .field("private_key_path", private_key_path)
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
        }
    }
}

impl HostCredential {
    /// Create a hop with password authentication
    pub fn with_password(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: default_port(),
            username: username.into(),
            auth: AuthMethod::password(password),
        }
    }

    /// Create a hop with key authentication
    pub fn with_key(
        hostname: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: default_port(),
            username: username.into(),
            auth: AuthMethod::private_key(key_path, None),
        }
    }

    /// Set custom port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `hostname:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Redacted view for status reporting
    pub fn summary(&self) -> HopSummary {
        HopSummary {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_method: self.auth.kind().to_string(),
        }
    }
}

/// Hop description without secret material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopSummary {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
}

fn default_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hop_wire_format() {
        let hop = HostCredential::with_password("bastion.example.com", "admin", "secret123");
        let json = serde_json::to_value(&hop).unwrap();

        assert_eq!(json["hostname"], "bastion.example.com");
        assert_eq!(json["port"], 22);
        assert_eq!(json["authMethod"], "password");
        assert_eq!(json["password"], "secret123");
        assert!(json.get("privateKeyPath").is_none());
    }

    #[test]
    fn test_private_key_hop_from_flat_record() {
        let json = r#"{
            "hostname": "jump2.example.com",
            "port": 2222,
            "username": "ops",
            "authMethod": "privateKey",
            "privateKeyPath": "/home/ops/.ssh/id_ed25519",
            "passphrase": "hunter2"
        }"#;
        let hop: HostCredential = serde_json::from_str(json).unwrap();

        assert_eq!(hop.port, 2222);
        match hop.auth {
            AuthMethod::PrivateKey {
                private_key_path,
                passphrase,
            } => {
                assert_eq!(private_key_path, "/home/ops/.ssh/id_ed25519");
                assert_eq!(passphrase.as_deref(), Some("hunter2"));
            }
            _ => panic!("Expected key auth"),
        }
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let json = r#"{"hostname": "h", "username": "u", "authMethod": "password"}"#;
        assert!(serde_json::from_str::<HostCredential>(json).is_err());

        let json = r#"{"hostname": "h", "username": "u", "authMethod": "kerberos"}"#;
        assert!(serde_json::from_str::<HostCredential>(json).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let hop = HostCredential::with_password("h", "u", "topsecret");
        let rendered = format!("{:?}", hop);
        assert!(!rendered.contains("topsecret"));

        let mut keyed = HostCredential::with_key("h", "u", "~/.ssh/id_rsa");
        keyed.auth = AuthMethod::private_key("~/.ssh/id_rsa", Some("pp-secret".into()));
        assert!(!format!("{:?}", keyed).contains("pp-secret"));
    }

    #[test]
    fn test_summary_is_redacted() {
        let hop = HostCredential::with_key("bastion", "admin", "~/.ssh/id_ed25519").port(2200);
        let summary = hop.summary();
        assert_eq!(summary.auth_method, "privateKey");
        assert_eq!(summary.port, 2200);
        assert_eq!(hop.address(), "bastion:2200");
    }
}
