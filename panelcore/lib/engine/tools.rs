use serde::{Deserialize, Serialize};

use crate::{PanelcoreError, PanelcoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An X25519 key pair produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// The private key.
    pub private_key: String,

    /// The public key.
    pub public_key: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses the two `Label: value` lines printed by `xray x25519`.
pub fn parse_x25519_output(output: &str) -> PanelcoreResult<KeyPair> {
    let mut values = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty())
        });

    match (values.next().flatten(), values.next().flatten()) {
        (Some(private_key), Some(public_key)) => Ok(KeyPair {
            private_key,
            public_key,
        }),
        _ => Err(PanelcoreError::custom(anyhow::anyhow!(
            "unexpected x25519 output: {}",
            output.trim()
        ))),
    }
}

/// Extracts the version from the first line of `xray -version`, e.g. `Xray 25.3.6 (Xray, Penetrates Everything.) ...`.
pub fn parse_version_output(output: &str) -> Option<String> {
    output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_x25519_output() -> anyhow::Result<()> {
        let output = "Private key: cKzJ0d8c0Y0rV7yBvnm7ZlI1eJ7Q6kXq2Yt0S6gZl2M\n\
                      Public key: Hk2zY0nJ3m1q_aPp8X7bV2fU5cJ0yT6rLs4eWd9oQ3k\n";

        let pair = parse_x25519_output(output)?;
        assert_eq!(pair.private_key, "cKzJ0d8c0Y0rV7yBvnm7ZlI1eJ7Q6kXq2Yt0S6gZl2M");
        assert_eq!(pair.public_key, "Hk2zY0nJ3m1q_aPp8X7bV2fU5cJ0yT6rLs4eWd9oQ3k");

        let json = serde_json::to_value(&pair)?;
        assert!(json.get("privateKey").is_some());
        assert!(json.get("publicKey").is_some());

        Ok(())
    }

    #[test]
    fn test_parse_x25519_output_rejects_garbage() {
        assert!(parse_x25519_output("").is_err());
        assert!(parse_x25519_output("Private key: abc\n").is_err());
        assert!(parse_x25519_output("no colons here\nnor here\n").is_err());
    }

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output(
                "Xray 25.3.6 (Xray, Penetrates Everything.) 4b65ce1 (go1.24.1 linux/amd64)\nA unified platform"
            )
            .as_deref(),
            Some("25.3.6")
        );
        assert_eq!(parse_version_output("Xray"), None);
        assert_eq!(parse_version_output(""), None);
    }
}
