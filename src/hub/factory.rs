//! Client factory.
//!
//! Creates a boxed [`DaemonClient`] from configuration, dispatching on
//! the variant name. Which variants are available depends on the enabled
//! features.

use std::sync::Arc;

use crate::core::error::{ClientError, Result};
use crate::core::traits::{DaemonClient, ProtocolVariant};

use super::config::DaemonParams;

/// Create a client for the configured variant.
pub fn create_client(params: &DaemonParams) -> Result<Arc<dyn DaemonClient>> {
    match params.variant {
        #[cfg(feature = "legacy")]
        ProtocolVariant::Legacy => {
            use crate::client::legacy::{LegacyClient, LegacyParamsConfig};
            let parsed: LegacyParamsConfig = serde_json::from_value(params.parameters.clone())
                .map_err(|e| {
                    ClientError::Config(format!("invalid legacy daemon parameters: {}", e))
                })?;
            Ok(Arc::new(LegacyClient::new(parsed.to_config())))
        }

        #[cfg(feature = "current")]
        ProtocolVariant::Current => {
            use crate::client::current::{CurrentClient, CurrentParamsConfig};
            let parsed: CurrentParamsConfig = serde_json::from_value(params.parameters.clone())
                .map_err(|e| {
                    ClientError::Config(format!("invalid current daemon parameters: {}", e))
                })?;
            Ok(Arc::new(CurrentClient::new(parsed.to_config())))
        }

        #[allow(unreachable_patterns)]
        other => Err(ClientError::Config(format!(
            "protocol variant {} is not enabled in this build",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "legacy")]
    #[test]
    fn test_create_legacy_client() {
        let params = DaemonParams {
            variant: ProtocolVariant::Legacy,
            parameters: serde_json::json!({ "host": "10.0.0.5" }),
        };
        let client = create_client(&params).unwrap();
        assert_eq!(client.variant(), ProtocolVariant::Legacy);
    }

    #[cfg(feature = "current")]
    #[test]
    fn test_create_current_client() {
        let params = DaemonParams {
            variant: ProtocolVariant::Current,
            parameters: serde_json::json!({ "host": "10.0.0.5", "user": "hub" }),
        };
        let client = create_client(&params).unwrap();
        assert_eq!(client.variant(), ProtocolVariant::Current);
    }

    #[cfg(feature = "legacy")]
    #[test]
    fn test_create_rejects_bad_parameters() {
        let params = DaemonParams {
            variant: ProtocolVariant::Legacy,
            parameters: serde_json::json!({ "port": 8888 }), // host missing
        };
        assert!(matches!(
            create_client(&params),
            Err(ClientError::Config(_))
        ));
    }
}
