//! Checks a configuration snapshot is one this node can run.

use orderer_channelconfig::capabilities::{
    SUPPORTED_CHANNEL_CAPABILITIES, SUPPORTED_ORDERER_CAPABILITIES,
};
use orderer_channelconfig::{Bundle, UnsupportedCapabilities};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourcesError {
    #[error("config does not contain orderer config")]
    MissingOrdererConfig,

    #[error("config requires unsupported orderer capabilities: {0}")]
    UnsupportedOrdererCapabilities(UnsupportedCapabilities),

    #[error("config requires unsupported channel capabilities: {0}")]
    UnsupportedChannelCapabilities(UnsupportedCapabilities),
}

/// Check that `bundle` has an orderer section and only declares capabilities
/// this node supports.
pub fn check_resources(bundle: &Bundle) -> Result<(), ResourcesError> {
    let orderer = bundle
        .orderer_config()
        .ok_or(ResourcesError::MissingOrdererConfig)?;
    orderer
        .capabilities
        .supported(SUPPORTED_ORDERER_CAPABILITIES)
        .map_err(ResourcesError::UnsupportedOrdererCapabilities)?;
    bundle
        .channel_capabilities()
        .supported(SUPPORTED_CHANNEL_CAPABILITIES)
        .map_err(ResourcesError::UnsupportedChannelCapabilities)?;
    Ok(())
}

/// Like [`check_resources`], but panics on failure.
///
/// For configs that were already committed; a failure here means the node
/// cannot safely keep running.
pub fn check_resources_or_panic(bundle: &Bundle) {
    if let Err(err) = check_resources(bundle) {
        panic!("[channel {}] {}", bundle.channel_id(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_channelconfig::{genesis, Capabilities};

    fn bundle_with(edit: impl FnOnce(&mut orderer_channelconfig::Config)) -> Bundle {
        let mut config = genesis::application_channel_config("solo", vec![]);
        edit(&mut config);
        Bundle::new("testchannel", config).unwrap()
    }

    #[test]
    fn test_good_resources() {
        assert!(check_resources(&bundle_with(|_| {})).is_ok());
        check_resources_or_panic(&bundle_with(|_| {}));
    }

    #[test]
    fn test_missing_orderer_config() {
        let bundle = bundle_with(|config| config.orderer = None);
        let err = check_resources(&bundle).unwrap_err();
        assert!(matches!(err, ResourcesError::MissingOrdererConfig));
        assert!(err
            .to_string()
            .contains("config does not contain orderer config"));
    }

    #[test]
    fn test_unsupported_orderer_capability() {
        let bundle = bundle_with(|config| {
            if let Some(orderer) = config.orderer.as_mut() {
                orderer.capabilities = Capabilities::new(["V2_0", "V9_9"]);
            }
        });
        let err = check_resources(&bundle).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config requires unsupported orderer capabilities: V9_9"
        );
    }

    #[test]
    fn test_unsupported_channel_capability() {
        let bundle = bundle_with(|config| config.capabilities = Capabilities::new(["V1_2"]));
        let err = check_resources(&bundle).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("config requires unsupported channel capabilities:"));
    }

    #[test]
    fn test_orderer_only_capability_is_not_a_channel_capability() {
        // V1_3 is a channel capability but not an orderer one.
        let bundle = bundle_with(|config| {
            if let Some(orderer) = config.orderer.as_mut() {
                orderer.capabilities = Capabilities::new(["V1_3"]);
            }
        });
        assert!(matches!(
            check_resources(&bundle),
            Err(ResourcesError::UnsupportedOrdererCapabilities(_))
        ));
    }

    #[test]
    #[should_panic(expected = "config does not contain orderer config")]
    fn test_missing_orderer_config_panics() {
        check_resources_or_panic(&bundle_with(|config| config.orderer = None));
    }
}
