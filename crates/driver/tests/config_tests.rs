//! Integration tests for configuration parsing
//!
//! Covers full and partial driver configs, validation of bad values, saving
//! and reloading, and the device filter derived from the config.

use driver::camera::ProbeSettings;
use driver::config::{DriverConfig, load_config};
use driver::usb::DeviceManager;
use protocol::CameraControl;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[driver]
log_level = "debug"

[device]
vendor_id = "0x046d"
product_id = "0x0825"

[transfer]
timeout_ms = 1000

[streaming]
iso_packet_size = 944
control_interface = 0
streaming_interface = 1
control_unit_id = 2

[controls]
reset_on_probe = ["hue"]
"#;

fn parse(text: &str) -> DriverConfig {
    toml::from_str(text).unwrap()
}

mod parsing {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = parse(FULL_CONFIG);
        assert!(config.validate().is_ok());

        assert_eq!(config.driver.log_level, "debug");
        assert_eq!(config.vendor_id().unwrap(), 0x046D);
        assert_eq!(config.product_id().unwrap(), 0x0825);
        assert_eq!(config.transfer.timeout(), Duration::from_millis(1000));
        assert_eq!(config.streaming.iso_packet_size, 944);
        assert_eq!(config.streaming.control_unit_id, 2);
        assert_eq!(config.controls.reset_on_probe, vec![CameraControl::Hue]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.probe_settings().unwrap(),
            ProbeSettings::default()
        );
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = parse(
            r#"
[streaming]
iso_packet_size = 512

[transfer]
"#,
        );

        assert_eq!(config.streaming.iso_packet_size, 512);
        assert_eq!(config.streaming.streaming_interface, 1);
        assert_eq!(config.streaming.control_unit_id, 3);
        assert_eq!(config.transfer.timeout_ms, 5000);
        assert!(config.controls.reset_on_probe.is_empty());
    }

    #[test]
    fn test_reset_list_opt_in() {
        let config = parse("[controls]\nreset_on_probe = [\"contrast\", \"brightness\"]\n");
        assert_eq!(
            config.probe_settings().unwrap().reset_on_probe,
            vec![CameraControl::Contrast, CameraControl::Brightness]
        );
    }

    #[test]
    fn test_unknown_control_rejected() {
        let result: Result<DriverConfig, _> =
            toml::from_str("[controls]\nreset_on_probe = [\"saturation\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_probe_settings_carry_config() {
        let settings = parse(FULL_CONFIG).probe_settings().unwrap();
        assert_eq!(settings.vendor_id, 0x046D);
        assert_eq!(settings.product_id, 0x0825);
        assert_eq!(settings.timeout, Duration::from_millis(1000));
        assert_eq!(settings.unit_id, 2);
        assert_eq!(settings.iso_packet_size, 944);
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let config = parse(&format!("[driver]\nlog_level = \"{}\"\n", level));
            assert!(config.validate().is_ok(), "{} should be valid", level);
        }
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            "[driver]\nlog_level = \"loud\"\n",
            "[device]\nvendor_id = \"1e4e\"\n",
            "[device]\nproduct_id = \"0xGHIJ\"\n",
            "[transfer]\ntimeout_ms = 0\n",
            "[transfer]\ntimeout_ms = 4294967296\n",
            "[streaming]\niso_packet_size = 0\n",
            "[streaming]\niso_packet_size = 2048\n",
        ];

        for text in cases {
            let config = parse(text);
            assert!(config.validate().is_err(), "accepted {:?}", text);
        }
    }

    #[test]
    fn test_bad_id_fails_probe_settings() {
        let config = parse("[device]\nvendor_id = \"0x\"\n");
        assert!(config.probe_settings().is_err());
    }
}

mod files {
    use super::*;
    use std::fs;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("driver.toml");

        let mut config = DriverConfig::default();
        config.driver.log_level = "warn".to_string();
        config.streaming.iso_packet_size = 800;
        config.controls.reset_on_probe = vec![CameraControl::Hue, CameraControl::Contrast];
        config.save(&path).unwrap();

        let loaded = DriverConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.driver.log_level, "warn");
        assert_eq!(loaded.streaming.iso_packet_size, 800);
        assert_eq!(
            loaded.controls.reset_on_probe,
            vec![CameraControl::Hue, CameraControl::Contrast]
        );
        assert_eq!(loaded.device_filter(), "0x1e4e:0x0109");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        fs::write(&path, "[transfer]\ntimeout_ms = 0\n").unwrap();

        assert!(DriverConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        fs::write(&path, "[driver\nlog_level = ").unwrap();

        assert!(DriverConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DriverConfig::load(Some(dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_load_config_plain_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        fs::write(&path, FULL_CONFIG).unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.streaming.iso_packet_size, 944);
    }
}

mod filters {
    use super::*;

    #[test]
    fn test_default_filter_matches_camera() {
        let filters = vec![DriverConfig::default().device_filter()];
        assert!(DeviceManager::check_filter(0x1E4E, 0x0109, &filters));
        assert!(!DeviceManager::check_filter(0x1E4E, 0x0110, &filters));
        assert!(!DeviceManager::check_filter(0x046D, 0x0109, &filters));
    }

    #[test]
    fn test_configured_filter_matches_configured_camera() {
        let filters = vec![parse(FULL_CONFIG).device_filter()];
        assert!(DeviceManager::check_filter(0x046D, 0x0825, &filters));
        assert!(!DeviceManager::check_filter(0x1E4E, 0x0109, &filters));
    }

    #[test]
    fn test_wildcard_product() {
        let filters = vec!["0x1e4e:*".to_string()];
        assert!(DeviceManager::check_filter(0x1E4E, 0x0109, &filters));
        assert!(DeviceManager::check_filter(0x1E4E, 0x7777, &filters));
        assert!(!DeviceManager::check_filter(0x1E4F, 0x0109, &filters));
    }
}
