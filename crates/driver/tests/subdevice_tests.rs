//! Integration tests for the sub-device lifecycle
//!
//! Probes simulated cameras into control and streaming sub-devices, checks
//! framework registration and teardown ordering.

use common::test_utils::{MockCamera, create_mock_summary, sample_camera_blob};
use driver::camera::framework::RAW_MINOR_BASE;
use driver::camera::{
    InterfaceLayout, ProbeSettings, StreamingSubDevice, SupportsCapability, SupportsControl,
    SupportsFormat, VideoFramework, VideoRegistry, probe_camera,
};
use protocol::types::{class_request, request};
use protocol::{
    CameraControl, CameraError, DescriptorForest, DeviceLocation, ParseError, PixelFormat,
    SubDeviceState, TransportError,
};
use std::sync::Arc;

const LOCATION: DeviceLocation = DeviceLocation {
    bus_number: 1,
    device_address: 4,
};

fn sample_layouts() -> Vec<InterfaceLayout> {
    vec![
        InterfaceLayout {
            number: 0,
            alt_settings: 1,
        },
        InterfaceLayout {
            number: 1,
            alt_settings: 9,
        },
    ]
}

fn framework(registry: &Arc<VideoRegistry>) -> Arc<dyn VideoFramework> {
    Arc::clone(registry) as Arc<dyn VideoFramework>
}

fn resetting(controls: &[CameraControl]) -> ProbeSettings {
    ProbeSettings {
        reset_on_probe: controls.to_vec(),
        ..Default::default()
    }
}

mod attach {
    use super::*;

    #[test]
    fn test_probe_registers_both_halves() {
        let registry = Arc::new(VideoRegistry::new());
        let camera = probe_camera(
            MockCamera::new(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        assert_eq!(registry.node_names(), vec!["video0"]);
        assert_eq!(registry.raw_minors(), vec![RAW_MINOR_BASE]);

        assert_eq!(camera.control().state(), SubDeviceState::Attached);
        assert_eq!(camera.control().node(), Some("video0"));

        let streaming = camera.streaming().unwrap();
        assert_eq!(streaming.state(), SubDeviceState::Attached);
        assert_eq!(streaming.selection().alternate_setting, 8);
        assert_eq!(streaming.selection().endpoint_address, 0x81);
        assert_eq!(streaming.selection().packet_size, 1023);
        assert_eq!(streaming.buffer_len(), 1023);
    }

    #[test]
    fn test_camera_info() {
        let registry = Arc::new(VideoRegistry::new());
        let camera = probe_camera(
            MockCamera::new(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        let info = camera.info(create_mock_summary(1, 4)).unwrap();
        assert_eq!(info.node, "video0");
        assert!(info.capability.brightness && info.capability.contrast && info.capability.hue);
        assert_eq!(info.capability_info.driver, "uvc-cam");
        assert_eq!(info.capability_info.card, "Generic Web Cam");
        assert_eq!(info.capability_info.bus_info, "usb-1-4");
        assert_eq!(info.format, PixelFormat::yuyv_720p());
        assert_eq!(info.streaming.map(|s| s.packet_size), Some(1023));
    }

    #[test]
    fn test_probe_resets_configured_controls() {
        let control = MockCamera::new()
            .with_value(CameraControl::Contrast, 80)
            .with_value(CameraControl::Brightness, 30)
            .with_value(CameraControl::Hue, 400);
        let registry = Arc::new(VideoRegistry::new());

        let _camera = probe_camera(
            control.clone(),
            &sample_layouts(),
            LOCATION,
            &resetting(&[CameraControl::Contrast, CameraControl::Brightness]),
            framework(&registry),
        )
        .unwrap();

        assert_eq!(control.current_value(CameraControl::Contrast), Some(32));
        assert_eq!(control.current_value(CameraControl::Brightness), Some(0));
        // Not in the reset list
        assert_eq!(control.current_value(CameraControl::Hue), Some(400));
    }

    #[test]
    fn test_default_probe_leaves_values_alone() {
        let control = MockCamera::new()
            .with_value(CameraControl::Contrast, 80)
            .with_value(CameraControl::Brightness, 30);
        let registry = Arc::new(VideoRegistry::new());

        let camera = probe_camera(
            control.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        assert!(control
            .transfers()
            .iter()
            .all(|t| t.setup.request != class_request::SET_CUR));
        assert_eq!(control.current_value(CameraControl::Contrast), Some(80));
        assert_eq!(control.current_value(CameraControl::Brightness), Some(30));

        // Every supported range is cached at attach
        let device = camera.device().unwrap();
        assert_eq!(device.controls().unwrap().len(), 3);
    }

    #[test]
    fn test_reattach_keeps_written_value() {
        let device = MockCamera::new();
        let registry = Arc::new(VideoRegistry::new());

        let camera = probe_camera(
            device.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();
        camera
            .device()
            .unwrap()
            .set_control(CameraControl::Brightness, 10)
            .unwrap();
        camera.disconnect();

        let camera = probe_camera(
            device.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();
        assert_eq!(
            camera
                .device()
                .unwrap()
                .get_control(CameraControl::Brightness)
                .unwrap(),
            10
        );
    }

    #[test]
    fn test_set_after_attach_is_five_transfers() {
        let device = MockCamera::new();
        let registry = Arc::new(VideoRegistry::new());
        let camera = probe_camera(
            device.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();
        device.clear_transfers();

        camera
            .device()
            .unwrap()
            .set_control(CameraControl::Hue, 500)
            .unwrap();

        let requests: Vec<u8> = device.transfers().iter().map(|t| t.setup.request).collect();
        assert_eq!(
            requests,
            vec![
                request::SET_INTERFACE,
                class_request::GET_CUR,
                class_request::SET_CUR,
                class_request::GET_CUR,
                request::SET_INTERFACE,
            ]
        );
    }

    #[test]
    fn test_reset_failure_does_not_abort_probe() {
        let control = MockCamera::new();
        control.fail_on(class_request::GET_MIN, TransportError::Stall);
        let registry = Arc::new(VideoRegistry::new());

        let camera = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        assert_eq!(camera.control().state(), SubDeviceState::Attached);
    }

    #[test]
    fn test_probe_without_layouts_uses_settings() {
        let registry = Arc::new(VideoRegistry::new());
        let camera = probe_camera(
            MockCamera::new(),
            &[],
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();
        assert_eq!(camera.streaming().unwrap().selection().interface_number, 1);
    }
}

mod failures {
    use super::*;

    #[test]
    fn test_empty_verification_read_is_wrong_interface() {
        let registry = Arc::new(VideoRegistry::new());
        let control = MockCamera::new().with_device_descriptor(Vec::new());

        let result = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        );

        assert!(matches!(result, Err(CameraError::WrongInterface)));
        // Streaming half was torn back down
        assert!(registry.node_names().is_empty());
        assert!(registry.raw_minors().is_empty());
    }

    #[test]
    fn test_vendor_mismatch_only_warns() {
        let registry = Arc::new(VideoRegistry::new());
        let control =
            MockCamera::new().with_device_descriptor(protocol::device_descriptor(0x1234, 0x5678).to_vec());

        let camera = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        let identity = camera.device().unwrap().identity().unwrap();
        assert_eq!(identity.vendor_id, 0x1234);
    }

    #[test]
    fn test_malformed_descriptor_fails_attach() {
        let registry = Arc::new(VideoRegistry::new());
        let mut blob = sample_camera_blob();
        // Zero the length byte of the first interface association record
        blob[9] = 0;
        let control = MockCamera::new().with_config_blob(blob);

        let result = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        );

        assert!(matches!(
            result,
            Err(CameraError::Parse(ParseError::ZeroLength { offset: 9 }))
        ));
        assert!(registry.raw_minors().is_empty());
    }

    #[test]
    fn test_descriptor_transfer_failure_fails_attach() {
        let registry = Arc::new(VideoRegistry::new());
        let control = MockCamera::new();
        control.fail_on_nth(
            protocol::types::request::GET_DESCRIPTOR,
            1,
            TransportError::Timeout,
        );

        let result = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        );
        assert_eq!(
            result.err(),
            Some(CameraError::Transport(TransportError::Timeout))
        );
    }

    #[test]
    fn test_missing_alt_setting_keeps_controls() {
        let registry = Arc::new(VideoRegistry::new());
        let settings = ProbeSettings {
            iso_packet_size: 512,
            ..Default::default()
        };

        let camera = probe_camera(
            MockCamera::new(),
            &sample_layouts(),
            LOCATION,
            &settings,
            framework(&registry),
        )
        .unwrap();

        assert!(camera.streaming().is_none());
        assert!(camera.device().unwrap().streaming().is_none());
        assert_eq!(registry.node_names(), vec!["video0"]);
        assert!(registry.raw_minors().is_empty());
    }

    #[test]
    fn test_streaming_probe_no_match() {
        let registry = Arc::new(VideoRegistry::new());
        let settings = ProbeSettings {
            iso_packet_size: 512,
            ..Default::default()
        };

        let forest = DescriptorForest::parse(&sample_camera_blob()).unwrap();

        let result = StreamingSubDevice::probe(&forest, LOCATION, &settings, framework(&registry));
        assert!(matches!(
            result,
            Err(CameraError::NoMatchingAltSetting { expected: 512 })
        ));
    }
}

mod teardown {
    use super::*;

    #[test]
    fn test_disconnect_unregisters_everything() {
        let registry = Arc::new(VideoRegistry::new());
        let camera = probe_camera(
            MockCamera::new(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        camera.disconnect();

        assert!(registry.node_names().is_empty());
        assert!(registry.raw_minors().is_empty());
    }

    #[test]
    fn test_in_flight_reference_outlives_disconnect() {
        let registry = Arc::new(VideoRegistry::new());
        let control = MockCamera::new().with_value(CameraControl::Hue, 300);
        let camera = probe_camera(
            control,
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        let in_flight = registry.node("video0").unwrap();
        camera.disconnect();

        // No new requests can find the node, but the held one still works
        assert!(registry.node("video0").is_none());
        assert_eq!(in_flight.get_control(CameraControl::Hue).unwrap(), 300);
        assert_eq!(in_flight.capability_info().bus_info, "usb-1-4");
        assert_eq!(Arc::strong_count(&in_flight), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let registry = Arc::new(VideoRegistry::new());
        {
            let _camera = probe_camera(
                MockCamera::new(),
                &sample_layouts(),
                LOCATION,
                &ProbeSettings::default(),
                framework(&registry),
            )
            .unwrap();
            assert_eq!(registry.node_names().len(), 1);
        }
        assert!(registry.node_names().is_empty());
        assert!(registry.raw_minors().is_empty());
    }
}

mod framework_boundary {
    use super::*;

    #[test]
    fn test_node_answers_framework_requests() {
        let registry = Arc::new(VideoRegistry::new());
        let control = MockCamera::new();
        let _camera = probe_camera(
            control.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();
        let node = registry.node("video0").unwrap();

        assert_eq!(
            node.supported_controls(),
            vec![
                CameraControl::Brightness,
                CameraControl::Contrast,
                CameraControl::Hue
            ]
        );
        assert_eq!(node.control_range(CameraControl::Hue).unwrap().max, 2000);

        let outcome = node.set_control(CameraControl::Brightness, -5).unwrap();
        assert_eq!(outcome.current, -5);
        assert_eq!(node.get_control(CameraControl::Brightness).unwrap(), -5);

        assert_eq!(node.queue_info().min_buffers_needed, 2);
        assert_eq!(node.enum_formats(), vec![PixelFormat::yuyv_720p()]);

        let mut vga = PixelFormat::yuyv_720p();
        vga.width = 640;
        vga.height = 480;
        assert!(matches!(
            node.try_format(&vga),
            Err(CameraError::InvalidFormat(_))
        ));
        assert!(node.set_format(&vga).is_err());
        assert_eq!(node.get_format(), PixelFormat::yuyv_720p());
        assert!(node.set_format(&PixelFormat::yuyv_720p()).is_ok());
    }
}

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_attach_of_several_cameras() {
        let registry = Arc::new(VideoRegistry::new());

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let location = DeviceLocation {
                        bus_number: 1,
                        device_address: 10 + i,
                    };
                    probe_camera(
                        MockCamera::new(),
                        &sample_layouts(),
                        location,
                        &ProbeSettings::default(),
                        registry as Arc<dyn VideoFramework>,
                    )
                })
            })
            .collect();

        let cameras: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let mut nodes: Vec<String> = cameras
            .iter()
            .map(|c| c.control().node().unwrap().to_string())
            .collect();
        nodes.sort();
        assert_eq!(nodes, vec!["video0", "video1", "video2", "video3"]);
        assert_eq!(registry.raw_minors().len(), 4);

        for camera in cameras {
            camera.disconnect();
        }
        assert!(registry.node_names().is_empty());
        assert!(registry.raw_minors().is_empty());
    }

    #[test]
    fn test_descriptors_read_once_per_attach() {
        let device = MockCamera::new();
        let registry = Arc::new(VideoRegistry::new());

        let camera = probe_camera(
            device.clone(),
            &sample_layouts(),
            LOCATION,
            &ProbeSettings::default(),
            framework(&registry),
        )
        .unwrap();

        // Header then full blob; the streaming half reuses the parsed forest
        let configuration_reads = device
            .transfers()
            .iter()
            .filter(|t| t.setup.request == request::GET_DESCRIPTOR && t.setup.value == 0x0200)
            .count();
        assert_eq!(configuration_reads, 2);

        assert_eq!(camera.control().state(), SubDeviceState::Attached);
        assert_eq!(camera.streaming().unwrap().state(), SubDeviceState::Attached);
        assert_eq!(camera.device().unwrap().forest().alternate_settings(1).count(), 9);
    }
}
