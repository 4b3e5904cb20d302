//! Integration tests for the control protocol client
//!
//! Runs the client against the simulated camera and checks the exact transfer
//! sequence of each bracket, capability gating and failure reporting.

use common::test_utils::MockCamera;
use driver::camera::{ClientSettings, ControlClient};
use protocol::types::{class_request, request};
use protocol::{
    BracketStage, CameraControl, CameraError, ControlCapability, ControlRange, Direction,
    RangeError, StreamState, TransportError,
};
use std::time::Duration;

fn client_with(camera: &MockCamera, bitmap: u16) -> ControlClient<MockCamera> {
    ControlClient::new(
        camera.clone(),
        ClientSettings::default(),
        ControlCapability::from_bitmap(bitmap),
    )
    .unwrap()
}

mod set_bracket {
    use super::*;

    #[test]
    fn test_set_transfer_order() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0003);
        client.range(CameraControl::Brightness).unwrap();
        camera.clear_transfers();

        let outcome = client.set(CameraControl::Brightness, 10).unwrap();
        assert_eq!(outcome.previous, 0);
        assert_eq!(outcome.current, 10);
        assert!(outcome.applied());

        let transfers = camera.transfers();
        assert_eq!(transfers.len(), 5);

        // disable stream
        assert_eq!(transfers[0].direction, Direction::Out);
        assert_eq!(transfers[0].setup.request, request::SET_INTERFACE);
        assert_eq!(transfers[0].setup.value, 0);
        assert_eq!(transfers[0].setup.index, 1);

        // read previous
        assert_eq!(transfers[1].direction, Direction::In);
        assert_eq!(transfers[1].setup.request, class_request::GET_CUR);
        assert_eq!(transfers[1].setup.value, 0x0200);
        assert_eq!(transfers[1].setup.index, 0x0300);

        // write
        assert_eq!(transfers[2].direction, Direction::Out);
        assert_eq!(transfers[2].setup.request, class_request::SET_CUR);
        assert_eq!(transfers[2].data, vec![10, 0]);

        // read back
        assert_eq!(transfers[3].setup.request, class_request::GET_CUR);
        assert_eq!(transfers[3].data, vec![10, 0]);

        // enable stream
        assert_eq!(transfers[4].alt_setting(), Some(1));

        assert_eq!(client.stream_state(), StreamState::Enabled);
        assert_eq!(camera.current_value(CameraControl::Brightness), Some(10));
    }

    #[test]
    fn test_first_set_queries_range_first() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0002);

        client.set(CameraControl::Contrast, 50).unwrap();

        let requests: Vec<u8> = camera.transfers().iter().map(|t| t.setup.request).collect();
        assert_eq!(
            requests,
            vec![
                request::SET_INTERFACE,
                class_request::GET_MIN,
                class_request::GET_MAX,
                class_request::GET_RES,
                class_request::GET_DEF,
                request::SET_INTERFACE,
                request::SET_INTERFACE,
                class_request::GET_CUR,
                class_request::SET_CUR,
                class_request::GET_CUR,
                request::SET_INTERFACE,
            ]
        );
    }

    #[test]
    fn test_negative_value_encoding() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);

        let outcome = client.set(CameraControl::Brightness, -20).unwrap();
        assert_eq!(outcome.current, -20);

        let write = camera
            .transfers()
            .into_iter()
            .find(|t| t.setup.request == class_request::SET_CUR)
            .unwrap();
        assert_eq!(write.data, vec![0xEC, 0xFF]);
    }

    #[test]
    fn test_write_failure_leaves_stream_disabled() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);
        client.range(CameraControl::Brightness).unwrap();
        camera.clear_transfers();
        camera.fail_on(class_request::SET_CUR, TransportError::Stall);

        let err = client.set(CameraControl::Brightness, 5).unwrap_err();
        assert_eq!(
            err,
            CameraError::Bracket {
                stage: BracketStage::Write,
                source: TransportError::Stall
            }
        );

        // No re-enable after the failure
        let transfers = camera.transfers();
        assert_eq!(transfers.len(), 3);
        assert_eq!(transfers[2].setup.request, class_request::SET_CUR);
        assert_eq!(client.stream_state(), StreamState::Disabled);
        assert_eq!(camera.current_value(CameraControl::Brightness), Some(0));
    }

    #[test]
    fn test_enable_failure_leaves_state_unknown() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);
        client.range(CameraControl::Brightness).unwrap();
        camera.fail_on_nth(request::SET_INTERFACE, 1, TransportError::Timeout);

        let err = client.set(CameraControl::Brightness, 7).unwrap_err();
        assert_eq!(
            err,
            CameraError::Bracket {
                stage: BracketStage::EnableStream,
                source: TransportError::Timeout
            }
        );
        assert_eq!(client.stream_state(), StreamState::Unknown);

        // The write itself went through
        assert_eq!(camera.current_value(CameraControl::Brightness), Some(7));
    }

    #[test]
    fn test_disable_failure_issues_nothing_else() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);
        camera.fail_on(request::SET_INTERFACE, TransportError::Disconnected);

        let err = client.get(CameraControl::Brightness).unwrap_err();
        assert_eq!(
            err,
            CameraError::Bracket {
                stage: BracketStage::DisableStream,
                source: TransportError::Disconnected
            }
        );
        assert_eq!(camera.transfers().len(), 1);
        assert_eq!(client.stream_state(), StreamState::Unknown);
    }
}

mod capability {
    use super::*;

    #[test]
    fn test_unsupported_control_issues_no_transfer() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);

        for result in [
            client.set(CameraControl::Hue, 0).map(|_| ()),
            client.get(CameraControl::Hue).map(|_| ()),
            client.query_range(CameraControl::Hue, true).map(|_| ()),
            client.set(CameraControl::Contrast, 10).map(|_| ()),
        ] {
            assert!(matches!(result, Err(CameraError::Unsupported { .. })));
        }

        assert!(camera.transfers().is_empty());
    }

    #[test]
    fn test_controls_lists_only_supported() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0005);

        let controls = client.controls().unwrap();
        let names: Vec<CameraControl> = controls.iter().map(|c| c.control).collect();
        assert_eq!(names, vec![CameraControl::Brightness, CameraControl::Hue]);
        assert_eq!(controls[1].range.step, 100);
    }

    #[test]
    fn test_no_controls() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0000);
        assert!(client.controls().unwrap().is_empty());
        assert!(camera.transfers().is_empty());
    }
}

mod range_query {
    use super::*;

    #[test]
    fn test_range_decodes_signed_values() {
        let camera = MockCamera::new().with_range(
            CameraControl::Brightness,
            ControlRange {
                min: -20,
                max: 20,
                step: 1,
                default: 0,
            },
        );
        let mut client = client_with(&camera, 0x0001);

        let range = client.query_range(CameraControl::Brightness, false).unwrap();
        assert_eq!((range.min, range.max, range.step, range.default), (-20, 20, 1, 0));

        let transfers = camera.transfers();
        assert_eq!(transfers[1].data, vec![0xEC, 0xFF]);
        assert_eq!(transfers[2].data, vec![0x14, 0x00]);
        assert_eq!(transfers[3].data, vec![0x01, 0x00]);
        assert_eq!(transfers[4].data, vec![0x00, 0x00]);
    }

    #[test]
    fn test_query_with_reset() {
        let camera = MockCamera::new().with_value(CameraControl::Contrast, 80);
        let mut client = client_with(&camera, 0x0002);

        let range = client.query_range(CameraControl::Contrast, true).unwrap();
        assert_eq!(range.default, 32);
        assert_eq!(camera.current_value(CameraControl::Contrast), Some(32));

        let transfers = camera.transfers();
        let requests: Vec<u8> = transfers.iter().map(|t| t.setup.request).collect();
        assert_eq!(
            requests,
            vec![
                request::SET_INTERFACE,
                class_request::GET_MIN,
                class_request::GET_MAX,
                class_request::GET_RES,
                class_request::GET_DEF,
                class_request::SET_CUR,
                request::SET_INTERFACE,
            ]
        );
        assert_eq!(transfers[0].alt_setting(), Some(0));
        assert_eq!(transfers[6].alt_setting(), Some(1));
        assert_eq!(client.stream_state(), StreamState::Enabled);
    }

    #[test]
    fn test_out_of_order_range_rejected() {
        let camera = MockCamera::new().with_range(
            CameraControl::Brightness,
            ControlRange {
                min: 10,
                max: -10,
                step: 1,
                default: 0,
            },
        );
        let mut client = client_with(&camera, 0x0001);

        let err = client.query_range(CameraControl::Brightness, true).unwrap_err();
        assert!(matches!(
            err,
            CameraError::RangeInvalid {
                control: CameraControl::Brightness,
                source: RangeError::OrderViolation { .. }
            }
        ));

        // Bracket still closed, nothing written, nothing cached
        let transfers = camera.transfers();
        assert!(transfers.iter().all(|t| t.setup.request != class_request::SET_CUR));
        assert_eq!(transfers.last().and_then(|t| t.alt_setting()), Some(1));
        assert_eq!(client.stream_state(), StreamState::Enabled);
        assert!(client.cached_range(CameraControl::Brightness).is_none());
    }

    #[test]
    fn test_zero_step_rejected() {
        let camera = MockCamera::new().with_range(
            CameraControl::Hue,
            ControlRange {
                min: -100,
                max: 100,
                step: 0,
                default: 0,
            },
        );
        let mut client = client_with(&camera, 0x0004);

        let err = client.range(CameraControl::Hue).unwrap_err();
        assert!(matches!(
            err,
            CameraError::RangeInvalid {
                source: RangeError::ZeroStep { step: 0 },
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_value_rejected_before_bracket() {
        let camera = MockCamera::new();
        let mut client = client_with(&camera, 0x0001);
        client.range(CameraControl::Brightness).unwrap();
        camera.clear_transfers();

        let err = client.set(CameraControl::Brightness, 100).unwrap_err();
        assert_eq!(
            err,
            CameraError::OutOfRange {
                control: CameraControl::Brightness,
                value: 100,
                min: -64,
                max: 64
            }
        );
        assert!(camera.transfers().is_empty());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let camera = MockCamera::new();
        let settings = ClientSettings {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        let mut client =
            ControlClient::new(camera.clone(), settings, ControlCapability::from_bitmap(1)).unwrap();

        let err = client.get(CameraControl::Brightness).unwrap_err();
        assert_eq!(
            err,
            CameraError::Bracket {
                stage: BracketStage::DisableStream,
                source: TransportError::InvalidTimeout
            }
        );
        assert!(camera.transfers().is_empty());
    }
}
