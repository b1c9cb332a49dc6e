mod common;
use common::*;

const VERSION: Command = Command(0x1202);
const SIGNAL_ALARM: Command = Command(0x1272);
const TRAY_EVENT: Command = Command(0x1105);

#[test]
fn test_bad_crc_is_nacked_and_never_dispatched() {
    let (link, device, events) = open_link(test_config());
    let crc = Crc32::new();
    let handle = spawn_device(device, move |dev| {
        let req = dev.expect(VERSION);
        let good = Frame::new(VERSION, FrameType::RespOk, 0x0A0B, 0x0C0D, Bytes::from_static(b"SW3"));
        let mut bytes = good.encode(&crc).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        dev.send_raw(&bytes);
        dev.collect_acks(1, DEVICE_WAIT);
        let _ = req;
    });

    let err = link.call(VERSION, Bytes::new(), Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }), "got {:?}", err);

    let device = handle.join().unwrap();
    let nack = &device.acks[0];
    assert_eq!(nack.ftype, FrameType::AckFail);
    assert_eq!(nack.cmd, VERSION);
    assert_eq!((nack.msg_idx, nack.cmd_idx), (0x0A0B, 0x0C0D));
    assert!(events.ready().is_empty());
    assert_eq!(events.error_codes(), vec![ErrorCode::CHECKSUM, ErrorCode::TIMEOUT]);
}

#[test]
fn test_garbage_before_frame_is_skipped() {
    let (link, device, events) = open_link(test_config());
    let handle = spawn_device(device, |dev| {
        let req = dev.expect(VERSION);
        dev.send_raw(&[0x55]);
        // a lone first magic byte followed by the real frame
        dev.send_raw(&[0x7C]);
        dev.respond(&req, b"ok");
    });
    let resp = link.call(VERSION, Bytes::new(), Duration::from_secs(1)).unwrap();
    assert_eq!(&resp[..], b"ok");
    handle.join().unwrap();
    assert!(events.error_codes().is_empty());
}

#[test]
fn test_frame_split_across_reads() {
    let (link, device, _events) = open_link(test_config());
    let crc = Crc32::new();
    let handle = spawn_device(device, move |dev| {
        let req = dev.expect(VERSION);
        let frame = Frame::new(VERSION, FrameType::RespOk, req.msg_idx, req.cmd_idx, Bytes::from_static(b"slow"));
        let bytes = frame.encode(&crc).unwrap();
        for piece in bytes.chunks(3) {
            dev.send_raw(piece);
            thread::sleep(Duration::from_millis(5));
        }
    });
    let resp = link.call(VERSION, Bytes::new(), Duration::from_secs(1)).unwrap();
    assert_eq!(&resp[..], b"slow");
    handle.join().unwrap();
}

#[test]
fn test_alarm_report_goes_to_alarm_callback() {
    let (_link, device, events) = open_link(test_config());
    let handle = spawn_device(device, |dev| {
        dev.push(SIGNAL_ALARM, FrameType::RespOk, b"B0101;A0200");
        dev.push(SIGNAL_ALARM, FrameType::Req, b"door open");
        dev.collect_acks(2, DEVICE_WAIT);
    });
    let device = handle.join().unwrap();

    assert!(wait_until(DEVICE_WAIT, || events.alarms().len() == 2));
    let alarms = events.alarms();
    assert_eq!(alarms[0].0, SIGNAL_ALARM);
    assert_eq!(alarms[0].1, vec!["Over current", "Temperature sensor fault"]);
    assert_eq!(alarms[1].1, vec!["door open"]);
    assert!(events.ready().is_empty());
    assert!(device.acks.iter().all(|ack| ack.ftype == FrameType::AckOk));
}

#[test]
fn test_alarm_report_is_not_stored_as_response() {
    let (link, device, events) = open_link(test_config());
    let handle = spawn_device(device, |dev| {
        let _req = dev.expect(SIGNAL_ALARM);
        dev.push(SIGNAL_ALARM, FrameType::RespOk, b"B0200");
    });
    let err = link.call(SIGNAL_ALARM, Bytes::new(), Duration::from_millis(150)).unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
    handle.join().unwrap();
    assert_eq!(events.alarms().len(), 1);
}

#[test]
fn test_peer_request_is_acked_and_forwarded() {
    let (_link, device, events) = open_link(test_config());
    let handle = spawn_device(device, |dev| {
        let frame = Frame::new(TRAY_EVENT, FrameType::Req, 0x0042, 0x0043, Bytes::from_static(&[1]));
        dev.send(&frame);
        dev.collect_acks(1, DEVICE_WAIT);
    });
    let device = handle.join().unwrap();
    let ack = &device.acks[0];
    assert_eq!(ack.ftype, FrameType::AckOk);
    assert_eq!(ack.cmd, TRAY_EVENT);
    assert_eq!((ack.msg_idx, ack.cmd_idx), (0x0042, 0x0043));
    assert!(wait_until(DEVICE_WAIT, || !events.ready().is_empty()));
    assert_eq!(events.ready(), vec![(TRAY_EVENT, vec![1])]);
}

#[test]
fn test_unsolicited_response_reaches_ready_read() {
    let (_link, device, events) = open_link(test_config());
    let status = Command(0x1104);
    let handle = spawn_device(device, move |dev| {
        dev.push(status, FrameType::RespOk, &[0, 1, 0, 1, 0, 0, 1]);
    });
    handle.join().unwrap();
    assert!(wait_until(DEVICE_WAIT, || !events.ready().is_empty()));
    assert_eq!(events.ready()[0], (status, vec![0, 1, 0, 1, 0, 0, 1]));
}

#[test]
fn test_frames_dispatched_in_arrival_order() {
    let (_link, device, events) = open_link(test_config());
    let handle = spawn_device(device, |dev| {
        for i in 0..20u8 {
            dev.push(Command(0x1100 | i as u16), FrameType::Req, &[i]);
        }
    });
    handle.join().unwrap();
    assert!(wait_until(DEVICE_WAIT, || events.ready().len() == 20));
    let order: Vec<u8> = events.ready().iter().map(|(_, data)| data[0]).collect();
    assert_eq!(order, (0..20).collect::<Vec<u8>>());
}
