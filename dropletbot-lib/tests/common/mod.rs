//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use dropletbot_lib::command::{Board, Command, opcode};
#[allow(unused_imports)]
pub use dropletbot_lib::config::{LinkConfig, UpgradeOptions};
#[allow(unused_imports)]
pub use dropletbot_lib::crc::Crc32;
#[allow(unused_imports)]
pub use dropletbot_lib::dispatch::LinkEvents;
#[allow(unused_imports)]
pub use dropletbot_lib::error::{ErrorCode, LinkError};
#[allow(unused_imports)]
pub use dropletbot_lib::frame::{Decoded, Frame, FrameType, decode};
#[allow(unused_imports)]
pub use dropletbot_lib::link::Link;
#[allow(unused_imports)]
pub use dropletbot_lib::transport::MemoryPort;
#[allow(unused_imports)]
pub use std::sync::Arc;
#[allow(unused_imports)]
pub use std::thread;
#[allow(unused_imports)]
pub use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use std::io::{Read, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// How long the scripted device waits for the host before giving up
#[allow(dead_code)]
pub const DEVICE_WAIT: Duration = Duration::from_secs(3);

/// Timings short enough to keep the suite fast
#[allow(dead_code)]
pub fn test_config() -> LinkConfig {
    LinkConfig {
        port: "memory".to_string(),
        idle_sleep: Duration::from_millis(1),
        poll_interval: Duration::from_millis(2),
        default_timeout: Duration::from_millis(500),
        login_timeout: Duration::from_millis(500),
        param_timeout: Duration::from_millis(500),
        macro_timeout: Duration::from_millis(500),
        reboot_delay: Duration::from_millis(20),
        reboot_login_timeout: Duration::from_millis(500),
        ..LinkConfig::default()
    }
}

/// Records every callback the link fires.
#[derive(Default)]
pub struct RecordingEvents {
    pub ready: Mutex<Vec<(Command, Vec<u8>)>>,
    pub errors: Mutex<Vec<(i32, String)>>,
    pub alarms: Mutex<Vec<(Command, Vec<String>)>>,
}

impl LinkEvents for RecordingEvents {
    fn on_ready_read(&self, cmd: Command, data: &[u8]) {
        self.ready.lock().unwrap().push((cmd, data.to_vec()));
    }

    fn on_error(&self, code: i32, message: &str) {
        self.errors.lock().unwrap().push((code, message.to_string()));
    }

    fn on_alarm(&self, cmd: Command, alarms: &[String]) {
        self.alarms.lock().unwrap().push((cmd, alarms.to_vec()));
    }
}

#[allow(dead_code)]
impl RecordingEvents {
    pub fn error_codes(&self) -> Vec<i32> {
        self.errors.lock().unwrap().iter().map(|(code, _)| *code).collect()
    }

    pub fn ready(&self) -> Vec<(Command, Vec<u8>)> {
        self.ready.lock().unwrap().clone()
    }

    pub fn alarms(&self) -> Vec<(Command, Vec<String>)> {
        self.alarms.lock().unwrap().clone()
    }
}

/// Poll `check` until it holds or `limit` passes.
#[allow(dead_code)]
pub fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}

/// The far end of the serial link, speaking the wire protocol.
pub struct Device {
    port: MemoryPort,
    crc: Crc32,
    buf: BytesMut,
    /// ACK frames the host sent back
    pub acks: Vec<Frame>,
    /// Requests the host sent
    pub requests: Vec<Frame>,
}

#[allow(dead_code)]
impl Device {
    pub fn new(port: MemoryPort) -> Self {
        Self {
            port,
            crc: Crc32::new(),
            buf: BytesMut::new(),
            acks: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn port(&self) -> &MemoryPort {
        &self.port
    }

    fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 512];
        match self.port.read(&mut chunk) {
            Ok(0) | Err(_) => false,
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                true
            }
        }
    }

    /// Next frame of any type from the host.
    pub fn recv(&mut self, limit: Duration) -> Option<Frame> {
        let start = Instant::now();
        loop {
            match decode(&self.buf, &self.crc).expect("host sent a corrupt frame") {
                Decoded::Frame { frame, consumed } => {
                    self.buf.advance(consumed);
                    return Some(frame);
                }
                Decoded::Discard(n) => {
                    self.buf.advance(n);
                    continue;
                }
                Decoded::Incomplete => {}
            }
            if start.elapsed() > limit {
                return None;
            }
            if !self.fill() {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Next request from the host, collecting any ACKs on the way.
    pub fn recv_request(&mut self, limit: Duration) -> Option<Frame> {
        let start = Instant::now();
        while let Some(frame) = self.recv(limit.saturating_sub(start.elapsed())) {
            if matches!(frame.ftype, FrameType::AckOk | FrameType::AckFail) {
                self.acks.push(frame);
            } else {
                self.requests.push(frame.clone());
                return Some(frame);
            }
        }
        None
    }

    /// Wait for a request and insist it is for `cmd`.
    pub fn expect(&mut self, cmd: Command) -> Frame {
        let frame = self
            .recv_request(DEVICE_WAIT)
            .unwrap_or_else(|| panic!("device timed out waiting for {}", cmd));
        assert_eq!(frame.cmd, cmd, "unexpected request {:?}", frame);
        frame
    }

    /// Wait until the host has acknowledged `count` frames in total.
    pub fn collect_acks(&mut self, count: usize, limit: Duration) -> &[Frame] {
        let start = Instant::now();
        while self.acks.len() < count && start.elapsed() < limit {
            match self.recv(Duration::from_millis(10)) {
                Some(frame) if matches!(frame.ftype, FrameType::AckOk | FrameType::AckFail) => self.acks.push(frame),
                Some(frame) => self.requests.push(frame),
                None => {}
            }
        }
        &self.acks
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.port.write_all(bytes).expect("device write failed");
    }

    pub fn send(&mut self, frame: &Frame) {
        let bytes = frame.encode(&self.crc).expect("encode failed");
        self.send_raw(&bytes);
    }

    /// Answer `req` with `ftype`, echoing its sequence numbers.
    pub fn reply(&mut self, req: &Frame, ftype: FrameType, payload: &[u8]) {
        let frame = Frame::new(req.cmd, ftype, req.msg_idx, req.cmd_idx, Bytes::copy_from_slice(payload));
        self.send(&frame);
    }

    pub fn respond(&mut self, req: &Frame, payload: &[u8]) {
        self.reply(req, FrameType::RespOk, payload);
    }

    /// Push an unsolicited frame.
    pub fn push(&mut self, cmd: Command, ftype: FrameType, payload: &[u8]) {
        let frame = Frame::new(cmd, ftype, 0x0100, 0x0200, Bytes::copy_from_slice(payload));
        self.send(&frame);
    }

    /// Wait for a login request on `board` and answer it with `status`.
    pub fn accept_login(&mut self, board: Board, status: u8) -> Frame {
        let req = self.expect(board.command(opcode::LOGIN));
        self.respond(&req, &[status]);
        req
    }
}

/// A link over an in-memory port, plus the device end and the recorded events.
#[allow(dead_code)]
pub fn open_link(config: LinkConfig) -> (Link, Device, Arc<RecordingEvents>) {
    let (host, device) = MemoryPort::pair();
    let events = Arc::new(RecordingEvents::default());
    let (reader, writer) = host.split();
    let link = Link::with_transport(reader, writer, config, events.clone()).expect("failed to start link");
    (link, Device::new(device), events)
}

/// Host-side writer that can be broken on demand while reads keep working.
#[allow(dead_code)]
pub struct SwitchedWriter {
    port: MemoryPort,
    switch: Arc<WriterSwitch>,
}

/// Controls and observes a [`SwitchedWriter`].
#[allow(dead_code)]
#[derive(Default)]
pub struct WriterSwitch {
    pub broken: AtomicBool,
    pub dropped: AtomicBool,
}

impl Write for SwitchedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.switch.broken.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "adapter unplugged"));
        }
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl Drop for SwitchedWriter {
    fn drop(&mut self) {
        self.switch.dropped.store(true, Ordering::SeqCst);
    }
}

/// Like [`open_link`], but the host writer goes through a [`SwitchedWriter`].
#[allow(dead_code)]
pub fn open_switched_link(config: LinkConfig) -> (Link, Device, Arc<RecordingEvents>, Arc<WriterSwitch>) {
    let (host, device) = MemoryPort::pair();
    let events = Arc::new(RecordingEvents::default());
    let switch = Arc::new(WriterSwitch::default());
    let writer = SwitchedWriter {
        port: host.clone(),
        switch: switch.clone(),
    };
    let link = Link::with_transport(Box::new(host), Box::new(writer), config, events.clone())
        .expect("failed to start link");
    (link, Device::new(device), events, switch)
}

/// Run a device script on its own thread.
#[allow(dead_code)]
pub fn spawn_device<F>(mut device: Device, script: F) -> thread::JoinHandle<Device>
where
    F: FnOnce(&mut Device) + Send + 'static,
{
    thread::spawn(move || {
        script(&mut device);
        device
    })
}

/// A link with the given boards already logged in.
#[allow(dead_code)]
pub fn logged_in(boards: &[Board]) -> (Link, Device, Arc<RecordingEvents>) {
    let (link, device, events) = open_link(test_config());
    let wanted = boards.to_vec();
    let handle = spawn_device(device, move |dev| {
        for board in wanted {
            dev.accept_login(board, 0);
        }
    });
    for board in boards {
        assert!(link.login_board(*board), "{} login failed", board);
    }
    let device = handle.join().expect("device script panicked");
    (link, device, events)
}
