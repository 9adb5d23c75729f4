//! RFB client
//!
//! Blocking remote-framebuffer client used as the default [`Connector`].
//! Supports protocol 3.3/3.7/3.8, security types None and VNC
//! authentication, and the Raw and DesktopSize encodings. The framebuffer is
//! requested as 32bpp little-endian true colour and kept locally as RGB8.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use tracing::{debug, info};

use crate::backend::{Connector, MouseButton, RemoteDisplay};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::keys::KeyToken;

const SECURITY_INVALID: u8 = 0;
const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;

const ENCODING_RAW: i32 = 0;
const ENCODING_DESKTOP_SIZE: i32 = -223;

// Client -> server
const MSG_SET_PIXEL_FORMAT: u8 = 0;
const MSG_SET_ENCODINGS: u8 = 2;
const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
const MSG_KEY_EVENT: u8 = 4;
const MSG_POINTER_EVENT: u8 = 5;

// Server -> client
const MSG_FRAMEBUFFER_UPDATE: u8 = 0;
const MSG_SET_COLOUR_MAP: u8 = 1;
const MSG_BELL: u8 = 2;
const MSG_SERVER_CUT_TEXT: u8 = 3;

/// Longest failure reason / cut text accepted from a server.
const MAX_SERVER_STRING: u32 = 1 << 20;

// ========== Connector ==========

/// Opens RFB connections over TCP.
#[derive(Debug, Clone)]
pub struct RfbConnector {
    io_timeout: Duration,
}

impl RfbConnector {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl Default for RfbConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for RfbConnector {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn RemoteDisplay>> {
        let client = RfbClient::connect(config, self.io_timeout)?;
        Ok(Box::new(client))
    }
}

// ========== Client ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolVersion {
    major: u32,
    minor: u32,
}

impl ProtocolVersion {
    fn parse(banner: &[u8; 12]) -> io::Result<Self> {
        let text = std::str::from_utf8(banner).map_err(|_| invalid_data("non-ascii banner"))?;
        let rest = text
            .strip_prefix("RFB ")
            .and_then(|r| r.strip_suffix('\n'))
            .ok_or_else(|| invalid_data(format!("bad protocol banner: {:?}", text)))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| invalid_data(format!("bad protocol banner: {:?}", text)))?;
        let major = major.parse().map_err(|_| invalid_data("bad major version"))?;
        let minor = minor.parse().map_err(|_| invalid_data("bad minor version"))?;
        Ok(Self { major, minor })
    }

    /// Highest version we speak that the server also speaks.
    fn negotiate(self) -> io::Result<Self> {
        if self.major < 3 {
            return Err(invalid_data(format!(
                "unsupported protocol version {}.{}",
                self.major, self.minor
            )));
        }
        let minor = match (self.major, self.minor) {
            (3, m) if m < 7 => 3,
            (3, 7) => 7,
            _ => 8,
        };
        Ok(Self { major: 3, minor })
    }

    fn banner(self) -> String {
        format!("RFB {:03}.{:03}\n", self.major, self.minor)
    }
}

/// A connected RFB session.
pub struct RfbClient {
    stream: TcpStream,
    endpoint: String,
    width: u16,
    height: u16,
    desktop_name: String,
    /// RGB8 copy of the remote framebuffer.
    framebuffer: Vec<u8>,
    buttons: u8,
    pointer: (u16, u16),
    io_timeout: Duration,
    closed: bool,
}

impl RfbClient {
    /// Connect, negotiate and initialise. Every failure is a connection error.
    pub fn connect(config: &SessionConfig, io_timeout: Duration) -> Result<Self> {
        let endpoint = config.endpoint();
        let conn_err = |reason: String| Error::connection(&endpoint, reason);

        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| conn_err(e.to_string()))?;

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let mut stream = stream.ok_or_else(|| {
            conn_err(
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses resolved".to_string()),
            )
        })?;

        stream
            .set_read_timeout(Some(config.connect_timeout))
            .and_then(|_| stream.set_write_timeout(Some(config.connect_timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| conn_err(e.to_string()))?;

        let init = handshake(&mut stream, &config.password).map_err(|e| conn_err(e.to_string()))?;

        stream
            .set_read_timeout(Some(io_timeout))
            .and_then(|_| stream.set_write_timeout(Some(io_timeout)))
            .map_err(|e| conn_err(e.to_string()))?;

        info!(
            endpoint = %endpoint,
            width = init.width,
            height = init.height,
            desktop = %init.name,
            "RFB session established"
        );

        Ok(Self {
            stream,
            endpoint,
            width: init.width,
            height: init.height,
            desktop_name: init.name,
            framebuffer: vec![0; init.width as usize * init.height as usize * 3],
            buttons: 0,
            pointer: (0, 0),
            io_timeout,
            closed: false,
        })
    }

    pub fn desktop_name(&self) -> &str {
        &self.desktop_name
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn lost(&self, err: impl std::fmt::Display) -> Error {
        Error::ConnectionLost(format!("{}: {}", self.endpoint, err))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(self.lost("connection closed"));
        }
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.stream.write_all(message).map_err(|e| self.lost(e))
    }

    fn request_update(&mut self) -> Result<()> {
        let mut msg = vec![MSG_FRAMEBUFFER_UPDATE_REQUEST, 0];
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&self.width.to_be_bytes());
        msg.extend_from_slice(&self.height.to_be_bytes());
        self.send(&msg)
    }

    fn send_pointer(&mut self) -> Result<()> {
        let (x, y) = self.pointer;
        let mut msg = vec![MSG_POINTER_EVENT, self.buttons];
        msg.extend_from_slice(&x.to_be_bytes());
        msg.extend_from_slice(&y.to_be_bytes());
        self.send(&msg)
    }

    /// Read server messages until one framebuffer update with pixel data is applied.
    fn read_until_update(&mut self) -> Result<()> {
        loop {
            let mut kind = [0u8; 1];
            if let Err(e) = self.stream.read_exact(&mut kind) {
                return Err(match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Capture(format!(
                        "{}: no framebuffer update within {:?}",
                        self.endpoint, self.io_timeout
                    )),
                    _ => self.lost(e),
                });
            }

            match kind[0] {
                MSG_FRAMEBUFFER_UPDATE => {
                    if self.apply_update().map_err(|e| self.lost(e))? {
                        return Ok(());
                    }
                    // Only a resize arrived; ask again at the new size.
                    self.request_update()?;
                }
                MSG_SET_COLOUR_MAP => {
                    let mut header = [0u8; 5];
                    self.stream.read_exact(&mut header).map_err(|e| self.lost(e))?;
                    let count = u16::from_be_bytes([header[3], header[4]]);
                    skip(&mut self.stream, u64::from(count) * 6).map_err(|e| self.lost(e))?;
                }
                MSG_BELL => debug!(endpoint = %self.endpoint, "Bell"),
                MSG_SERVER_CUT_TEXT => {
                    let mut pad = [0u8; 3];
                    self.stream.read_exact(&mut pad).map_err(|e| self.lost(e))?;
                    let len = read_u32(&mut self.stream).map_err(|e| self.lost(e))?;
                    skip(&mut self.stream, u64::from(len)).map_err(|e| self.lost(e))?;
                }
                other => {
                    return Err(self.lost(format!("unexpected server message type {}", other)));
                }
            }
        }
    }

    /// Apply one FramebufferUpdate body. Returns whether pixel data was received.
    fn apply_update(&mut self) -> io::Result<bool> {
        let mut header = [0u8; 3];
        self.stream.read_exact(&mut header)?;
        let rects = u16::from_be_bytes([header[1], header[2]]);

        let mut got_pixels = false;
        for _ in 0..rects {
            let mut rect = [0u8; 12];
            self.stream.read_exact(&mut rect)?;
            let x = u16::from_be_bytes([rect[0], rect[1]]);
            let y = u16::from_be_bytes([rect[2], rect[3]]);
            let w = u16::from_be_bytes([rect[4], rect[5]]);
            let h = u16::from_be_bytes([rect[6], rect[7]]);
            let encoding = i32::from_be_bytes([rect[8], rect[9], rect[10], rect[11]]);

            match encoding {
                ENCODING_RAW => {
                    // Checked before allocating: the payload size comes from the server.
                    if u32::from(x) + u32::from(w) > u32::from(self.width)
                        || u32::from(y) + u32::from(h) > u32::from(self.height)
                    {
                        return Err(invalid_data(format!(
                            "raw rectangle {}x{} at ({}, {}) exceeds {}x{} framebuffer",
                            w, h, x, y, self.width, self.height
                        )));
                    }
                    let mut data = vec![0u8; w as usize * h as usize * 4];
                    self.stream.read_exact(&mut data)?;
                    self.blit(x, y, w, h, &data);
                    got_pixels = true;
                }
                ENCODING_DESKTOP_SIZE => {
                    info!(endpoint = %self.endpoint, width = w, height = h, "Remote desktop resized");
                    self.width = w;
                    self.height = h;
                    self.framebuffer = vec![0; w as usize * h as usize * 3];
                }
                other => {
                    return Err(invalid_data(format!("unsupported encoding {}", other)));
                }
            }
        }
        Ok(got_pixels)
    }

    /// Copy a BGRX rectangle into the RGB framebuffer. The rectangle must lie inside it.
    fn blit(&mut self, x: u16, y: u16, w: u16, h: u16, data: &[u8]) {
        let fb_w = self.width as usize;
        let (x, w) = (x as usize, w as usize);
        for row in 0..h as usize {
            let dy = y as usize + row;
            for col in 0..w {
                let src = (row * w + col) * 4;
                let dst = (dy * fb_w + x + col) * 3;
                self.framebuffer[dst] = data[src + 2];
                self.framebuffer[dst + 1] = data[src + 1];
                self.framebuffer[dst + 2] = data[src];
            }
        }
    }
}

impl RemoteDisplay for RfbClient {
    fn capture(&mut self) -> Result<RawFrame> {
        self.request_update()?;
        self.read_until_update()?;
        RawFrame::new(
            u32::from(self.width),
            u32::from(self.height),
            self.framebuffer.clone(),
        )
    }

    fn key_event(&mut self, key: &KeyToken, down: bool) -> Result<()> {
        let sym = key
            .keysym()
            .ok_or_else(|| Error::UnsupportedKey(key.name()))?;
        let mut msg = vec![MSG_KEY_EVENT, u8::from(down), 0, 0];
        msg.extend_from_slice(&sym.to_be_bytes());
        self.send(&msg)
    }

    fn pointer_move(&mut self, x: u16, y: u16) -> Result<()> {
        self.pointer = (x, y);
        self.send_pointer()
    }

    fn button(&mut self, button: MouseButton, down: bool) -> Result<()> {
        if down {
            self.buttons |= button.mask();
        } else {
            self.buttons &= !button.mask();
        }
        self.send_pointer()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.shutdown(Shutdown::Both).ok();
        debug!(endpoint = %self.endpoint, "RFB connection closed");
    }
}

impl Drop for RfbClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ========== Handshake ==========

struct ServerInit {
    width: u16,
    height: u16,
    name: String,
}

fn handshake<S: Read + Write>(stream: &mut S, password: &str) -> io::Result<ServerInit> {
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner)?;
    let version = ProtocolVersion::parse(&banner)?.negotiate()?;
    stream.write_all(version.banner().as_bytes())?;
    debug!(minor = version.minor, "RFB version negotiated");

    let security = if version.minor >= 7 {
        let count = read_u8(stream)?;
        if count == 0 {
            return Err(rejected(read_string(stream)?));
        }
        let mut offered = vec![0u8; count as usize];
        stream.read_exact(&mut offered)?;
        let chosen = choose_security(&offered, password)?;
        stream.write_all(&[chosen])?;
        chosen
    } else {
        let kind = read_u32(stream)?;
        match u8::try_from(kind) {
            Ok(SECURITY_INVALID) => return Err(rejected(read_string(stream)?)),
            Ok(k @ (SECURITY_NONE | SECURITY_VNC_AUTH)) => k,
            _ => return Err(invalid_data(format!("unsupported security type {}", kind))),
        }
    };

    if security == SECURITY_VNC_AUTH {
        let mut challenge = [0u8; 16];
        stream.read_exact(&mut challenge)?;
        stream.write_all(&vnc_auth_response(password, &challenge))?;
    }

    if security == SECURITY_VNC_AUTH || version.minor >= 8 {
        let result = read_u32(stream)?;
        if result != 0 {
            let reason = if version.minor >= 8 {
                read_string(stream)?
            } else {
                "authentication failed".to_string()
            };
            return Err(rejected(reason));
        }
    }

    // ClientInit: request a shared session
    stream.write_all(&[1])?;

    let mut head = [0u8; 20];
    stream.read_exact(&mut head)?;
    let width = u16::from_be_bytes([head[0], head[1]]);
    let height = u16::from_be_bytes([head[2], head[3]]);
    let name = read_string(stream)?;

    stream.write_all(&set_pixel_format_message())?;
    stream.write_all(&set_encodings_message(&[ENCODING_RAW, ENCODING_DESKTOP_SIZE]))?;

    Ok(ServerInit {
        width,
        height,
        name,
    })
}

fn choose_security(offered: &[u8], password: &str) -> io::Result<u8> {
    let has = |t: u8| offered.contains(&t);
    if !password.is_empty() && has(SECURITY_VNC_AUTH) {
        Ok(SECURITY_VNC_AUTH)
    } else if has(SECURITY_NONE) {
        Ok(SECURITY_NONE)
    } else if has(SECURITY_VNC_AUTH) {
        Ok(SECURITY_VNC_AUTH)
    } else {
        Err(invalid_data(format!("no supported security type in {:?}", offered)))
    }
}

/// DES-encrypt the challenge with the password as key (bit-reversed bytes,
/// truncated or zero-padded to 8).
pub(crate) fn vnc_auth_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }
    let cipher = Des::new(GenericArray::from_slice(&key));

    let mut response = [0u8; 16];
    for (out, chunk) in response.chunks_mut(8).zip(challenge.chunks(8)) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        out.copy_from_slice(&block);
    }
    response
}

fn set_pixel_format_message() -> [u8; 20] {
    let mut msg = [0u8; 20];
    msg[0] = MSG_SET_PIXEL_FORMAT;
    msg[4] = 32; // bits per pixel
    msg[5] = 24; // depth
    msg[6] = 0; // little endian
    msg[7] = 1; // true colour
    msg[8..10].copy_from_slice(&255u16.to_be_bytes());
    msg[10..12].copy_from_slice(&255u16.to_be_bytes());
    msg[12..14].copy_from_slice(&255u16.to_be_bytes());
    msg[14] = 16;
    msg[15] = 8;
    msg[16] = 0;
    msg
}

fn set_encodings_message(encodings: &[i32]) -> Vec<u8> {
    let mut msg = vec![MSG_SET_ENCODINGS, 0];
    msg.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
    for e in encodings {
        msg.extend_from_slice(&e.to_be_bytes());
    }
    msg
}

// ========== Wire helpers ==========

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = read_u32(r)?;
    if len > MAX_SERVER_STRING {
        return Err(invalid_data(format!("server string too long: {} bytes", len)));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn skip<R: Read>(r: &mut R, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut r.take(len), &mut io::sink())?;
    if copied < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated message"));
    }
    Ok(())
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn rejected(reason: String) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("server rejected connection: {}", reason),
    )
}
