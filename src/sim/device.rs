//! Handlers for external devices connected to the Simulator.
//!
//! SIC/XE programs talk to devices with three instructions,
//! each naming a device by a one-byte id:
//! - `RD` reads a byte from a device,
//! - `WD` writes a byte to a device,
//! - `TD` tests whether a device is ready.
//!
//! The core types here are:
//! - [`ExternalDevice`]: A device which can be connected to the Simulator.
//! - [`DeviceHandler`]: The handler which routes device ids to devices.
//!
//! This module also provides some devices:
//! - [`NullDevice`]: Discards writes and has nothing to read.
//! - [`BufferedDevice`]: Reads off of an input buffer and writes to an output buffer.
//! - [`FileDevice`]: Reads from and appends to a file.
//! - [`StdStream`]: Standard input, output, or error.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};

/// Kinds of errors that can occur from a device access.
///
/// See [`DeviceErr`] for this error type with the device id included.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
pub enum DeviceErrKind {
    /// No device has the given id.
    #[error("no device is connected")]
    NotConnected,
    /// The device has nothing left to read.
    #[error("device has no input left")]
    NoInput,
    /// The device cannot be read from.
    #[error("device cannot be read from")]
    NotReadable,
    /// The device cannot be written to.
    #[error("device cannot be written to")]
    NotWritable,
    /// The device is being held by something outside the simulator.
    #[error("device is busy")]
    Busy,
    /// An I/O error occurred.
    #[error("{0}")]
    Io(String),
}
impl From<std::io::Error> for DeviceErrKind {
    fn from(value: std::io::Error) -> Self {
        DeviceErrKind::Io(value.to_string())
    }
}

/// Error from accessing a device.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
#[error("device {device:02X}: {kind}")]
pub struct DeviceErr {
    /// The id of the device.
    pub device: u8,
    /// The kind of error.
    pub kind: DeviceErrKind,
}
impl crate::err::Error for DeviceErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self.kind {
            DeviceErrKind::NotConnected => Some("connect a device to this id with DeviceHandler::set_device".into()),
            DeviceErrKind::NoInput => Some("use TD to check whether a device is ready before reading".into()),
            DeviceErrKind::NotReadable | DeviceErrKind::NotWritable => None,
            DeviceErrKind::Busy => None,
            DeviceErrKind::Io(_) => None,
        }
    }
}

/// An external device, which the simulator accesses one byte at a time.
pub trait ExternalDevice: Send + Sync + 'static {
    /// Reads (and consumes) the next byte from the device.
    fn read_byte(&mut self) -> Result<u8, DeviceErrKind>;

    /// Writes a byte to the device.
    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceErrKind>;

    /// Tests whether the device is ready.
    fn test(&mut self) -> bool;

    /// Resets the device.
    fn reset(&mut self) {}
}

/// A device that does nothing.
///
/// Writes are discarded and there is never anything to read.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;
impl ExternalDevice for NullDevice {
    fn read_byte(&mut self) -> Result<u8, DeviceErrKind> {
        Err(DeviceErrKind::NoInput)
    }

    fn write_byte(&mut self, _byte: u8) -> Result<(), DeviceErrKind> {
        Ok(())
    }

    fn test(&mut self) -> bool {
        true
    }
}

/// A device that reads from an input buffer and writes to an output buffer.
///
/// The buffers can be accessed in code via [`BufferedDevice::input`] and [`BufferedDevice::output`].
///
/// Note that if an input/output lock guard is acquired from one of the buffers of this device,
/// the device becomes busy (see [`DeviceErrKind::Busy`]) until the guard is dropped.
///
/// ```
/// use sicxe_ensemble::sim::device::{BufferedDevice, ExternalDevice};
///
/// let mut dev = BufferedDevice::new();
/// dev.input().write().unwrap().extend(b"hi");
///
/// assert_eq!(dev.read_byte(), Ok(b'h'));
/// dev.write_byte(b'!').unwrap();
/// assert_eq!(*dev.output().read().unwrap(), b"!");
/// ```
#[derive(Debug, Default, Clone)]
pub struct BufferedDevice {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>,
}
impl BufferedDevice {
    /// Creates a new device with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new device from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    /// Gets a reference to the input buffer.
    pub fn input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.input.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.output.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
impl ExternalDevice for BufferedDevice {
    fn read_byte(&mut self) -> Result<u8, DeviceErrKind> {
        self.try_input()
            .ok_or(DeviceErrKind::Busy)?
            .pop_front()
            .ok_or(DeviceErrKind::NoInput)
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceErrKind> {
        self.try_output()
            .ok_or(DeviceErrKind::Busy)?
            .push(byte);
        Ok(())
    }

    /// The device is ready while nothing outside the simulator holds its buffers.
    fn test(&mut self) -> bool {
        self.try_input().is_some() && self.try_output().is_some()
    }
}

/// A device backed by a file.
///
/// Reads are sequential from the start of the file, and writes are appended to the end.
/// The file is only opened once it is first accessed
/// (so a device that is never read from does not need its file to exist).
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    writer: Option<File>,
}
impl FileDevice {
    /// Creates a device for the file at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), reader: None, writer: None }
    }

    /// The path of the file backing this device.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
impl ExternalDevice for FileDevice {
    fn read_byte(&mut self) -> Result<u8, DeviceErrKind> {
        let reader = match &mut self.reader {
            Some(r) => r,
            None => self.reader.insert(BufReader::new(File::open(&self.path)?)),
        };

        let mut buf = [0];
        match reader.read(&mut buf)? {
            0 => Err(DeviceErrKind::NoInput),
            _ => Ok(buf[0]),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceErrKind> {
        let writer = match &mut self.writer {
            Some(w) => w,
            None => self.writer.insert(OpenOptions::new().create(true).append(true).open(&self.path)?),
        };
        writer.write_all(&[byte])?;
        Ok(())
    }

    fn test(&mut self) -> bool {
        true
    }

    /// Closes the file, so the next read starts from the beginning of the file.
    fn reset(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

/// One of the process's standard streams.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum StdStream {
    /// Standard input (read only).
    Input,
    /// Standard output (write only).
    Output,
    /// Standard error (write only).
    Error,
}
impl ExternalDevice for StdStream {
    fn read_byte(&mut self) -> Result<u8, DeviceErrKind> {
        match self {
            StdStream::Input => {
                let mut buf = [0];
                match std::io::stdin().lock().read(&mut buf)? {
                    0 => Err(DeviceErrKind::NoInput),
                    _ => Ok(buf[0]),
                }
            },
            StdStream::Output | StdStream::Error => Err(DeviceErrKind::NotReadable),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), DeviceErrKind> {
        match self {
            StdStream::Input => Err(DeviceErrKind::NotWritable),
            StdStream::Output => {
                let mut out = std::io::stdout().lock();
                out.write_all(&[byte])?;
                out.flush()?;
                Ok(())
            },
            StdStream::Error => Ok(std::io::stderr().write_all(&[byte])?),
        }
    }

    fn test(&mut self) -> bool {
        true
    }
}

/// The central hub for all external devices for the Simulator.
///
/// Devices are addressed by a one-byte id.
/// A handler made with [`DeviceHandler::standard`] follows the usual SIC/XE mapping:
/// - ids `00`, `01`, `02` are standard input, output, and error,
/// - every other id is a file named by the id in hex (e.g., `F1.dev`), opened on first use.
pub struct DeviceHandler {
    devices: BTreeMap<u8, Box<dyn ExternalDevice>>,
    file_dir: Option<PathBuf>,
}

impl DeviceHandler {
    /// Creates a new device handler with no devices connected.
    pub fn new() -> Self {
        Self { devices: BTreeMap::new(), file_dir: None }
    }

    /// Creates a device handler with the standard streams connected,
    /// which opens files in `dir` for any other device id.
    pub fn standard(dir: impl Into<PathBuf>) -> Self {
        let mut handler = Self { devices: BTreeMap::new(), file_dir: Some(dir.into()) };
        handler.set_device(0, StdStream::Input);
        handler.set_device(1, StdStream::Output);
        handler.set_device(2, StdStream::Error);
        handler
    }

    /// Connects a device to the given id, returning the device it replaced (if any).
    pub fn set_device(&mut self, id: u8, dev: impl ExternalDevice) -> Option<Box<dyn ExternalDevice>> {
        self.devices.insert(id, Box::new(dev))
    }
    /// Disconnects the device at the given id.
    pub fn remove_device(&mut self, id: u8) -> Option<Box<dyn ExternalDevice>> {
        self.devices.remove(&id)
    }
    /// Whether a device is connected at the given id.
    ///
    /// For handlers which open files on demand, this only covers devices that were already accessed.
    pub fn is_connected(&self, id: u8) -> bool {
        self.devices.contains_key(&id)
    }

    fn device(&mut self, id: u8) -> Result<&mut dyn ExternalDevice, DeviceErr> {
        if !self.devices.contains_key(&id) {
            let dir = self.file_dir.as_ref()
                .ok_or(DeviceErr { device: id, kind: DeviceErrKind::NotConnected })?;
            let dev = FileDevice::new(dir.join(format!("{id:02X}.dev")));
            tracing::debug!(device = id, path = %dev.path().display(), "connecting file device");
            self.devices.insert(id, Box::new(dev));
        }

        self.devices.get_mut(&id)
            .map(|d| d.as_mut())
            .ok_or(DeviceErr { device: id, kind: DeviceErrKind::NotConnected })
    }

    /// Reads a byte from the device at the given id.
    pub fn read_byte(&mut self, id: u8) -> Result<u8, DeviceErr> {
        self.device(id)?
            .read_byte()
            .map_err(|kind| DeviceErr { device: id, kind })
    }

    /// Writes a byte to the device at the given id.
    pub fn write_byte(&mut self, id: u8, byte: u8) -> Result<(), DeviceErr> {
        self.device(id)?
            .write_byte(byte)
            .map_err(|kind| DeviceErr { device: id, kind })
    }

    /// Tests whether the device at the given id is ready.
    ///
    /// A device that is not connected is never ready.
    pub fn test(&mut self, id: u8) -> bool {
        self.device(id).is_ok_and(|d| d.test())
    }

    /// Resets all the devices connected to this handler.
    pub fn reset(&mut self) {
        self.devices.values_mut().for_each(|d| d.reset())
    }
}
impl Default for DeviceHandler {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for DeviceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandler")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("file_dir", &self.file_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sicxe-dev-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_buffered() {
        let mut dev = BufferedDevice::new();
        dev.input().write().unwrap().extend([1, 2]);

        assert_eq!(dev.read_byte(), Ok(1));
        assert_eq!(dev.read_byte(), Ok(2));
        assert_eq!(dev.read_byte(), Err(DeviceErrKind::NoInput));
        assert!(dev.test());

        dev.write_byte(0xAB).unwrap();
        assert_eq!(*dev.output().read().unwrap(), [0xAB]);

        // held buffers make the device busy
        let out = Arc::clone(dev.output());
        let guard = out.write().unwrap();
        assert!(!dev.test());
        assert_eq!(dev.write_byte(0), Err(DeviceErrKind::Busy));
        drop(guard);
        assert!(dev.test());
    }

    #[test]
    fn test_handler_routing() {
        let mut handler = DeviceHandler::new();
        let dev = BufferedDevice::new();
        handler.set_device(0x05, dev.clone());

        handler.write_byte(0x05, b'Z').unwrap();
        assert_eq!(*dev.output().read().unwrap(), b"Z");
        assert!(handler.test(0x05));

        assert!(!handler.test(0x06));
        assert_eq!(
            handler.read_byte(0x06),
            Err(DeviceErr { device: 0x06, kind: DeviceErrKind::NotConnected })
        );

        assert!(handler.remove_device(0x05).is_some());
        assert!(!handler.is_connected(0x05));
    }

    #[test]
    fn test_file_device() {
        let dir = temp_dir("file");
        let path = dir.join("F1.dev");
        let _ = std::fs::remove_file(&path);

        let mut handler = DeviceHandler::standard(&dir);
        assert!(handler.is_connected(1));
        assert!(!handler.is_connected(0xF1));

        for &b in b"ab" {
            handler.write_byte(0xF1, b).unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"ab");

        assert_eq!(handler.read_byte(0xF1), Ok(b'a'));
        assert_eq!(handler.read_byte(0xF1), Ok(b'b'));
        assert_eq!(handler.read_byte(0xF1).map_err(|e| e.kind), Err(DeviceErrKind::NoInput));

        // reset rewinds the read cursor
        handler.reset();
        assert_eq!(handler.read_byte(0xF1), Ok(b'a'));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_std_stream_direction() {
        assert_eq!(StdStream::Input.write_byte(0), Err(DeviceErrKind::NotWritable));
        assert_eq!(StdStream::Output.read_byte(), Err(DeviceErrKind::NotReadable));
    }
}
