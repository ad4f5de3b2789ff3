// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::line::{self, InfoChangeEvent, Offset};
use crate::options::{ChipOptions, ConfigOption, RequestOptions};
use crate::request::{Line, Lines};
use crate::watcher::Watcher;
use crate::{lock, AbiVersion, Error, Result, UapiCall};
use gpioline_uapi::{v1, v2};
use log::debug;
use nohash_hasher::IntMap;
#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::os::linux::fs::MetadataExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::prelude::{AsRawFd, OsStrExt, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Confirm a path refers to a GPIO character device.
///
/// Symlinks are followed, and the resolved path is returned.
pub fn is_chip<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let resolved = fs::canonicalize(&path)?;
    let Some(fname) = resolved.file_name() else {
        return Err(Error::GpioChip(resolved, ErrorKind::NotGpioDevice));
    };
    if resolved.parent() == Some(Path::new("/dev")) {
        if let Some(num) = fname.to_str().and_then(|s| s.strip_prefix("gpiochip")) {
            if !num.is_empty() && num.bytes().all(|c| c.is_ascii_digit()) {
                return Ok(resolved);
            }
        }
    }

    // a renamed node must still be a char device matching a gpio bus device
    let md = fs::metadata(&resolved)?;
    if !md.file_type().is_char_device() {
        return Err(Error::GpioChip(resolved, ErrorKind::NotCharacterDevice));
    }
    let sysfs = Path::new("/sys/bus/gpio/devices").join(fname).join("dev");
    let rdev = md.st_rdev();
    let expected = format!("{}:{}", dev_major(rdev), dev_minor(rdev));
    match fs::read_to_string(sysfs) {
        Ok(dev) if dev.trim_end() == expected => Ok(resolved),
        _ => Err(Error::GpioChip(resolved, ErrorKind::NotGpioDevice)),
    }
}

// The glibc encoding of device numbers.
fn dev_major(rdev: u64) -> u64 {
    ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff)
}

fn dev_minor(rdev: u64) -> u64 {
    (rdev & 0xff) | ((rdev >> 12) & !0xff)
}

// Split a trailing decimal number from a path.
fn split_number(p: &[u8]) -> (&[u8], Option<u64>) {
    let ndigits = p.iter().rev().take_while(|c| c.is_ascii_digit()).count();
    let (prefix, digits) = p.split_at(p.len() - ndigits);
    let num = std::str::from_utf8(digits).ok().and_then(|d| d.parse().ok());
    (prefix, num)
}

/// Order chip paths naturally, so "gpiochip3" sorts before "gpiochip10".
pub fn path_compare(a: &Path, b: &Path) -> Ordering {
    let a = a.as_os_str().as_bytes();
    let b = b.as_os_str().as_bytes();
    let (a_prefix, a_num) = split_number(a);
    let (b_prefix, b_num) = split_number(b);
    a_prefix
        .cmp(b_prefix)
        .then(a_num.cmp(&b_num))
        .then_with(|| a.cmp(b))
}

/// The paths of the GPIO chips on the system, in natural order.
///
/// Every path has already passed [`is_chip`].
pub fn chips() -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = fs::read_dir("/dev")?
        .flatten()
        .filter_map(|entry| is_chip(entry.path()).ok())
        .collect();
    found.sort_unstable_by(|a, b| path_compare(a, b));
    // symlinks in /dev resolve to the same chip
    found.dedup();
    Ok(found)
}

/// The handler called with each change to the info of a watched line.
pub type InfoHandler = Arc<dyn Fn(InfoChangeEvent) + Send + Sync>;

type InfoHandlers = Arc<Mutex<IntMap<Offset, InfoHandler>>>;

/// An open GPIO chip, and the defaults for lines requested from it.
///
/// Closing the chip does not affect lines already requested from it.
pub struct Chip {
    path: PathBuf,

    info: Info,

    abiv: AbiVersion,

    /// The defaults inherited by requests.
    options: ChipOptions,

    state: Mutex<State>,

    info_handlers: InfoHandlers,
}

// The watcher is declared first so it is stopped before the file is closed.
struct State {
    info_watcher: Option<Watcher>,
    f: Option<fs::File>,
}

impl Chip {
    /// Open a chip by name or path, with the given default options.
    ///
    /// A name without any path separators, such as "gpiochip0", is looked up in `/dev`.
    ///
    /// The options provide defaults for all lines subsequently requested from the chip.
    /// Unless pinned with [`with_abi_version`] the chip negotiates the most recent
    /// uAPI ABI the kernel supports.
    ///
    /// # Examples
    ///```no_run
    /// # fn example() -> gpioline::Result<gpioline::Chip>{
    /// use gpioline::{options, Chip};
    ///
    /// let chip = Chip::new("gpiochip0", &[options::with_consumer("myapp"), options::with_pull_up()])?;
    /// # Ok(chip)
    /// # }
    ///```
    ///
    /// [`with_abi_version`]: crate::options::with_abi_version
    pub fn new<P: AsRef<Path>>(name_or_path: P, opts: &[ConfigOption]) -> Result<Chip> {
        let p = name_or_path.as_ref();
        let path = if p.as_os_str().as_bytes().contains(&b'/') {
            p.to_path_buf()
        } else {
            Path::new("/dev").join(p)
        };
        let options = ChipOptions::new(opts)?;
        let path = is_chip(&path)?;
        let f = fs::File::open(&path)?;
        let info = v2::get_chip_info(f.as_raw_fd())
            .map_err(|e| Error::Uapi(UapiCall::GetChipInfo, e))?
            .into();
        let abiv = match options.abi_version {
            Some(abiv) => abiv,
            None => query_abi_version(f.as_raw_fd()),
        };
        debug!("{}: using {}", path.display(), abiv);
        Ok(Chip {
            path,
            info,
            abiv,
            options,
            state: Mutex::new(State {
                info_watcher: None,
                f: Some(f),
            }),
            info_handlers: Default::default(),
        })
    }

    /// Open the chip at the given path, with no default options.
    pub fn from_path<P: AsRef<Path>>(p: P) -> Result<Chip> {
        Chip::new(p.as_ref(), &[])
    }

    /// Open the chip with the given name, such as "gpiochip0", with no default options.
    pub fn from_name(n: &str) -> Result<Chip> {
        Chip::new(Path::new("/dev").join(n), &[])
    }

    /// The chip's name, label and size.
    ///
    /// Fails once the chip is closed.
    pub fn info(&self) -> Result<Info> {
        self.with_fd(|_| Ok(self.info.clone()))
    }

    /// The kernel name, e.g. "gpiochip0".
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The driver label.
    pub fn label(&self) -> &str {
        &self.info.label
    }

    /// The number of lines on the chip.
    pub fn num_lines(&self) -> u32 {
        self.info.num_lines
    }

    /// The resolved path of the device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The uAPI ABI version used by the chip.
    pub fn uapi_abi_version(&self) -> AbiVersion {
        self.abiv
    }

    fn with_fd<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(RawFd) -> Result<T>,
    {
        let state = lock(&self.state);
        match state.f.as_ref() {
            Some(file) => f(file.as_raw_fd()),
            None => Err(Error::Closed),
        }
    }

    fn check_offset(&self, offset: Offset) -> Result<()> {
        if offset >= self.info.num_lines {
            return Err(Error::InvalidOffset(offset));
        }
        Ok(())
    }

    /// The current info for a line, in the form reported by the negotiated uAPI.
    pub fn line_info(&self, offset: Offset) -> Result<line::Info> {
        self.check_offset(offset)?;
        self.with_fd(|fd| line_info(fd, self.abiv, offset))
    }

    /// Find the info for the line with the given name.
    ///
    /// Returns the first line with a matching name, or None if there is no such line.
    pub fn find_line(&self, name: &str) -> Result<Option<line::Info>> {
        for offset in 0..self.info.num_lines {
            let li = self.line_info(offset)?;
            if li.name == name {
                return Ok(Some(li));
            }
        }
        Ok(None)
    }

    /// Request a single line.
    ///
    /// The options refine the chip defaults.
    pub fn request_line(&self, offset: Offset, opts: &[ConfigOption]) -> Result<Line> {
        Ok(Line::from(self.request_lines(&[offset], opts)?))
    }

    /// Request a set of lines.
    ///
    /// The offsets must be unique and valid for the chip.
    /// The options refine the chip defaults.
    ///
    /// # Examples
    ///```no_run
    /// # fn example() -> gpioline::Result<()>{
    /// use gpioline::{options, Chip};
    ///
    /// let chip = Chip::from_name("gpiochip0")?;
    /// let lines = chip.request_lines(&[0, 3], &[options::as_output([1u8, 0])])?;
    /// lines.set_values(&[0u8.into(), 1u8.into()])?;
    /// # Ok(())
    /// # }
    ///```
    pub fn request_lines(&self, offsets: &[Offset], opts: &[ConfigOption]) -> Result<Lines> {
        for (idx, offset) in offsets.iter().enumerate() {
            self.check_offset(*offset)?;
            if offsets[..idx].contains(offset) {
                return Err(Error::InvalidOffset(*offset));
            }
        }
        let ro = RequestOptions::new(&self.options, offsets, opts)?;
        let abiv = ro.abi_version.unwrap_or(self.abiv);
        self.with_fd(|fd| Lines::request(&self.path, fd, abiv, ro))
    }

    /// Watch a line for changes to its info.
    ///
    /// The handler is called from a watcher thread, shared by all lines watched on the chip,
    /// for each change.
    ///
    /// Returns the current info for the line.
    pub fn watch_line_info<F>(&self, offset: Offset, handler: F) -> Result<line::Info>
    where
        F: Fn(InfoChangeEvent) + Send + Sync + 'static,
    {
        self.check_offset(offset)?;
        let mut state = lock(&self.state);
        let fd = match state.f.as_ref() {
            Some(f) => f.as_raw_fd(),
            None => return Err(Error::Closed),
        };
        let li = match self.abiv {
            AbiVersion::V1 => v1::watch_line_info(fd, offset).map(|li| line::Info::from(&li)),
            AbiVersion::V2 => v2::watch_line_info(fd, offset).map(|li| line::Info::from(&li)),
        }
        .map_err(|e| Error::Uapi(UapiCall::WatchLineInfo, e))?;
        lock(&self.info_handlers).insert(offset, Arc::new(handler));
        if state.info_watcher.is_none() {
            match self.start_info_watcher(fd) {
                Ok(watcher) => state.info_watcher = Some(watcher),
                Err(e) => {
                    lock(&self.info_handlers).remove(&offset);
                    _ = v2::unwatch_line_info(fd, offset);
                    return Err(e);
                }
            }
        }
        Ok(li)
    }

    fn start_info_watcher(&self, fd: RawFd) -> Result<Watcher> {
        let abiv = self.abiv;
        let handlers = self.info_handlers.clone();
        let mut buf = vec![
            0_u64;
            std::cmp::max(
                v1::LineInfoChangeEvent::u64_size(),
                v2::LineInfoChangeEvent::u64_size()
            )
        ];
        Watcher::new("gpioline-info", &[fd], move |_, fd| {
            let n = gpioline_uapi::read_event(fd, &mut buf)
                .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
            let ice = match abiv {
                AbiVersion::V1 => {
                    v1::LineInfoChangeEvent::from_slice(&buf[..n]).map(InfoChangeEvent::from)
                }
                AbiVersion::V2 => {
                    v2::LineInfoChangeEvent::from_slice(&buf[..n]).map(InfoChangeEvent::from)
                }
            }
            .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
            // the lock is not held while the handler runs, so it may unwatch
            let handler = lock(&handlers).get(&ice.info.offset).cloned();
            if let Some(handler) = handler {
                handler(ice);
            }
            Ok(())
        })
    }

    /// Stop watching a line for changes to its info.
    pub fn unwatch_line_info(&self, offset: Offset) -> Result<()> {
        self.check_offset(offset)?;
        self.with_fd(|fd| {
            v2::unwatch_line_info(fd, offset).map_err(|e| Error::Uapi(UapiCall::UnwatchLineInfo, e))
        })?;
        lock(&self.info_handlers).remove(&offset);
        Ok(())
    }

    /// Close the chip.
    ///
    /// Stops any info watcher, but lines already requested from the chip remain requested.
    ///
    /// Returns [`Error::Closed`] if the chip is already closed.
    pub fn close(&self) -> Result<()> {
        let (watcher, f) = {
            let mut state = lock(&self.state);
            let f = state.f.take().ok_or(Error::Closed)?;
            (state.info_watcher.take(), f)
        };
        // stop the watcher before closing the fd it is watching
        drop(watcher);
        drop(f);
        lock(&self.info_handlers).clear();
        debug!("{}: closed", self.path.display());
        Ok(())
    }

    /// Detect the most recent uAPI ABI supported by the kernel.
    pub fn detect_abi_version(&self) -> Result<AbiVersion> {
        self.with_fd(|fd| Ok(query_abi_version(fd)))
    }

    /// Check if the kernel supports the given uAPI ABI.
    pub fn supports_abi_version(&self, abiv: AbiVersion) -> Result<()> {
        self.with_fd(|fd| {
            line_info(fd, abiv, 0).map_err(|_| Error::UnsupportedAbi(abiv))?;
            Ok(())
        })
    }
}

impl fmt::Debug for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chip")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("abiv", &self.abiv)
            .finish()
    }
}

// v2 line info is only available from kernels that support v2.
fn query_abi_version(fd: RawFd) -> AbiVersion {
    match v2::get_line_info(fd, 0) {
        Ok(_) => AbiVersion::V2,
        Err(_) => AbiVersion::V1,
    }
}

pub(crate) fn line_info(fd: RawFd, abiv: AbiVersion, offset: Offset) -> Result<line::Info> {
    match abiv {
        AbiVersion::V1 => v1::get_line_info(fd, offset).map(|li| line::Info::from(&li)),
        AbiVersion::V2 => v2::get_line_info(fd, offset).map(|li| line::Info::from(&li)),
    }
    .map_err(|e| Error::Uapi(UapiCall::GetLineInfo, e))
}

/// The chip details reported by the kernel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Info {
    /// The kernel name, e.g. "gpiochip0".
    pub name: String,

    /// The driver label, usually identifying the chip model.
    pub label: String,

    /// Line offsets on the chip are 0..num_lines.
    pub num_lines: u32,
}

impl From<v2::ChipInfo> for Info {
    fn from(ci: v2::ChipInfo) -> Self {
        Info {
            name: line::name_to_string(&ci.name),
            label: line::name_to_string(&ci.label),
            num_lines: ci.num_lines,
        }
    }
}

/// Why a path was rejected by [`is_chip`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NotCharacterDevice,

    /// A character device, but not one on the GPIO bus.
    NotGpioDevice,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::NotCharacterDevice => "is not a character device",
            ErrorKind::NotGpioDevice => "is not a GPIO character device",
        })
    }
}
