// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

mod encode;

use crate::chip::Chip;
use crate::line::{self, LineConfig, LineEvent, Offset, Value};
use crate::options::{self, ConfigOption, EventHandler, LineConfigOptions, RequestOptions};
use crate::watcher::Watcher;
use crate::{lock, AbiVersion, Error, Result, UapiCall};
use gpioline_uapi::{v1, v2};
use log::debug;
use std::fmt;
use std::fs::File;
use std::mem;
use std::os::unix::prelude::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// The uAPI request the lines are held by.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
    // A v2 line request.
    Line,

    // A v1 line handle.
    Handle,

    // A v1 event request per line.
    Events,
}

/// A set of lines requested from a chip.
///
/// The lines are released when the request is closed or dropped.
///
/// # Examples
///```no_run
/// # fn example() -> gpioline::Result<()>{
/// use gpioline::{options, Chip, Value};
///
/// let chip = Chip::from_name("gpiochip0")?;
/// let lines = chip.request_lines(&[0, 3], &[options::as_output([1u8, 0])])?;
/// assert_eq!(lines.values()?, vec![Value::Active, Value::Inactive]);
/// lines.set_values(&[Value::Inactive, Value::Active])?;
/// lines.close()?;
/// # Ok(())
/// # }
///```
pub struct Lines {
    offsets: Vec<Offset>,

    abiv: AbiVersion,

    kind: Kind,

    /// The path of the chip the lines were requested from.
    chip_path: PathBuf,

    state: Mutex<State>,
}

// The watcher is declared first so it is stopped before the files are closed.
struct State {
    watcher: Option<Watcher>,

    // Empty once closed.
    files: Vec<File>,

    lco: LineConfigOptions,

    info: Option<Vec<line::Info>>,
}

impl State {
    fn fd(&self) -> Result<RawFd> {
        self.files
            .first()
            .map(|f| f.as_raw_fd())
            .ok_or(Error::Closed)
    }
}

impl Lines {
    pub(crate) fn request(
        chip_path: &Path,
        cfd: RawFd,
        abiv: AbiVersion,
        ro: RequestOptions,
    ) -> Result<Lines> {
        let offsets = ro.lco.offsets.clone();
        let (kind, files) = match (abiv, ro.handler.is_some()) {
            (AbiVersion::V2, _) => {
                let lr = encode::v2_line_request(&ro.lco, &ro.consumer, ro.event_buffer_size)?;
                let f = v2::get_line(cfd, lr).map_err(|e| Error::Uapi(UapiCall::GetLine, e))?;
                (Kind::Line, vec![f])
            }
            (AbiVersion::V1, false) => {
                let hr = encode::v1_handle_request(&ro.lco, &ro.consumer)?;
                let f = v1::get_line_handle(cfd, hr)
                    .map_err(|e| Error::Uapi(UapiCall::GetLineHandle, e))?;
                (Kind::Handle, vec![f])
            }
            (AbiVersion::V1, true) => {
                let ers = encode::v1_event_requests(&ro.lco, &ro.consumer)?;
                let mut files = Vec::with_capacity(ers.len());
                // any lines already requested are released on error
                for er in ers {
                    files.push(
                        v1::get_line_event(cfd, er)
                            .map_err(|e| Error::Uapi(UapiCall::GetLineEvent, e))?,
                    );
                }
                (Kind::Events, files)
            }
        };
        let watcher = match ro.handler {
            Some(handler) => {
                let fds: Vec<RawFd> = files.iter().map(|f| f.as_raw_fd()).collect();
                Some(start_watcher(kind, &offsets, &fds, handler)?)
            }
            None => None,
        };
        debug!(
            "{}: requested lines {:?} using {}",
            chip_path.display(),
            offsets,
            abiv
        );
        Ok(Lines {
            offsets,
            abiv,
            kind,
            chip_path: chip_path.to_path_buf(),
            state: Mutex::new(State {
                watcher,
                files,
                lco: ro.lco,
                info: None,
            }),
        })
    }

    /// The offsets of the requested lines, in request order.
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    /// The uAPI ABI version used by the request.
    pub fn abi_version(&self) -> AbiVersion {
        self.abiv
    }

    /// The path of the chip the lines were requested from.
    pub fn chip_path(&self) -> &Path {
        &self.chip_path
    }

    fn index(&self, offset: Offset) -> Result<usize> {
        self.offsets
            .iter()
            .position(|o| *o == offset)
            .ok_or(Error::InvalidOffset(offset))
    }

    /// The current configuration of the requested lines, in request order.
    pub fn config(&self) -> Result<Vec<LineConfig>> {
        let state = lock(&self.state);
        state.fd()?;
        Ok(self
            .offsets
            .iter()
            .map(|offset| state.lco.config(*offset).clone())
            .collect())
    }

    /// Get the values of all the requested lines, in request order.
    pub fn values(&self) -> Result<Vec<Value>> {
        let state = lock(&self.state);
        let fd = state.fd()?;
        match self.kind {
            Kind::Line => {
                let mut lv = v2::LineValues::with_mask_len(self.offsets.len());
                v2::get_line_values(fd, &mut lv)
                    .map_err(|e| Error::Uapi(UapiCall::GetLineValues, e))?;
                Ok((0..self.offsets.len())
                    .map(|idx| lv.get(idx).unwrap_or_default().into())
                    .collect())
            }
            Kind::Handle => {
                let mut lv = v1::LineValues::default();
                v1::get_line_values(fd, &mut lv)
                    .map_err(|e| Error::Uapi(UapiCall::GetLineValues, e))?;
                Ok((0..self.offsets.len())
                    .map(|idx| lv.get(idx).into())
                    .collect())
            }
            Kind::Events => state
                .files
                .iter()
                .map(|f| {
                    let mut lv = v1::LineValues::default();
                    v1::get_line_values(f.as_raw_fd(), &mut lv)
                        .map_err(|e| Error::Uapi(UapiCall::GetLineValues, e))?;
                    Ok(lv.get(0).into())
                })
                .collect(),
        }
    }

    /// Get the value of one of the requested lines.
    pub fn value(&self, offset: Offset) -> Result<Value> {
        let idx = self.index(offset)?;
        Ok(self.values()?[idx])
    }

    /// Set the values of the requested lines.
    ///
    /// Values are applied to the lines in request order.
    /// If fewer values than lines are provided then only the leading lines are set,
    /// which is not supported by uAPI ABI v1.
    /// Extra values are ignored.
    ///
    /// All the lines being set must be outputs.
    pub fn set_values(&self, values: &[Value]) -> Result<()> {
        let mut state = lock(&self.state);
        let fd = state.fd()?;
        let n = values.len().min(self.offsets.len());
        if n == 0 {
            return Ok(());
        }
        for offset in &self.offsets[..n] {
            if !state.lco.config(*offset).is_output() {
                return Err(Error::PermissionDenied);
            }
        }
        match self.kind {
            Kind::Line => {
                let mut lv = v2::LineValues::default();
                for (idx, value) in values[..n].iter().enumerate() {
                    lv.set(idx, (*value).into());
                }
                v2::set_line_values(fd, &lv)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineValues, e))?;
            }
            Kind::Handle => {
                if n < self.offsets.len() {
                    return Err(Error::AbiLimitation(
                        AbiVersion::V1,
                        "does not support setting a subset of lines".into(),
                    ));
                }
                let lv = v1::LineValues::from_slice(
                    &values[..n].iter().map(|v| u8::from(*v)).collect::<Vec<u8>>(),
                );
                v1::set_line_values(fd, &lv)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineValues, e))?;
            }
            Kind::Events => return Err(Error::PermissionDenied),
        }
        for (offset, value) in self.offsets.iter().zip(values) {
            state.lco.values.insert(*offset, *value);
        }
        Ok(())
    }

    /// Set the value of one of the requested lines.
    ///
    /// The line must be an output.
    pub fn set_value(&self, offset: Offset, value: Value) -> Result<()> {
        let idx = self.index(offset)?;
        let mut state = lock(&self.state);
        let fd = state.fd()?;
        if !state.lco.config(offset).is_output() {
            return Err(Error::PermissionDenied);
        }
        match self.kind {
            Kind::Line => {
                let mut lv = v2::LineValues::default();
                lv.set(idx, value.into());
                v2::set_line_values(fd, &lv)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineValues, e))?;
            }
            Kind::Handle => {
                // v1 sets all lines, so the other lines keep their last values
                let mut lv = v1::LineValues::default();
                for (i, o) in self.offsets.iter().enumerate() {
                    lv.set(i, state.lco.value(*o).into());
                }
                lv.set(idx, value.into());
                v1::set_line_values(fd, &lv)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineValues, e))?;
            }
            Kind::Events => return Err(Error::PermissionDenied),
        }
        state.lco.values.insert(offset, value);
        Ok(())
    }

    /// Update the configuration of the requested lines.
    ///
    /// The options are applied over the current configuration, so categories
    /// not set by the options are unchanged.
    /// The configuration is only updated if the kernel accepts it.
    ///
    /// Lines requested with an event handler under uAPI ABI v1 cannot be reconfigured.
    pub fn reconfigure(&self, opts: &[ConfigOption]) -> Result<()> {
        let mut state = lock(&self.state);
        let fd = state.fd()?;
        if self.kind == Kind::Events {
            return Err(Error::InvalidArgument(
                "uAPI ABI v1 event requests cannot be reconfigured".into(),
            ));
        }
        let lco = options::reconfigured(&state.lco, opts)?;
        match self.kind {
            Kind::Line => {
                let lc = encode::v2_line_config(&lco)?;
                v2::set_line_config(fd, lc)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineConfig, e))?;
            }
            _ => {
                let hc = encode::v1_handle_config(&lco)?;
                v1::set_line_config(fd, hc)
                    .map_err(|e| Error::Uapi(UapiCall::SetLineConfig, e))?;
            }
        }
        state.lco = lco;
        state.info = None;
        Ok(())
    }

    /// Get the info for the requested lines, in request order.
    ///
    /// The info is cached until the lines are reconfigured.
    pub fn info(&self) -> Result<Vec<line::Info>> {
        let mut state = lock(&self.state);
        state.fd()?;
        if let Some(info) = state.info.as_ref() {
            return Ok(info.clone());
        }
        let chip = Chip::new(&self.chip_path, &[options::with_abi_version(self.abiv)])?;
        let info = self
            .offsets
            .iter()
            .map(|offset| chip.line_info(*offset))
            .collect::<Result<Vec<line::Info>>>()?;
        state.info = Some(info.clone());
        Ok(info)
    }

    /// Release the requested lines.
    ///
    /// Any event watcher is stopped before the lines are released.
    /// Must not be called from within the event handler for the request, as that would deadlock.
    ///
    /// Returns [`Error::Closed`] if the request is already closed.
    pub fn close(&self) -> Result<()> {
        let (watcher, files) = {
            let mut state = lock(&self.state);
            if state.files.is_empty() {
                return Err(Error::Closed);
            }
            (state.watcher.take(), mem::take(&mut state.files))
        };
        drop(watcher);
        drop(files);
        debug!(
            "{}: released lines {:?}",
            self.chip_path.display(),
            self.offsets
        );
        Ok(())
    }
}

impl fmt::Debug for Lines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lines")
            .field("chip_path", &self.chip_path)
            .field("offsets", &self.offsets)
            .field("abiv", &self.abiv)
            .finish()
    }
}

fn start_watcher(
    kind: Kind,
    offsets: &[Offset],
    fds: &[RawFd],
    handler: EventHandler,
) -> Result<Watcher> {
    if kind == Kind::Events {
        let offsets = offsets.to_vec();
        let mut buf = vec![0_u64; v1::LineEdgeEvent::u64_size()];
        return Watcher::new("gpioline-events", fds, move |idx, fd| {
            let n = gpioline_uapi::read_event(fd, &mut buf)
                .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
            let le = v1::LineEdgeEvent::from_slice(&buf[..n])
                .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
            let offset = offsets.get(idx).copied().unwrap_or_default();
            handler(LineEvent::from_v1(le, offset));
            Ok(())
        });
    }
    let mut buf = vec![0_u64; v2::LineEdgeEvent::u64_size()];
    Watcher::new("gpioline-events", fds, move |_, fd| {
        let n = gpioline_uapi::read_event(fd, &mut buf)
            .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
        let le = v2::LineEdgeEvent::from_slice(&buf[..n])
            .map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
        handler(LineEvent::from(le));
        Ok(())
    })
}

/// A single line requested from a chip.
///
/// # Examples
///```no_run
/// # fn example() -> gpioline::Result<()>{
/// use gpioline::{options, Chip, Value};
///
/// let chip = Chip::from_name("gpiochip0")?;
/// let led = chip.request_line(22, &[options::as_output([Value::Active])])?;
/// led.set_value(Value::Inactive)?;
/// # Ok(())
/// # }
///```
#[derive(Debug)]
pub struct Line {
    lines: Lines,
}

impl From<Lines> for Line {
    fn from(lines: Lines) -> Self {
        Line { lines }
    }
}

impl Line {
    /// The offset of the requested line.
    pub fn offset(&self) -> Offset {
        self.lines.offsets[0]
    }

    /// The uAPI ABI version used by the request.
    pub fn abi_version(&self) -> AbiVersion {
        self.lines.abi_version()
    }

    /// The path of the chip the line was requested from.
    pub fn chip_path(&self) -> &Path {
        self.lines.chip_path()
    }

    /// The current configuration of the line.
    pub fn config(&self) -> Result<LineConfig> {
        let mut cfg = self.lines.config()?;
        cfg.pop().ok_or(Error::Closed)
    }

    /// Get the value of the line.
    pub fn value(&self) -> Result<Value> {
        self.lines.value(self.offset())
    }

    /// Set the value of the line.
    ///
    /// The line must be an output.
    pub fn set_value(&self, value: Value) -> Result<()> {
        self.lines.set_value(self.offset(), value)
    }

    /// Update the configuration of the line.
    ///
    /// See [`Lines::reconfigure`].
    pub fn reconfigure(&self, opts: &[ConfigOption]) -> Result<()> {
        self.lines.reconfigure(opts)
    }

    /// Get the info for the line.
    ///
    /// The info is cached until the line is reconfigured.
    pub fn info(&self) -> Result<line::Info> {
        let mut info = self.lines.info()?;
        info.pop().ok_or(Error::Closed)
    }

    /// Release the line.
    ///
    /// See [`Lines::close`].
    pub fn close(&self) -> Result<()> {
        self.lines.close()
    }
}

impl AsRef<Lines> for Line {
    fn as_ref(&self) -> &Lines {
        &self.lines
    }
}
