pub mod oceanic;
pub mod ringbuffer;
pub mod suunto;
pub mod uwatec;

use std::ops::ControlFlow;

use bitflags::bitflags;

use crate::buffer::Buffer;
use crate::common::{Family, Status};
use crate::context::Context;
use crate::descriptor::Descriptor;
use crate::error::{DcError, Result};
use crate::iostream::IoStream;

bitflags! {
    /// Lifecycle events a caller can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const WAITING  = 1 << 0;
        const PROGRESS = 1 << 1;
        const DEVINFO  = 1 << 2;
        const CLOCK    = 1 << 3;
        const VENDOR   = 1 << 4;
    }
}

/// Model, firmware and serial as read from the identity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevInfo {
    pub model: u32,
    pub firmware: u32,
    pub serial: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The runtime is polling for a device-initiated transfer.
    Waiting,
    Progress { current: u32, maximum: u32 },
    DevInfo(DevInfo),
    /// Device clock against host clock, captured in the same exchange.
    Clock { devtime: u32, systime: i64 },
    Vendor(Vec<u8>),
}

pub type EventListener = Box<dyn FnMut(&DeviceEvent) + Send>;
pub type CancelPredicate = Box<dyn Fn() -> bool + Send>;

/// Dive delivery callback: `(dive data, fingerprint)`. Returning
/// `ControlFlow::Break(())` stops the iteration after the current dive.
pub type DiveCallback<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>;

/// State shared by every family driver: registered fingerprint, event
/// subscription, cancellation, progress accounting and the cached
/// identity block.
pub struct DeviceBase {
    pub(crate) context: Context,
    fingerprint: Vec<u8>,
    events: EventMask,
    listener: Option<EventListener>,
    cancel: Option<CancelPredicate>,
    progress_current: u32,
    progress_maximum: u32,
    devinfo: Option<DevInfo>,
    closed: bool,
}

impl std::fmt::Debug for DeviceBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBase")
            .field("fingerprint", &self.fingerprint)
            .field("events", &self.events)
            .field("progress_current", &self.progress_current)
            .field("progress_maximum", &self.progress_maximum)
            .field("devinfo", &self.devinfo)
            .field("closed", &self.closed)
            .finish()
    }
}

impl DeviceBase {
    pub(crate) fn new(context: &Context) -> Self {
        Self {
            context: context.clone(),
            fingerprint: Vec::new(),
            events: EventMask::empty(),
            listener: None,
            cancel: None,
            progress_current: 0,
            progress_maximum: 0,
            devinfo: None,
            closed: false,
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    fn set_fingerprint_checked(&mut self, data: &[u8], size: usize) -> Result<()> {
        if !data.is_empty() && data.len() != size {
            return Err(DcError::status_with_context(
                Status::InvalidArgs,
                format!("fingerprint must be empty or {size} bytes, got {}", data.len()),
            ));
        }
        self.fingerprint = data.to_vec();
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(DcError::status_with_context(
                Status::InvalidArgs,
                "device is closed",
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|predicate| predicate())
    }

    /// Polled before every packet exchange and sleep.
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancelled() {
            Err(DcError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Deliver an event to the subscriber. DevInfo is always cached, and
    /// progress is clamped monotonic non-decreasing with
    /// `current <= maximum`; nothing is emitted after close.
    pub(crate) fn emit(&mut self, event: DeviceEvent) {
        if let DeviceEvent::DevInfo(devinfo) = &event {
            self.devinfo = Some(*devinfo);
        }
        if self.closed {
            return;
        }

        let event = match event {
            DeviceEvent::Progress { current, maximum } => {
                if self.progress_maximum == 0 {
                    self.progress_maximum = maximum;
                }
                let maximum = self.progress_maximum;
                let current = current.clamp(self.progress_current, maximum);
                self.progress_current = current;
                DeviceEvent::Progress { current, maximum }
            }
            other => other,
        };

        let wanted = match &event {
            DeviceEvent::Waiting => EventMask::WAITING,
            DeviceEvent::Progress { .. } => EventMask::PROGRESS,
            DeviceEvent::DevInfo(_) => EventMask::DEVINFO,
            DeviceEvent::Clock { .. } => EventMask::CLOCK,
            DeviceEvent::Vendor(_) => EventMask::VENDOR,
        };

        if self.events.contains(wanted)
            && let Some(listener) = self.listener.as_mut()
        {
            listener(&event);
        }
    }

    /// Start a new progress range.
    pub(crate) fn progress_init(&mut self, maximum: u32) {
        self.progress_current = 0;
        self.progress_maximum = maximum;
        self.emit(DeviceEvent::Progress {
            current: 0,
            maximum,
        });
    }

    pub(crate) fn progress_update(&mut self, current: u32) {
        let maximum = self.progress_maximum;
        self.emit(DeviceEvent::Progress { current, maximum });
    }

    /// Saturate `current = maximum`; ring walks only know an upper bound.
    pub(crate) fn progress_finish(&mut self) {
        let maximum = self.progress_maximum;
        self.emit(DeviceEvent::Progress {
            current: maximum,
            maximum,
        });
    }
}

/// A live session against one physical unit.
///
/// Every family implements the subset of operations its hardware
/// supports; the rest report `Unsupported`. A device exclusively owns its
/// I/O stream; `close` releases it and is idempotent.
pub trait Device {
    fn family(&self) -> Family;
    fn base(&self) -> &DeviceBase;
    fn base_mut(&mut self) -> &mut DeviceBase;

    /// Fixed fingerprint length for this family, 0 when fingerprints are
    /// not supported.
    fn fingerprint_size(&self) -> usize {
        0
    }

    /// Register the newest-known dive. Empty clears; any other length
    /// must match [`Device::fingerprint_size`] exactly.
    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        let size = self.fingerprint_size();
        self.base_mut().set_fingerprint_checked(data, size)
    }

    fn set_events(&mut self, mask: EventMask, listener: EventListener) {
        let base = self.base_mut();
        base.events = mask;
        base.listener = Some(listener);
    }

    fn set_cancel(&mut self, predicate: CancelPredicate) {
        self.base_mut().cancel = Some(predicate);
    }

    /// Identity block captured at open, if the family reports one before
    /// the first transfer.
    fn devinfo(&self) -> Option<DevInfo> {
        self.base().devinfo
    }

    /// Copy the cached version/identity block.
    fn version(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(DcError::status(Status::Unsupported))
    }

    /// Read device memory at `address`.
    fn read(&mut self, _address: u32, _buf: &mut [u8]) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    /// Write device memory at `address`.
    fn write(&mut self, _address: u32, _data: &[u8]) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    /// Transfer the whole log memory.
    fn dump(&mut self, _buffer: &mut Buffer) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    /// Iterate dives newest-first. Stops early when the callback breaks
    /// or when a dive matches the registered fingerprint.
    fn foreach(&mut self, callback: DiveCallback) -> Result<()>;

    /// Set the device clock.
    fn timesync(&mut self, _datetime: &jiff::Zoned) -> Result<()> {
        Err(DcError::status(Status::Unsupported))
    }

    /// Release the I/O stream and all other resources. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Open a session for `descriptor` over `stream`, performing the family
/// handshake and reading the identity block.
pub fn open(
    context: &Context,
    descriptor: &Descriptor,
    stream: Box<dyn IoStream>,
) -> Result<Box<dyn Device>> {
    match descriptor.family() {
        Family::SuuntoSolution => Ok(Box::new(suunto::solution::SolutionDevice::open(
            context, descriptor, stream,
        )?)),
        Family::SuuntoEon => Ok(Box::new(suunto::eon::EonDevice::open(
            context, descriptor, stream,
        )?)),
        Family::SuuntoVyper => Ok(Box::new(suunto::vyper::VyperDevice::open(
            context, descriptor, stream,
        )?)),
        Family::SuuntoVyper2 => Ok(Box::new(suunto::vyper2::Vyper2Device::open(
            context, descriptor, stream,
        )?)),
        Family::UwatecAladin => Ok(Box::new(uwatec::aladin::AladinDevice::open(
            context, descriptor, stream,
        )?)),
        Family::UwatecMemoMouse => Ok(Box::new(uwatec::memomouse::MemomouseDevice::open(
            context, descriptor, stream,
        )?)),
        Family::UwatecSmart => Ok(Box::new(uwatec::smart::SmartDevice::open(
            context, descriptor, stream,
        )?)),
        Family::OceanicAtom2 => Ok(Box::new(oceanic::atom2::Atom2Device::open(
            context, descriptor, stream,
        )?)),
        _ => Err(DcError::status_with_context(
            Status::Unsupported,
            format!("no driver for {}", descriptor.family()),
        )),
    }
}

/// Shared dump loop: read `[begin, end)` in `blocksize` pieces with
/// progress and cancellation between packets.
pub(crate) fn dump_by_blocks(
    device: &mut (impl Device + ?Sized),
    begin: u32,
    end: u32,
    blocksize: usize,
    buffer: &mut Buffer,
) -> Result<()> {
    buffer.clear();
    buffer.reserve((end - begin) as usize);

    device.base_mut().progress_init(end - begin);

    let mut block = vec![0u8; blocksize];
    let mut address = begin;
    while address < end {
        device.base().check_cancelled()?;

        let len = blocksize.min((end - address) as usize);
        device.read(address, &mut block[..len])?;
        buffer.append(&block[..len]);

        address += len as u32;
        device.base_mut().progress_update(address - begin);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDevice {
        base: DeviceBase,
    }

    impl Device for StubDevice {
        fn family(&self) -> Family {
            Family::None
        }
        fn base(&self) -> &DeviceBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut DeviceBase {
            &mut self.base
        }
        fn fingerprint_size(&self) -> usize {
            4
        }
        fn foreach(&mut self, _callback: DiveCallback) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.base.mark_closed();
            Ok(())
        }
    }

    fn stub() -> StubDevice {
        StubDevice {
            base: DeviceBase::new(&Context::default()),
        }
    }

    #[test]
    fn test_fingerprint_size_validation() {
        let mut device = stub();
        assert!(device.set_fingerprint(&[]).is_ok());
        assert!(device.set_fingerprint(&[1, 2, 3, 4]).is_ok());

        let err = device.set_fingerprint(&[1, 2]).unwrap_err();
        assert_eq!(err.to_status(), Status::InvalidArgs);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        use std::sync::{Arc, Mutex};

        let mut device = stub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        device.set_events(
            EventMask::PROGRESS,
            Box::new(move |event| {
                if let DeviceEvent::Progress { current, maximum } = event {
                    sink.lock().unwrap().push((*current, *maximum));
                }
            }),
        );

        device.base_mut().progress_init(100);
        device.base_mut().progress_update(10);
        device.base_mut().progress_update(5); // must not go backwards
        device.base_mut().progress_update(150); // must not exceed maximum
        device.base_mut().progress_finish();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(0, 100), (10, 100), (10, 100), (100, 100), (100, 100)]);
    }

    #[test]
    fn test_closed_device_emits_nothing() {
        use std::sync::{Arc, Mutex};

        let mut device = stub();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        device.set_events(
            EventMask::all(),
            Box::new(move |_| {
                *sink.lock().unwrap() += 1;
            }),
        );

        device.close().unwrap();
        device.base_mut().emit(DeviceEvent::Waiting);
        assert_eq!(*seen.lock().unwrap(), 0);
        assert!(device.base().ensure_open().is_err());
    }

    #[test]
    fn test_devinfo_cached_without_listener() {
        let mut device = stub();
        device.base_mut().emit(DeviceEvent::DevInfo(DevInfo {
            model: 1,
            firmware: 2,
            serial: 3,
        }));
        assert_eq!(device.devinfo().unwrap().serial, 3);
    }

    #[test]
    fn test_cancel_predicate() {
        let mut device = stub();
        assert!(device.base().check_cancelled().is_ok());
        device.set_cancel(Box::new(|| true));
        assert!(matches!(
            device.base().check_cancelled(),
            Err(DcError::Cancelled)
        ));
    }
}
