//! Scripted firmware for driving the handoff on the host.
//!
//! The memory map is modeled as a generation counter: every pool allocation
//! or free bumps it, and the map key handed out by `GetMemoryMap` is the
//! generation at query time. `ExitBootServices` accepts a key only if it
//! still equals the current generation, which is exactly the firmware rule.

#![allow(dead_code)]

use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;
use uefi::Status;
use uefi_handoff::diagnostics::Stall;
use uefi_handoff::display::{DisplayDevice, DisplaySurface, FrameBuffer, ModeInfo};
use uefi_handoff::entry::ImageEntry;
use uefi_handoff::firmware::{
    Capability, CapabilityHandle, CapabilityRegistry, Firmware, FirmwareRevision,
};
use uefi_handoff::image::{Directory, FileVolume, ReadOnlyFile};
use uefi_handoff::input::{Key, KeyInput};
use uefi_handoff::memory_map::{MapKey, MapMeta, MapQueryError, MemoryMapSource};
use uefi_handoff::ownership::{OwnershipGate, TransferRejection};
use uefi_handoff::pool::{PoolAllocator, PoolKind};

/// Size of one descriptor as reported by the mock (matches OVMF).
pub const DESC_SIZE: usize = 48;

/// Descriptors in the map before any loader allocation.
pub const BASE_DESCRIPTORS: usize = 16;

pub const FRAMEBUFFER_BASE: u64 = 0x8000_0000;

/// Framebuffer base of mode `index`.
pub fn framebuffer_base(index: u32) -> u64 {
    FRAMEBUFFER_BASE + u64::from(index) * 0x0100_0000
}

// ---------------------------------------------------------------------------
// Shared handle accounting

/// Counts open protocol/file handles; all of them must be closed before a snapshot.
#[derive(Clone, Default)]
pub struct Handles(Rc<Cell<usize>>);

impl Handles {
    fn open(&self) -> HandleGuard {
        self.0.set(self.0.get() + 1);
        HandleGuard(self.clone())
    }

    pub fn open_count(&self) -> usize {
        self.0.get()
    }
}

pub struct HandleGuard(Handles);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let count = &self.0.0;
        count.set(count.get() - 1);
    }
}

// ---------------------------------------------------------------------------
// Display

pub struct DisplayState {
    pub modes: Vec<(usize, usize)>,
    pub active: u32,
    /// Modes that fail to be queried (skipped by enumeration).
    pub broken_modes: Vec<u32>,
    /// Status returned by `SetMode`, if it should fail.
    pub refuse_set_mode: Option<Status>,
    pub set_mode_calls: Vec<u32>,
}

pub struct MockDisplay {
    state: Rc<RefCell<DisplayState>>,
    _guard: HandleGuard,
}

impl DisplayDevice for MockDisplay {
    fn max_mode(&self) -> u32 {
        u32::try_from(self.state.borrow().modes.len()).unwrap()
    }

    fn active_mode(&self) -> u32 {
        self.state.borrow().active
    }

    fn query_mode(&self, index: u32) -> Result<ModeInfo, Status> {
        let state = self.state.borrow();
        if state.broken_modes.contains(&index) {
            return Err(Status::DEVICE_ERROR);
        }
        let (width, height) = *state
            .modes
            .get(index as usize)
            .ok_or(Status::INVALID_PARAMETER)?;
        Ok(ModeInfo {
            width,
            height,
            stride: width,
        })
    }

    fn set_mode(&mut self, index: u32) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.set_mode_calls.push(index);
        if let Some(status) = state.refuse_set_mode {
            return Err(status);
        }
        if index as usize >= state.modes.len() {
            return Err(Status::UNSUPPORTED);
        }
        state.active = index;
        Ok(())
    }

    fn frame_buffer(&mut self) -> FrameBuffer {
        let state = self.state.borrow();
        let (w, h) = state.modes[state.active as usize];
        FrameBuffer {
            base: framebuffer_base(state.active),
            size: w * h * 4,
        }
    }
}

// ---------------------------------------------------------------------------
// File system

#[derive(Clone, Default)]
pub struct MockFileSpec {
    pub contents: Vec<u8>,
    /// Size reported by the metadata instead of the real length.
    pub reported_size: Option<u64>,
    /// Upper bound of bytes returned by a single read.
    pub read_limit: Option<usize>,
    pub read_error: Option<Status>,
    pub info_error: Option<Status>,
}

#[derive(Default)]
pub struct VolumeState {
    pub files: HashMap<String, MockFileSpec>,
    pub open_volume_error: Option<Status>,
    /// Status returned for any file open (overrides lookup).
    pub open_error: Option<Status>,
    pub opened_paths: Vec<String>,
}

pub struct MockVolume {
    state: Rc<RefCell<VolumeState>>,
    handles: Handles,
    _guard: HandleGuard,
}

pub struct MockRoot {
    state: Rc<RefCell<VolumeState>>,
    handles: Handles,
    _guard: HandleGuard,
}

pub struct MockFile {
    spec: MockFileSpec,
    _guard: HandleGuard,
}

impl FileVolume for MockVolume {
    type Root = MockRoot;

    fn open_volume(&self) -> Result<Self::Root, Status> {
        if let Some(status) = self.state.borrow().open_volume_error {
            return Err(status);
        }
        Ok(MockRoot {
            state: self.state.clone(),
            handles: self.handles.clone(),
            _guard: self.handles.open(),
        })
    }
}

impl Directory for MockRoot {
    type File = MockFile;

    fn open_read_only(&mut self, path: &str) -> Result<Self::File, Status> {
        let mut state = self.state.borrow_mut();
        state.opened_paths.push(path.to_owned());
        if let Some(status) = state.open_error {
            return Err(status);
        }
        let spec = state.files.get(path).cloned().ok_or(Status::NOT_FOUND)?;
        Ok(MockFile {
            spec,
            _guard: self.handles.open(),
        })
    }
}

impl ReadOnlyFile for MockFile {
    fn file_size(&mut self) -> Result<u64, Status> {
        if let Some(status) = self.spec.info_error {
            return Err(status);
        }
        Ok(self
            .spec
            .reported_size
            .unwrap_or(self.spec.contents.len() as u64))
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        if let Some(status) = self.spec.read_error {
            return Err(status);
        }
        let limit = self.spec.read_limit.unwrap_or(usize::MAX);
        let n = buffer.len().min(self.spec.contents.len()).min(limit);
        buffer[..n].copy_from_slice(&self.spec.contents[..n]);
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Memory

#[derive(Default)]
pub struct PoolState {
    pub live: HashMap<usize, (Layout, PoolKind)>,
    pub allocations: usize,
    pub frees: usize,
    pub kinds: Vec<(PoolKind, usize)>,
    /// Fail the n-th allocation (1-based) with `OUT_OF_RESOURCES`.
    pub fail_allocation: Option<usize>,
}

pub struct MapState {
    /// Bumped by every allocation and free.
    pub generation: usize,
    /// Descriptors the map currently has.
    pub descriptors: usize,
    /// How many more times the map grows by one descriptor when a query comes up short.
    pub growths_left: usize,
    pub queries: usize,
    pub issued_keys: Vec<MapKey>,
    /// Fail the n-th query (1-based) with the given status.
    pub fail_query: Option<(usize, Status)>,
    /// Answer the probe with success instead of "buffer too small".
    pub probe_succeeds: bool,
}

pub struct GateState {
    /// The first `n` exits are rejected as stale regardless of the key.
    pub forced_stale: usize,
    /// Reject every exit with this status.
    pub refuse: Option<Status>,
    pub submitted_keys: Vec<MapKey>,
    pub exited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCall {
    pub entry: usize,
    pub base: u64,
    pub size: usize,
    /// The first bytes at the entry point.
    pub head: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Firmware

pub struct MockFirmware {
    pub display: Rc<RefCell<DisplayState>>,
    pub display_missing: bool,
    pub volume: Rc<RefCell<VolumeState>>,
    pub handles: Handles,
    pub pool: RefCell<PoolState>,
    pub map: RefCell<MapState>,
    pub gate: RefCell<GateState>,
    pub keys: RefCell<VecDeque<Result<Option<Key>, Status>>>,
    pub wait_error: Option<Status>,
    pub stalls: RefCell<Vec<Duration>>,
    pub entered: RefCell<Option<EntryCall>>,
}

impl MockFirmware {
    /// A firmware with two modes (800x600 active, 1024x768) and no files.
    pub fn new() -> Self {
        Self {
            display: Rc::new(RefCell::new(DisplayState {
                modes: vec![(800, 600), (1024, 768)],
                active: 0,
                broken_modes: Vec::new(),
                refuse_set_mode: None,
                set_mode_calls: Vec::new(),
            })),
            display_missing: false,
            volume: Rc::new(RefCell::new(VolumeState::default())),
            handles: Handles::default(),
            pool: RefCell::new(PoolState::default()),
            map: RefCell::new(MapState {
                generation: 0,
                descriptors: BASE_DESCRIPTORS,
                growths_left: 0,
                queries: 0,
                issued_keys: Vec::new(),
                fail_query: None,
                probe_succeeds: false,
            }),
            gate: RefCell::new(GateState {
                forced_stale: 0,
                refuse: None,
                submitted_keys: Vec::new(),
                exited: false,
            }),
            keys: RefCell::new(VecDeque::new()),
            wait_error: None,
            stalls: RefCell::new(Vec::new()),
            entered: RefCell::new(None),
        }
    }

    pub fn with_modes(self, modes: &[(usize, usize)]) -> Self {
        self.display.borrow_mut().modes = modes.to_vec();
        self
    }

    pub fn with_file(self, path: &str, contents: Vec<u8>) -> Self {
        self.with_file_spec(
            path,
            MockFileSpec {
                contents,
                ..MockFileSpec::default()
            },
        )
    }

    pub fn with_file_spec(self, path: &str, spec: MockFileSpec) -> Self {
        self.volume.borrow_mut().files.insert(path.to_owned(), spec);
        self
    }

    pub fn with_keys(self, keys: &[char]) -> Self {
        self.keys
            .borrow_mut()
            .extend(keys.iter().map(|&c| Ok(Some(Key::Printable(c)))));
        self
    }

    pub fn with_map_growths(self, growths: usize) -> Self {
        self.map.borrow_mut().growths_left = growths;
        self
    }

    pub fn with_stale_exits(self, count: usize) -> Self {
        self.gate.borrow_mut().forced_stale = count;
        self
    }

    /// Pool regions currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.pool.borrow().live.len()
    }

    pub fn map_queries(&self) -> usize {
        self.map.borrow().queries
    }

    pub fn submitted_keys(&self) -> Vec<MapKey> {
        self.gate.borrow().submitted_keys.clone()
    }

    pub fn issued_keys(&self) -> Vec<MapKey> {
        self.map.borrow().issued_keys.clone()
    }

    pub fn required_map_size(&self) -> usize {
        self.map.borrow().descriptors * DESC_SIZE
    }

    fn bump_generation(&self) {
        self.map.borrow_mut().generation += 1;
    }
}

impl Default for MockFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry for MockFirmware {
    type Display = MockDisplay;
    type Volume = MockVolume;

    fn locate(
        &self,
        capability: Capability,
    ) -> Result<CapabilityHandle<Self::Display, Self::Volume>, Status> {
        match capability {
            Capability::DisplayDevice if self.display_missing => Err(Status::NOT_FOUND),
            Capability::DisplayDevice => Ok(CapabilityHandle::Display(MockDisplay {
                state: self.display.clone(),
                _guard: self.handles.open(),
            })),
            Capability::FileVolume => Ok(CapabilityHandle::Volume(MockVolume {
                state: self.volume.clone(),
                handles: self.handles.clone(),
                _guard: self.handles.open(),
            })),
        }
    }
}

impl PoolAllocator for MockFirmware {
    fn allocate_pool(&self, kind: PoolKind, size: usize) -> Result<NonNull<u8>, Status> {
        assert!(!self.gate.borrow().exited, "allocation after ExitBootServices");

        let mut pool = self.pool.borrow_mut();
        pool.allocations += 1;
        if pool.fail_allocation == Some(pool.allocations) {
            return Err(Status::OUT_OF_RESOURCES);
        }

        let layout = Layout::from_size_align(size.max(1), 8).unwrap();
        let ptr = NonNull::new(unsafe { alloc(layout) }).ok_or(Status::OUT_OF_RESOURCES)?;
        pool.live.insert(ptr.as_ptr() as usize, (layout, kind));
        pool.kinds.push((kind, size));
        drop(pool);

        // The firmware needs a descriptor for the new region.
        self.bump_generation();
        Ok(ptr)
    }

    unsafe fn free_pool(&self, ptr: NonNull<u8>) -> Result<(), Status> {
        assert!(!self.gate.borrow().exited, "free after ExitBootServices");

        let mut pool = self.pool.borrow_mut();
        let (layout, _) = pool
            .live
            .remove(&(ptr.as_ptr() as usize))
            .ok_or(Status::INVALID_PARAMETER)?;
        pool.frees += 1;
        drop(pool);

        unsafe { dealloc(ptr.as_ptr(), layout) };
        self.bump_generation();
        Ok(())
    }
}

impl MemoryMapSource for MockFirmware {
    fn query_memory_map(&self, buffer: &mut [u8]) -> Result<MapMeta, MapQueryError> {
        assert_eq!(
            self.handles.open_count(),
            0,
            "protocol handles still open while taking a memory map snapshot"
        );

        let mut map = self.map.borrow_mut();
        map.queries += 1;
        if let Some((n, status)) = map.fail_query {
            if n == map.queries {
                return Err(MapQueryError::Failed(status));
            }
        }

        let required = map.descriptors * DESC_SIZE;
        let probe_shortcut = map.probe_succeeds && buffer.is_empty();
        if buffer.len() < required && !probe_shortcut {
            // Handling the query allocates inside the firmware.
            if map.growths_left > 0 {
                map.growths_left -= 1;
                map.descriptors += 1;
            }
            return Err(MapQueryError::BufferTooSmall { required });
        }

        let map_size = if probe_shortcut { 0 } else { required };
        buffer[..map_size].fill(0);
        for i in 0..map_size / DESC_SIZE {
            // page_count at offset 24 of each descriptor
            let at = i * DESC_SIZE + 24;
            buffer[at..at + 8].copy_from_slice(&1u64.to_le_bytes());
        }

        let key = MapKey::new(map.generation);
        map.issued_keys.push(key);
        Ok(MapMeta {
            map_size,
            desc_size: DESC_SIZE,
            desc_version: 1,
            key,
        })
    }
}

impl OwnershipGate for MockFirmware {
    fn exit_boot_services(&self, key: MapKey) -> Result<(), TransferRejection> {
        let current = self.map.borrow().generation;
        let mut gate = self.gate.borrow_mut();
        gate.submitted_keys.push(key);

        if let Some(status) = gate.refuse {
            return Err(TransferRejection::Failed(status));
        }

        if gate.forced_stale > 0 {
            gate.forced_stale -= 1;
            drop(gate);
            // Some timer event allocated behind our back.
            self.bump_generation();
            return Err(TransferRejection::StaleMapKey);
        }

        if key.value() != current {
            return Err(TransferRejection::StaleMapKey);
        }

        gate.exited = true;
        Ok(())
    }
}

impl KeyInput for MockFirmware {
    fn wait_for_key(&self) -> Result<(), Status> {
        if let Some(status) = self.wait_error {
            return Err(status);
        }
        if self.keys.borrow().is_empty() {
            panic!("waiting for a key that will never come");
        }
        Ok(())
    }

    fn read_key(&self) -> Result<Option<Key>, Status> {
        self.keys.borrow_mut().pop_front().unwrap_or(Ok(None))
    }
}

impl Stall for MockFirmware {
    fn stall(&self, duration: Duration) {
        self.stalls.borrow_mut().push(duration);
    }
}

impl ImageEntry for MockFirmware {
    unsafe fn enter(&self, entry: NonNull<u8>, surface: &DisplaySurface) {
        assert!(self.gate.borrow().exited, "entered image before ExitBootServices");

        let head = unsafe { std::slice::from_raw_parts(entry.as_ptr(), 4) }.to_vec();
        *self.entered.borrow_mut() = Some(EntryCall {
            entry: entry.as_ptr() as usize,
            base: surface.base,
            size: surface.size,
            head,
        });
    }
}

impl Firmware for MockFirmware {
    fn revision(&self) -> FirmwareRevision {
        FirmwareRevision { major: 2, minor: 70 }
    }
}

// ---------------------------------------------------------------------------
// Log capture

thread_local! {
    static CAPTURED: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Records every log line on the emitting thread, so parallel tests stay apart.
struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        CAPTURED.with(|lines| {
            lines
                .borrow_mut()
                .push((record.level(), record.args().to_string()));
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

/// Installs the capturing logger (once per test binary) and clears this
/// thread's lines.
pub fn capture_logs() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = log::set_logger(&CAPTURE_LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });
    CAPTURED.with(|lines| lines.borrow_mut().clear());
}

/// Lines logged at `error` level on this thread since [`capture_logs`].
pub fn error_lines() -> Vec<String> {
    CAPTURED.with(|lines| {
        lines
            .borrow()
            .iter()
            .filter(|(level, _)| *level == log::Level::Error)
            .map(|(_, line)| line.clone())
            .collect()
    })
}
