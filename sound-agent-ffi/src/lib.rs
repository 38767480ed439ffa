//! C ABI over the sound agent device collection.
//!
//! Callers get an opaque handle from `SaaInitialize`, query the default
//! render and capture devices, and release the handle with
//! `SaaUnInitialize`. Every handle owns its own collection. All functions use
//! panic::catch_unwind to prevent Rust panics from unwinding across the FFI
//! boundary.

use sound_agent_rs::audio::EndpointProvider;
use sound_agent_rs::{
    AudioError, CollectionOptions, DeviceEventType, DeviceObserver, SoundDevice,
    SoundDeviceCollection,
};
use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    ComError = -4,
    ProviderError = -5,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } | AudioError::EndpointNotFound { .. } => {
                ErrorCode::DeviceNotFound
            }
            AudioError::Provider(_)
            | AudioError::VolumeNotAvailable
            | AudioError::StringConversion(_) => ErrorCode::ProviderError,
            #[cfg(windows)]
            AudioError::ComInitFailed(_)
            | AudioError::EnumerationFailed(_)
            | AudioError::WindowsError(_) => ErrorCode::ComError,
        }
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

fn fail(code: ErrorCode, message: impl Into<String>) -> SaaResult {
    set_last_error(code, message);
    code as SaaResult
}

// ============================================================================
// C Types
// ============================================================================

/// Opaque handle; the address of a boxed [`SaaContext`].
pub type SaaHandle = u64;

pub type SaaResult = i32;

/// Called with TRUE when a default render device is present after a default
/// or render volume change, FALSE when none is.
pub type SaaDefaultRenderChangedCallback = Option<extern "system" fn(present: i32)>;

pub const SAA_PNP_ID_LEN: usize = 80;
pub const SAA_NAME_LEN: usize = 128;

/// One merged device as seen by native callers.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SaaDescription {
    /// NUL-terminated group id
    pub pnp_id: [c_char; SAA_PNP_ID_LEN],

    /// NUL-terminated display name
    pub name: [c_char; SAA_NAME_LEN],

    pub is_render: i32,
    pub is_capture: i32,
    pub render_volume: u16,
    pub capture_volume: u16,
}

impl Default for SaaDescription {
    fn default() -> Self {
        Self {
            pnp_id: [0; SAA_PNP_ID_LEN],
            name: [0; SAA_NAME_LEN],
            is_render: 0,
            is_capture: 0,
            render_volume: 0,
            capture_volume: 0,
        }
    }
}

impl From<&SoundDevice> for SaaDescription {
    fn from(device: &SoundDevice) -> Self {
        let mut description = SaaDescription::default();
        copy_c_string(&mut description.pnp_id, &device.group_id);
        copy_c_string(&mut description.name, &device.name);
        description.is_render = i32::from(device.flow.has_render());
        description.is_capture = i32::from(device.flow.has_capture());
        description.render_volume = device.render_volume;
        description.capture_volume = device.capture_volume;
        description
    }
}

/// Copy `value` into a fixed buffer, truncated on a char boundary and
/// always NUL-terminated.
fn copy_c_string(buffer: &mut [c_char], value: &str) {
    let mut end = value.len().min(buffer.len().saturating_sub(1));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    for (slot, byte) in buffer.iter_mut().zip(value[..end].bytes()) {
        *slot = byte as c_char;
    }
    if let Some(terminator) = buffer.get_mut(end) {
        *terminator = 0;
    }
}

/// Allocate a C string from a Rust string. Caller must free with SaaFreeString.
fn alloc_c_string(s: &str) -> *mut c_char {
    // Interior NUL bytes cannot be represented; strip them.
    let cleaned: String = s.chars().filter(|&c| c != '\0').collect();
    CString::new(cleaned).map_or(ptr::null_mut(), CString::into_raw)
}

// ============================================================================
// Handle State
// ============================================================================

struct DllObserver {
    callback: SaaDefaultRenderChangedCallback,
}

impl DeviceObserver for DllObserver {
    fn on_collection_changed(&self, event: DeviceEventType, group_id: &str) {
        let Some(callback) = self.callback else {
            return;
        };
        if matches!(
            event,
            DeviceEventType::DefaultRenderChanged | DeviceEventType::VolumeRenderChanged
        ) {
            callback(i32::from(!group_id.is_empty()));
        }
    }
}

/// Everything owned by one handle.
struct SaaContext {
    collection: Arc<SoundDeviceCollection>,
    observer: Arc<dyn DeviceObserver>,

    /// Dropped last, after the collection has released its COM objects
    #[cfg(windows)]
    _com: Option<sound_agent_rs::audio::ComGuard>,
}

impl SaaContext {
    fn new(
        provider: Arc<dyn EndpointProvider>,
        callback: SaaDefaultRenderChangedCallback,
    ) -> Result<Self, AudioError> {
        let collection = SoundDeviceCollection::new(provider, CollectionOptions::default())?;
        let observer: Arc<dyn DeviceObserver> = Arc::new(DllObserver { callback });
        collection.subscribe(observer.clone());
        collection.reset_content();
        info!(devices = collection.size(), "Device collection initialized");

        Ok(Self {
            collection,
            observer,
            #[cfg(windows)]
            _com: None,
        })
    }

    fn into_handle(self) -> SaaHandle {
        Box::into_raw(Box::new(self)) as usize as SaaHandle
    }

    /// Borrow the context behind a handle.
    ///
    /// # Safety
    /// The handle must come from `SaaInitialize` and not be released yet.
    unsafe fn from_handle<'a>(handle: SaaHandle) -> Option<&'a SaaContext> {
        (handle as usize as *const SaaContext).as_ref()
    }
}

impl Drop for SaaContext {
    fn drop(&mut self) {
        self.collection.unsubscribe(&self.observer);
    }
}

#[cfg(windows)]
fn create_context(callback: SaaDefaultRenderChangedCallback) -> Result<SaaContext, AudioError> {
    use sound_agent_rs::audio::{ComGuard, WindowsEndpointProvider};

    // A caller thread already in an STA keeps its apartment.
    let com = match ComGuard::new() {
        Ok(guard) => Some(guard),
        Err(e) => {
            debug!(error = %e, "COM already initialized on this thread");
            None
        }
    };
    let provider = Arc::new(WindowsEndpointProvider::new()?);
    let mut context = SaaContext::new(provider, callback)?;
    context._com = com;
    Ok(context)
}

#[cfg(not(windows))]
fn create_context(callback: SaaDefaultRenderChangedCallback) -> Result<SaaContext, AudioError> {
    debug!("No Core Audio on this platform, using an empty endpoint provider");
    let provider = Arc::new(sound_agent_rs::audio::MockEndpointProvider::new());
    SaaContext::new(provider, callback)
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a device collection bound to a new handle.
///
/// # Arguments
/// * `handle` - Receives the new handle
/// * `callback` - Optional default-render notification, may be null
///
/// # Returns
/// 0 on success, negative error code on failure.
///
/// # Safety
/// `handle` must be valid for writes. Release the handle with
/// SaaUnInitialize() on the thread that created it.
#[no_mangle]
pub unsafe extern "system" fn SaaInitialize(
    handle: *mut SaaHandle,
    callback: SaaDefaultRenderChangedCallback,
) -> SaaResult {
    clear_last_error();

    if handle.is_null() {
        return fail(ErrorCode::InvalidArgument, "Handle pointer is null");
    }

    let result = panic::catch_unwind(|| create_context(callback));

    match result {
        Ok(Ok(context)) => {
            *handle = context.into_handle();
            ErrorCode::Success as SaaResult
        }
        Ok(Err(e)) => {
            *handle = 0;
            fail(ErrorCode::from(&e), e.to_string())
        }
        Err(_) => {
            *handle = 0;
            fail(ErrorCode::Panic, "Panic during initialization")
        }
    }
}

/// Release a handle and everything it owns.
///
/// # Safety
/// The handle must come from SaaInitialize() and must not be used after this call.
#[no_mangle]
pub unsafe extern "system" fn SaaUnInitialize(handle: SaaHandle) -> SaaResult {
    clear_last_error();

    if handle == 0 {
        return fail(ErrorCode::InvalidHandle, "Handle is null");
    }

    let result = panic::catch_unwind(|| {
        drop(Box::from_raw(handle as usize as *mut SaaContext));
    });

    match result {
        Ok(()) => ErrorCode::Success as SaaResult,
        Err(_) => fail(ErrorCode::Panic, "Panic during uninitialization"),
    }
}

// ============================================================================
// FFI Functions - Device Queries
// ============================================================================

unsafe fn fill_default(
    handle: SaaHandle,
    description: *mut SaaDescription,
    query: fn(&SoundDeviceCollection) -> Option<SoundDevice>,
) -> SaaResult {
    clear_last_error();

    if description.is_null() {
        return fail(ErrorCode::InvalidArgument, "Description pointer is null");
    }
    let Some(context) = SaaContext::from_handle(handle) else {
        return fail(ErrorCode::InvalidHandle, "Handle is null");
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| query(&context.collection)));

    match result {
        Ok(device) => {
            *description = device.as_ref().map(SaaDescription::from).unwrap_or_default();
            ErrorCode::Success as SaaResult
        }
        Err(_) => {
            *description = SaaDescription::default();
            fail(ErrorCode::Panic, "Panic during device query")
        }
    }
}

/// Describe the device holding the default render endpoint.
///
/// The description is zeroed when there is none.
///
/// # Safety
/// `handle` must be live and `description` valid for writes.
#[no_mangle]
pub unsafe extern "system" fn SaaGetDefaultRender(
    handle: SaaHandle,
    description: *mut SaaDescription,
) -> SaaResult {
    fill_default(handle, description, SoundDeviceCollection::default_render_device)
}

/// Describe the device holding the default capture endpoint.
///
/// # Safety
/// `handle` must be live and `description` valid for writes.
#[no_mangle]
pub unsafe extern "system" fn SaaGetDefaultCapture(
    handle: SaaHandle,
    description: *mut SaaDescription,
) -> SaaResult {
    fill_default(handle, description, SoundDeviceCollection::default_capture_device)
}

// ============================================================================
// FFI Functions - Memory Management and Errors
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the Saa* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub unsafe extern "system" fn SaaFreeString(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        drop(CString::from_raw(ptr));
    });
}

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "system" fn SaaLastErrorCode() -> SaaResult {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as SaaResult)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with SaaFreeString().
/// Returns null if no error.
#[no_mangle]
pub extern "system" fn SaaLastErrorMessage() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

/// Get the library version. Caller must free with SaaFreeString().
#[no_mangle]
pub extern "system" fn SaaVersion() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sound_agent_rs::audio::{MockEndpointProvider, RawEndpoint};
    use sound_agent_rs::FlowType;
    use std::ffi::CStr;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static LAST_PRESENT: AtomicI32 = AtomicI32::new(-1);

    extern "system" fn record(present: i32) {
        CALLS.fetch_add(1, Ordering::SeqCst);
        LAST_PRESENT.store(present, Ordering::SeqCst);
    }

    fn endpoint(id: &str, name: &str, flow: FlowType, scalar: f32) -> RawEndpoint {
        RawEndpoint {
            id: id.to_string(),
            group_id: "G1".to_string(),
            name: name.to_string(),
            flow,
            muted: false,
            volume_scalar: scalar,
        }
    }

    fn c_str(buffer: &[c_char]) -> String {
        unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&AudioError::DeviceNotFound {
                device_id: "test".to_string()
            }),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            ErrorCode::from(&AudioError::Provider("x".to_string())),
            ErrorCode::ProviderError
        );
    }

    #[test]
    fn test_description_from_merged_device() {
        let device = SoundDevice::new("G1", "Microphone/Speakers", FlowType::RenderAndCapture, 800, 500);
        let description = SaaDescription::from(&device);
        assert_eq!(c_str(&description.pnp_id), "G1");
        assert_eq!(c_str(&description.name), "Microphone/Speakers");
        assert_eq!(description.is_render, 1);
        assert_eq!(description.is_capture, 1);
        assert_eq!(description.render_volume, 800);
        assert_eq!(description.capture_volume, 500);
    }

    #[test]
    fn test_copy_c_string_truncates_on_char_boundary() {
        let mut buffer = [1 as c_char; 4];
        copy_c_string(&mut buffer, "abcdef");
        assert_eq!(c_str(&buffer), "abc");

        let mut buffer = [1 as c_char; 4];
        copy_c_string(&mut buffer, "aé€");
        assert_eq!(c_str(&buffer), "aé");
    }

    #[test]
    fn test_context_reports_default_render_and_calls_back() {
        let provider = Arc::new(MockEndpointProvider::new());
        provider.add_endpoint(endpoint("r", "Speakers", FlowType::Render, 0.8));
        provider.add_endpoint(endpoint("c", "Microphone", FlowType::Capture, 0.5));

        let handle = SaaContext::new(provider.clone(), Some(record))
            .unwrap()
            .into_handle();

        let mut description = SaaDescription::default();
        assert_eq!(unsafe { SaaGetDefaultRender(handle, &mut description) }, 0);
        assert_eq!(c_str(&description.pnp_id), "");

        provider.set_default(FlowType::Render, Some("r"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_PRESENT.load(Ordering::SeqCst), 1);

        assert_eq!(unsafe { SaaGetDefaultRender(handle, &mut description) }, 0);
        assert_eq!(c_str(&description.pnp_id), "G1");
        assert_eq!(description.is_capture, 1);

        provider.set_default(FlowType::Render, None);
        assert_eq!(LAST_PRESENT.load(Ordering::SeqCst), 0);

        assert_eq!(unsafe { SaaUnInitialize(handle) }, 0);
        provider.set_default(FlowType::Render, Some("r"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_arguments() {
        let mut description = SaaDescription::default();
        assert_eq!(
            unsafe { SaaGetDefaultCapture(0, &mut description) },
            ErrorCode::InvalidHandle as i32
        );
        assert_eq!(SaaLastErrorCode(), ErrorCode::InvalidHandle as i32);

        let message = SaaLastErrorMessage();
        assert!(!message.is_null());
        unsafe { SaaFreeString(message) };

        assert_eq!(
            unsafe { SaaInitialize(ptr::null_mut(), None) },
            ErrorCode::InvalidArgument as i32
        );
        assert_eq!(unsafe { SaaUnInitialize(0) }, ErrorCode::InvalidHandle as i32);
    }

    #[test]
    fn test_version() {
        let version = SaaVersion();
        assert!(!version.is_null());
        unsafe {
            let s = CStr::from_ptr(version).to_str().unwrap();
            assert!(!s.is_empty());
            SaaFreeString(version);
        }
    }
}
