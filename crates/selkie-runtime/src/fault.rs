//! Crash recovery primitive
//!
//! `pcall` runs a closure and converts any panic that escapes it into a
//! [`FaultInfo`] carrying the panic message and a backtrace captured at the
//! panic site. The engine wraps each dispatch thread's main loop in it, so
//! a fault in one handler takes down only its own thread.
//!
//! The backtrace is grabbed by a process-wide panic hook that is installed
//! once and only activates for threads currently inside a `pcall` region;
//! panics elsewhere in the process keep their previous hook behavior.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Trace delivered to fault handlers
pub struct FaultInfo {
    message: String,
    backtrace: Option<Backtrace>,
}

impl FaultInfo {
    /// The panic message, or a placeholder for non-string payloads
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backtrace captured at the panic site, if one was recorded
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n{}", backtrace)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInfo")
            .field("message", &self.message)
            .field("backtrace", &self.backtrace.is_some())
            .finish()
    }
}

thread_local! {
    static CAPTURE_FAULTS: Cell<bool> = const { Cell::new(false) };
    static LAST_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_capture_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURE_FAULTS.with(Cell::get) {
                LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `body`, converting an escaping panic into a [`FaultInfo`]
pub fn pcall<R>(body: impl FnOnce() -> R) -> Result<R, FaultInfo> {
    install_capture_hook();

    let was_capturing = CAPTURE_FAULTS.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(body));
    CAPTURE_FAULTS.with(|flag| flag.set(was_capturing));

    match result {
        Ok(value) => Ok(value),
        Err(payload) => Err(FaultInfo {
            message: panic_message(payload.as_ref()),
            backtrace: LAST_TRACE.with(|slot| slot.borrow_mut().take()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcall_passes_value_through() {
        assert_eq!(pcall(|| 42).unwrap(), 42);
    }

    #[test]
    fn test_pcall_reports_message_and_trace() {
        let fault = pcall(|| panic!("engine room flooding")).unwrap_err();
        assert_eq!(fault.message(), "engine room flooding");
        assert!(fault.backtrace().is_some());
    }

    #[test]
    fn test_pcall_reports_formatted_message() {
        let fault = pcall(|| panic!("slot {} gone", 3)).unwrap_err();
        assert_eq!(fault.message(), "slot 3 gone");
    }

    #[test]
    fn test_nested_pcall_restores_capture_flag() {
        let outer = pcall(|| {
            let inner = pcall(|| panic!("inner"));
            assert!(inner.is_err());
            panic!("outer");
        });
        assert_eq!(outer.unwrap_err().message(), "outer");
    }
}
