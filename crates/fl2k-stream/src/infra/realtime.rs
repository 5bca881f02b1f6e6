//! Scheduling class for the transmit helper thread.
//!
//! libosmo-fl2k refills its USB transfers from callbacks that must never wait
//! on a descheduled producer, so the helper asks the OS for a multimedia task
//! class while it is parked inside the driver. Only Windows (MMCSS) has such a
//! class; elsewhere the guard is inert.

#[cfg(windows)]
use windows::Win32::Foundation::HANDLE;
#[cfg(windows)]
use windows::Win32::System::Threading::{
    AVRT_PRIORITY_HIGH, AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW,
    AvSetMmThreadPriority,
};

/// Registration of the current thread in a multimedia task class, undone on drop.
pub(crate) struct RealtimeGuard {
    #[cfg(windows)]
    task: Option<MmcssTask>,
}

impl RealtimeGuard {
    /// Joins `class` (an MMCSS task name such as `"Pro Audio"`) for the life of
    /// the guard. `None` leaves scheduling alone.
    ///
    /// Failure to register is logged and yields an inactive guard.
    pub(crate) fn enter(class: Option<&'static str>) -> Self {
        #[cfg(windows)]
        {
            Self {
                task: class.and_then(MmcssTask::register),
            }
        }
        #[cfg(not(windows))]
        {
            if let Some(class) = class {
                tracing::trace!(class, "no multimedia scheduling class on this platform");
            }
            Self {}
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        #[cfg(windows)]
        {
            self.task.is_some()
        }
        #[cfg(not(windows))]
        {
            false
        }
    }
}

#[cfg(windows)]
struct MmcssTask {
    handle: HANDLE,
    class: &'static str,
}

#[cfg(windows)]
impl MmcssTask {
    fn register(class: &'static str) -> Option<Self> {
        let mut task_index = 0u32;
        let name = windows::core::HSTRING::from(class);
        let handle = match unsafe { AvSetMmThreadCharacteristicsW(&name, &mut task_index) } {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    class,
                    %error,
                    "MMCSS registration failed, transmit thread keeps normal priority"
                );
                return None;
            },
        };
        if let Err(error) = unsafe { AvSetMmThreadPriority(handle, AVRT_PRIORITY_HIGH) } {
            tracing::debug!(class, %error, "MMCSS priority boost refused");
        }
        tracing::debug!(class, task_index, "transmit thread joined MMCSS class");
        Some(Self { handle, class })
    }
}

#[cfg(windows)]
impl Drop for MmcssTask {
    fn drop(&mut self) {
        if let Err(error) = unsafe { AvRevertMmThreadCharacteristics(self.handle) } {
            tracing::warn!(class = self.class, %error, "MMCSS revert failed");
        }
    }
}
