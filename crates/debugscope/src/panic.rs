//! Panic capture
//!
//! Panics are recorded as `uncaught` exception entries, then handed to the
//! previously installed hook, so the panic's disposition is unchanged.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{self, PanicHookInfo};
use tokio::runtime::Handle;

use crate::scope::Scope;
use debugscope_watchers::ExceptionData;

pub const PANIC_CLASS: &str = "panic";

/// Install the recording hook, chaining to the current one
///
/// Recording runs on the runtime that is current at install time; panics on
/// threads outside it are still recorded. Without a runtime only the previous
/// hook runs.
pub fn install_panic_hook(scope: Scope) {
    let runtime = Handle::try_current().ok();
    if runtime.is_none() {
        tracing::warn!("No tokio runtime at panic hook installation; panics will not be recorded");
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Some(runtime) = &runtime
            && scope.is_enabled()
        {
            let data = panic_data(info);
            let scope = scope.clone();
            runtime.spawn(async move {
                if let Err(e) = scope.record_exception(data).await {
                    tracing::warn!("Failed to record panic: {}", e);
                }
            });
        }
        previous(info);
    }));
}

/// Describe a panic as an uncaught exception
pub fn panic_data(info: &PanicHookInfo<'_>) -> ExceptionData {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string());

    let mut data = ExceptionData::new(PANIC_CLASS, message);
    data.uncaught = true;
    if let Some(location) = info.location() {
        data.file = Some(location.file().to_string());
        data.line = Some(location.line());
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        data.stack = backtrace.to_string();
    }

    if let Some(name) = std::thread::current().name() {
        data.context = Some(serde_json::json!({ "thread": name }));
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;
    use debugscope_core::{EntryType, ListOptions};
    use serial_test::serial;
    use std::time::Duration;

    #[tokio::test]
    #[serial]
    async fn test_panic_recorded_and_previous_hook_runs() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let chained = Arc::new(AtomicBool::new(false));
        let flag = chained.clone();
        panic::set_hook(Box::new(move |_| flag.store(true, Ordering::SeqCst)));

        let scope = Scope::new(ScopeConfig::default()).unwrap();
        install_panic_hook(scope.clone());

        let result = std::thread::Builder::new()
            .name("worker-7".into())
            .spawn(|| panic!("index out of range"))
            .unwrap()
            .join();
        assert!(result.is_err());
        assert!(chained.load(Ordering::SeqCst));

        let options = ListOptions::default().with_type(EntryType::Exception);
        let entry = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let page = scope.storage().list(&options).await.unwrap();
                if let Some(entry) = page.data.into_iter().next() {
                    return entry;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Restore the default hook for the rest of the suite
        let _ = panic::take_hook();

        assert_eq!(entry.content["class"], PANIC_CLASS);
        assert_eq!(entry.content["message"], "index out of range");
        assert!(entry.content["file"].as_str().unwrap().ends_with("panic.rs"));
        assert!(entry.tags.contains(&"uncaught".to_string()));
    }
}
