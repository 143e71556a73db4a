//! Fault boundary for handler execution
//!
//! Every piece of module code the runtime runs goes through [`guarded`] (when the caller waits
//! for it), [`spawn_supervised`] (fire-and-forget) or [`contained`] (synchronous calls).
//! Errors and panics end here as log lines.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::application::errors::HandlerError;
use crate::domain::entities::HandlerResult;

/// Await a handler future, turning a panic into [`HandlerError::Panicked`]
pub async fn guarded<F>(fut: F) -> HandlerResult
where
    F: Future<Output = HandlerResult>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

/// Run synchronous module code, turning a panic into [`HandlerError::Panicked`]
pub fn contained<T>(f: impl FnOnce() -> T) -> Result<T, HandlerError> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|panic| HandlerError::Panicked(panic_message(panic.as_ref())))
}

/// Run a handler in the background. Failures are logged with `label`, never propagated.
pub fn spawn_supervised<F>(label: impl Into<String>, fut: F) -> JoinHandle<()>
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    let label = label.into();
    tokio::spawn(async move {
        if let Err(e) = guarded(fut).await {
            tracing::warn!("{} failed: {}", label, e);
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        let result = guarded(async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await;

        match result {
            Err(HandlerError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_contained_catches_panic() {
        assert_eq!(contained(|| 7).unwrap(), 7);

        let result: Result<u32, _> = contained(|| panic!("constructor {}", "exploded"));
        match result {
            Err(HandlerError::Panicked(msg)) => assert_eq!(msg, "constructor exploded"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_supervised_survives_failure() {
        let handle = spawn_supervised("test job", async { Err(HandlerError::failed("nope")) });
        assert!(handle.await.is_ok());

        let handle = spawn_supervised("test job", async {
            if true {
                panic!("worse");
            }
            Ok(())
        });
        assert!(handle.await.is_ok());
    }
}
