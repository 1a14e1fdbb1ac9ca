//! Ending the active session on every exit path.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use lucid_core::records::{SessionOptions, SessionUpdate};
use lucid_core::LucidError;
use lucid_store::SessionController;

use crate::facade::{Lucid, WeakLucid};

/// Exit status after a signal-triggered finalize (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// SIGINT/SIGTERM (ctrl-c elsewhere) as a stream. Once the listeners are
/// registered the default disposition is gone for the rest of the process,
/// so whoever holds this stream decides what an interrupt does. If
/// registration fails the stream never yields.
pub fn interrupts() -> BoxStream<'static, ()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => stream::unfold((term, int), |(mut term, mut int)| async move {
                tokio::select! {
                    _ = term.recv() => info!("received SIGTERM"),
                    _ = int.recv() => info!("received SIGINT"),
                }
                Some(((), (term, int)))
            })
            .boxed(),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "could not register signal handlers");
                stream::pending().boxed()
            }
        }
    }

    #[cfg(not(unix))]
    {
        stream::unfold((), |()| async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received ctrl-c");
                    Some(((), ()))
                }
                Err(e) => {
                    error!(error = %e, "could not listen for ctrl-c");
                    None
                }
            }
        })
        .chain(stream::pending())
        .boxed()
    }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let mut signals = interrupts();
    if signals.next().await.is_none() {
        std::future::pending::<()>().await;
    }
}

/// Background signal listener. Disarming or dropping it stops the
/// finalizer from running on an interrupt; the next interrupt still exits
/// the process with [`EXIT_INTERRUPTED`].
pub struct SignalGuard {
    disarmed: CancellationToken,
    _task: JoinHandle<()>,
}

impl SignalGuard {
    pub fn disarm(&self) {
        self.disarmed.cancel();
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.disarmed.cancel();
    }
}

/// On SIGINT/SIGTERM, finalize `lucid` and exit with [`EXIT_INTERRUPTED`].
/// The listener only holds a weak reference to the client.
pub fn install_signal_handler(lucid: &Lucid) -> SignalGuard {
    let weak = lucid.downgrade();
    let disarmed = CancellationToken::new();
    let token = disarmed.clone();

    let task = tokio::spawn(async move {
        await_interrupt(weak, token, interrupts()).await;
        std::process::exit(EXIT_INTERRUPTED);
    });

    SignalGuard {
        disarmed,
        _task: task,
    }
}

/// Returns once an interrupt should terminate the process. While armed the
/// first interrupt finalizes the client first; interrupts arriving during
/// the finalizer are held back. After `disarmed` fires, the next interrupt
/// returns straight away.
async fn await_interrupt<S>(weak: WeakLucid, disarmed: CancellationToken, mut signals: S)
where
    S: Stream<Item = ()> + Unpin,
{
    tokio::select! {
        _ = disarmed.cancelled() => {
            debug!("signal handler disarmed; interrupts exit without finalizing");
        }
        received = signals.next() => {
            if received.is_none() {
                return std::future::pending().await;
            }
            if let Some(lucid) = weak.upgrade() {
                lucid.finalize().await;
            }
            return;
        }
    }
    if signals.next().await.is_none() {
        std::future::pending::<()>().await;
    }
}

/// Open a session, run `body` against it and end the session afterwards.
/// If a shutdown signal arrives first, `body` is dropped, the client is
/// finalized and `Interrupted` is returned.
pub async fn run_session<T, F, Fut>(
    lucid: &Lucid,
    options: SessionOptions,
    body: F,
) -> Result<T, LucidError>
where
    F: FnOnce(Arc<SessionController>) -> Fut,
    Fut: Future<Output = Result<T, LucidError>>,
{
    run_session_until(lucid, options, body, shutdown_signal()).await
}

/// [`run_session`] with a caller-supplied interrupt.
pub async fn run_session_until<T, F, Fut, I>(
    lucid: &Lucid,
    options: SessionOptions,
    body: F,
    interrupt: I,
) -> Result<T, LucidError>
where
    F: FnOnce(Arc<SessionController>) -> Fut,
    Fut: Future<Output = Result<T, LucidError>>,
    I: Future<Output = ()>,
{
    let session = lucid.create_session(options).await?;

    let outcome = tokio::select! {
        result = body(session) => Some(result),
        _ = interrupt => None,
    };

    let Some(result) = outcome else {
        lucid.finalize().await;
        return Err(LucidError::Interrupted);
    };

    let update = match &result {
        Ok(_) => SessionUpdate::default(),
        Err(e) => SessionUpdate::outcome(None, None, Some(false), Some(e.to_string())),
    };
    lucid.end_session(&update).await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests::{connect, quiet_config};
    use lucid_client::{BackendCall, MockBackend};
    use lucid_core::records::StepUpdate;
    use std::time::Duration;

    #[tokio::test]
    async fn body_result_is_returned_and_session_ended() {
        let mock = Arc::new(MockBackend::new());
        let lucid = connect(&mock, quiet_config()).await;

        let value = run_session_until(
            &lucid,
            SessionOptions::named("scoped"),
            |session| async move {
                session.create_step(&StepUpdate::goal("work")).await?;
                Ok::<_, LucidError>(42)
            },
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert!(!lucid.has_session());
        assert_eq!(mock.count(|c| matches!(c, BackendCall::EndSession(_))), 1);
    }

    #[tokio::test]
    async fn body_error_marks_session_unsuccessful() {
        let mock = Arc::new(MockBackend::new());
        let lucid = connect(&mock, quiet_config()).await;
        let mut session_id = None;

        let err = run_session_until(
            &lucid,
            SessionOptions::named("failing"),
            |session| {
                session_id = Some(session.id().clone());
                async move {
                    // ending a step that was never created is a contract error
                    session.end_step(&StepUpdate::default()).await?;
                    Ok::<_, LucidError>(())
                }
            },
            std::future::pending(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LucidError::InvalidOperation(_)));

        let record = mock.session(&session_id.unwrap()).unwrap();
        assert!(record.is_finished);
        assert_eq!(record.is_successful, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_finalizes_and_reports() {
        let mock = Arc::new(MockBackend::new());
        let lucid = connect(&mock, quiet_config()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = run_session_until(
            &lucid,
            SessionOptions::named("long"),
            |_session| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, LucidError>(())
            },
            cancel.cancelled(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LucidError::Interrupted));
        assert!(lucid.is_finalized());
        assert!(!lucid.has_session());
        assert_eq!(mock.count(|c| matches!(c, BackendCall::EndSession(_))), 1);

        // the finalizer does not run twice
        assert!(lucid.finalize().await.is_none());
    }

    fn listener(lucid: &Lucid) -> (
        CancellationToken,
        futures::channel::mpsc::UnboundedSender<()>,
        JoinHandle<()>,
    ) {
        let disarmed = CancellationToken::new();
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let task = tokio::spawn(await_interrupt(lucid.downgrade(), disarmed.clone(), rx));
        (disarmed, tx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn armed_listener_finalizes_on_interrupt() {
        let mock = Arc::new(MockBackend::new());
        let lucid = connect(&mock, quiet_config()).await;
        lucid.create_session(SessionOptions::named("s")).await.unwrap();
        let (_disarmed, tx, mut task) = listener(&lucid);

        assert!(tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err());
        tx.unbounded_send(()).unwrap();
        task.await.unwrap();

        assert!(lucid.is_finalized());
        assert!(!lucid.has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_listener_still_returns_on_interrupt() {
        let mock = Arc::new(MockBackend::new());
        let lucid = connect(&mock, quiet_config()).await;
        lucid.create_session(SessionOptions::named("s")).await.unwrap();
        let (disarmed, tx, mut task) = listener(&lucid);

        disarmed.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err());
        tx.unbounded_send(()).unwrap();
        task.await.unwrap();

        // the finalizer is not run again once disarmed
        assert!(!lucid.is_finalized());
        assert!(lucid.has_session());
    }
}
