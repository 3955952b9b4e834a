use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tokio::time::{Instant, sleep};

use crate::{
    error::{CreatorError, Result},
    transport::{HttpRequest, HttpResponse, Transport},
};

/// Handed to the progress callback. Which fields are set depends on the
/// stage of the workflow, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressContext {
    /// Iframe pointing at the live creation page. Only set on the first
    /// callback of the full server side render.
    pub content_iframe: Option<String>,
    /// Only set while polling.
    pub polling_start_time: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Ceiling for the whole polling session, not per request.
    pub timeout: Duration,
    /// Consecutive failed requests tolerated before giving up.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Succeeded,
    Cancelled,
    TimedOut,
    Failed,
}

pub struct PollingEngine<'a, T: Transport + ?Sized> {
    transport: &'a T,
    settings: PollSettings,
    complete_marker: &'a str,
    state: PollState,
}

impl<'a, T: Transport + ?Sized> PollingEngine<'a, T> {
    pub fn new(transport: &'a T, settings: PollSettings, complete_marker: &'a str) -> Self {
        Self {
            transport,
            settings,
            complete_marker,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Requests `make_request()` until the response contains the completion
    /// marker and returns that response body.
    ///
    /// `on_progress` runs once for every response that isn't finished yet.
    /// Returning `true` from it stops polling with
    /// [`CreatorError::PollingCancelled`].
    pub async fn run<R, F>(&mut self, mut make_request: R, mut on_progress: F) -> Result<String>
    where
        R: FnMut() -> HttpRequest,
        F: FnMut(&ProgressContext) -> bool,
    {
        let polling_start_time = SystemTime::now();
        let started = Instant::now();
        let mut failures = 0;
        let mut ticks = 0u32;
        self.state = PollState::Polling;

        loop {
            ticks += 1;
            let resp = self
                .transport
                .send(make_request())
                .await
                .and_then(HttpResponse::error_for_status);

            match resp {
                Ok(resp) if resp.body.contains(self.complete_marker) => {
                    info!("Images ready after {ticks} polls ({:?})", started.elapsed());
                    self.state = PollState::Succeeded;
                    return Ok(resp.body);
                }
                Ok(_) => {
                    failures = 0;
                    debug!("Still processing, poll #{ticks}");
                    let ctx = ProgressContext {
                        content_iframe: None,
                        polling_start_time: Some(polling_start_time),
                    };
                    if on_progress(&ctx) {
                        info!("Polling cancelled after {ticks} polls");
                        self.state = PollState::Cancelled;
                        return Err(CreatorError::PollingCancelled);
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.settings.max_retries {
                        self.state = PollState::Failed;
                        return Err(CreatorError::PollingTransport {
                            attempts: failures,
                            source: e,
                        });
                    }
                    warn!(
                        "Poll #{ticks} failed ({failures}/{}): {e}",
                        self.settings.max_retries
                    );
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.timeout {
                info!("Polling timed out after {elapsed:?}");
                self.state = PollState::TimedOut;
                return Err(CreatorError::PollingTimedOut { elapsed });
            }

            sleep(self.settings.interval).await;
        }
    }
}

#[cfg(test)]
mod test {
    use crate::transport::fake::FakeTransport;

    use super::*;

    const DONE: &str = r#"<div id="gir_async"><img class="mimg" src="https://th.bing.com/a"></div>"#;

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
            max_retries: 2,
        }
    }

    fn req() -> HttpRequest {
        HttpRequest::get("https://www.bing.com/images/create/async/results/1")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_progress_calls() {
        let transport = FakeTransport::new().ok(200, "").ok(200, "").ok(200, DONE);
        let mut engine = PollingEngine::new(&transport, settings(), "gir_async");
        let mut calls = vec![];

        let html = engine
            .run(req, |ctx| {
                calls.push(ctx.clone());
                false
            })
            .await
            .unwrap();

        assert_eq!(html, DONE);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.polling_start_time.is_some()));
        assert!(calls.iter().all(|c| c.content_iframe.is_none()));
        assert_eq!(engine.state(), PollState::Succeeded);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_stops_after_one_tick() {
        let transport = FakeTransport::new().ok(200, "").ok(200, DONE);
        let mut engine = PollingEngine::new(&transport, settings(), "gir_async");

        let err = engine.run(req, |_| true).await.unwrap_err();

        assert!(matches!(err, CreatorError::PollingCancelled));
        assert_eq!(engine.state(), PollState::Cancelled);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_complete() {
        let transport = FakeTransport::new();
        let mut engine = PollingEngine::new(&transport, settings(), "gir_async");
        let started = Instant::now();

        let err = engine.run(req, |_| false).await.unwrap_err();

        let CreatorError::PollingTimedOut { elapsed } = err else {
            panic!("expected a timeout");
        };
        assert!(elapsed >= Duration::from_secs(10));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(engine.state(), PollState::TimedOut);
        // ticks at 0, 3, 6, 9 and 12 seconds
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let transport = FakeTransport::new()
            .fail()
            .fail()
            .ok(200, "")
            .ok(503, "busy")
            .fail()
            .ok(200, DONE);
        let mut engine = PollingEngine::new(
            &transport,
            PollSettings {
                timeout: Duration::from_secs(60),
                ..settings()
            },
            "gir_async",
        );
        let mut calls = 0;

        let html = engine
            .run(req, |_| {
                calls += 1;
                false
            })
            .await
            .unwrap();

        assert_eq!(html, DONE);
        assert_eq!(calls, 1);
        assert_eq!(transport.request_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_consecutive_failures_fail() {
        let transport = FakeTransport::new().fail().fail().fail().ok(200, DONE);
        let mut engine = PollingEngine::new(&transport, settings(), "gir_async");

        let err = engine.run(req, |_| false).await.unwrap_err();

        assert!(matches!(
            err,
            CreatorError::PollingTransport { attempts: 3, .. }
        ));
        assert_eq!(engine.state(), PollState::Failed);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn new_engine_is_idle() {
        let transport = FakeTransport::new();
        let engine = PollingEngine::new(&transport, settings(), "gir_async");
        assert_eq!(engine.state(), PollState::Idle);
    }
}
