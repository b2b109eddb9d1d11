//! Registered provider state.
//!
//! A [`ProviderEntry`] wraps one provider together with the descriptor built
//! at registration and the outcome of the most recent cycle.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::provider::traits::{CycleContext, Phase, Provider, ProviderError, StatsOutput};
use crate::scheduler::clock::to_delta;

/// One-time startup stage of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InitStage {
    AsyncInit,
    InitFetch,
}

/// Fatal startup failure of a provider.
#[derive(Debug, Error)]
#[error("provider '{provider}' failed during {stage}: {source}")]
pub struct InitError {
    pub provider: String,
    pub stage: InitStage,
    pub source: ProviderError,
}

/// Capabilities and timing of a provider, fixed at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Continuous: poll phase runs before the push.
    pub has_poll: bool,
    pub has_init_fetch: bool,
    pub has_async_init: bool,
    /// Lead before `target_time` reserved for the push call.
    pub time_needed: Duration,
}

/// Per-phase errors of one cycle.
pub type PhaseErrors = BTreeMap<Phase, ProviderError>;

/// A registered provider plus its last-cycle outcome.
pub struct ProviderEntry {
    provider: Box<dyn Provider>,
    descriptor: ProviderDescriptor,
    result: Option<StatsOutput>,
    errors: PhaseErrors,
    in_flight: Option<Phase>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("descriptor", &self.descriptor)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl ProviderEntry {
    /// Register a provider, reading its capabilities once.
    pub fn register(provider: Box<dyn Provider>) -> Self {
        let caps = provider.capabilities();
        let descriptor = ProviderDescriptor {
            name: provider.name().to_string(),
            has_poll: caps.poll,
            has_init_fetch: caps.init_fetch,
            has_async_init: caps.async_init,
            time_needed: provider.time_needed(),
        };
        Self {
            provider,
            descriptor,
            result: None,
            errors: PhaseErrors::new(),
            in_flight: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Output of the last push phase, if it completed.
    pub fn result(&self) -> Option<&StatsOutput> {
        self.result.as_ref()
    }

    pub fn errors(&self) -> &PhaseErrors {
        &self.errors
    }

    pub(crate) fn take_result(&mut self) -> Option<StatsOutput> {
        self.result.take()
    }

    /// Run `async_init` then `init_fetch`, as declared.
    pub async fn initialise(&mut self, ctx: &CycleContext) -> Result<(), InitError> {
        if self.descriptor.has_async_init {
            tracing::debug!(provider = %self.descriptor.name, "Running async_init");
            let outcome = guarded(self.provider.async_init(ctx)).await;
            self.init_result(InitStage::AsyncInit, outcome)?;
        }
        if self.descriptor.has_init_fetch {
            tracing::debug!(provider = %self.descriptor.name, "Running init_fetch");
            let outcome = guarded(self.provider.init_fetch(ctx)).await;
            self.init_result(InitStage::InitFetch, outcome)?;
        }
        Ok(())
    }

    fn init_result(
        &self,
        stage: InitStage,
        outcome: Result<(), ProviderError>,
    ) -> Result<(), InitError> {
        outcome.map_err(|source| InitError {
            provider: self.descriptor.name.clone(),
            stage,
            source,
        })
    }

    /// Clear the previous cycle's outcome.
    pub(crate) fn reset(&mut self) {
        self.result = None;
        self.errors.clear();
        self.in_flight = None;
    }

    /// Run this entry's share of one cycle: poll (if continuous), wait for the
    /// push point, push. Errors are recorded on the entry, never returned.
    pub(crate) async fn run_cycle(&mut self, ctx: &CycleContext) {
        if self.descriptor.has_poll {
            self.in_flight = Some(Phase::Poll);
            if let Err(e) = guarded(self.provider.poll_stats(ctx)).await {
                self.errors.insert(Phase::Poll, e);
            }
        }

        self.in_flight = Some(Phase::Push);
        let push_at = ctx.target_time() - to_delta(self.descriptor.time_needed);
        ctx.sleep_until(push_at).await;

        match guarded(self.provider.get_stats(ctx)).await {
            Ok(output) => self.result = Some(output),
            Err(e) => {
                self.errors.insert(Phase::Push, e);
            }
        }
        self.in_flight = None;
    }

    /// Record a cancellation for whatever phase was still running.
    ///
    /// Returns `true` if the entry had not finished.
    pub(crate) fn mark_cancelled(&mut self) -> bool {
        match self.in_flight.take() {
            Some(phase) => {
                self.errors.insert(phase, ProviderError::Cancelled);
                true
            }
            None => false,
        }
    }
}

/// Await a provider future, turning a panic into a [`ProviderError`].
async fn guarded<T, F>(fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ProviderError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::traits::Capabilities;
    use crate::scheduler::clock::Clock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct Scripted {
        caps: Capabilities,
        fail_init_fetch: bool,
        panic_in_push: bool,
    }

    #[async_trait::async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        fn time_needed(&self) -> Duration {
            Duration::from_millis(500)
        }

        async fn init_fetch(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
            if self.fail_init_fetch {
                return Err(ProviderError::failed("no baseline"));
            }
            Ok(())
        }

        async fn poll_stats(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
            Err(ProviderError::failed("poll broke"))
        }

        async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
            if self.panic_in_push {
                panic!("sensor exploded");
            }
            StatsOutput::try_from(json!({"measurement": "scripted", "ok": true}))
        }
    }

    fn ctx() -> CycleContext {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        CycleContext::new(
            start + chrono::TimeDelta::seconds(1),
            Duration::from_secs(1),
            Clock::starting_at(start),
        )
    }

    #[test]
    fn test_descriptor_built_at_registration() {
        let entry = ProviderEntry::register(Box::new(Scripted {
            caps: Capabilities::default().with_poll(),
            fail_init_fetch: false,
            panic_in_push: false,
        }));
        let d = entry.descriptor();
        assert_eq!(d.name, "scripted");
        assert!(d.has_poll);
        assert!(!d.has_init_fetch);
        assert_eq!(d.time_needed, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_fetch_failure_is_fatal() {
        let mut entry = ProviderEntry::register(Box::new(Scripted {
            caps: Capabilities::default().with_init_fetch(),
            fail_init_fetch: true,
            panic_in_push: false,
        }));
        let err = entry.initialise(&ctx()).await.unwrap_err();
        assert_eq!(err.stage, InitStage::InitFetch);
        assert!(err.to_string().contains("init_fetch"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeclared_hooks_are_not_called() {
        // init_fetch would fail, but the capability is not declared
        let mut entry = ProviderEntry::register(Box::new(Scripted {
            caps: Capabilities::default(),
            fail_init_fetch: true,
            panic_in_push: false,
        }));
        entry.initialise(&ctx()).await.unwrap();

        entry.run_cycle(&ctx()).await;
        assert!(entry.errors().is_empty());
        assert!(entry.result().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_does_not_skip_push() {
        let mut entry = ProviderEntry::register(Box::new(Scripted {
            caps: Capabilities::default().with_poll(),
            fail_init_fetch: false,
            panic_in_push: false,
        }));
        entry.run_cycle(&ctx()).await;

        assert!(entry.errors().contains_key(&Phase::Poll));
        assert!(!entry.errors().contains_key(&Phase::Push));
        assert!(entry.result().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_panic_is_recorded() {
        let mut entry = ProviderEntry::register(Box::new(Scripted {
            caps: Capabilities::default(),
            fail_init_fetch: false,
            panic_in_push: true,
        }));
        entry.run_cycle(&ctx()).await;

        match entry.errors().get(&Phase::Push) {
            Some(ProviderError::Panicked(msg)) => assert!(msg.contains("sensor exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(entry.result().is_none());

        entry.reset();
        assert!(entry.errors().is_empty());
    }
}
