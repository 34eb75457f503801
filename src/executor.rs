//! # Fan-out / Fan-in Execution
//!
//! One logical demand becomes one or more physical requests. They are issued
//! concurrently and joined; the first failure fails the whole operation.
//!
//! ```text
//!              ┌── send(config[0]) ──┐
//! reduced ─────┼── send(config[1]) ──┼──► decode each ──► transform_result
//!              └── send(config[n]) ──┘
//!                  (try_join_all: first error wins, rest are dropped)
//! ```
//!
//! Partial successes are discarded rather than merged, so a failed demand
//! leaves the cache exactly as it was.

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::query::Query;
use crate::transport::{RequestConfig, Transport};

/// How a demand will be executed, decided before the engine releases its
/// lock.
pub enum Dispatch<'a, R> {
    /// Run the query's custom function instead of the transport.
    Custom(BoxFuture<'a, Result<R>>),
    /// Issue `configs` through `transport` in parallel.
    Transport {
        /// The injected client.
        transport: Arc<dyn Transport>,
        /// One config per physical request; never empty.
        configs: Vec<RequestConfig>,
    },
}

impl<R> Dispatch<'_, R> {
    /// Number of physical requests this dispatch issues.
    pub fn request_count(&self) -> usize {
        match self {
            Dispatch::Custom(_) => 1,
            Dispatch::Transport { configs, .. } => configs.len(),
        }
    }
}

/// Executes a dispatch and merges the responses.
pub async fn execute<Q: Query>(
    query: &Q,
    args: &Q::Args,
    dispatch: Dispatch<'_, Q::Response>,
) -> Result<Q::Output> {
    let responses = match dispatch {
        Dispatch::Custom(future) => vec![future.await?],
        Dispatch::Transport { transport, configs } => {
            debug!(query = query.name(), requests = configs.len(), "fanning out");
            fan_out::<Q>(transport.as_ref(), configs).await?
        }
    };

    Ok(query.transform_result(args, responses))
}

async fn fan_out<Q: Query>(
    transport: &dyn Transport,
    configs: Vec<RequestConfig>,
) -> Result<Vec<Q::Response>> {
    let values = try_join_all(configs.into_iter().map(|config| transport.send(config)))
        .await
        .map_err(|err| {
            warn!(error = %err, "physical request failed");
            Error::from(err)
        })?;

    values
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};

    use crate::transport::TransportError;
    use crate::types::{History, HistoryEntry, RequestKey};

    struct Sum;

    impl Query for Sum {
        type Args = Vec<u32>;
        type Response = u32;
        type Output = u32;
        type Cache = u32;

        fn name(&self) -> &str {
            "sum"
        }
        fn id(&self, args: &Self::Args) -> RequestKey {
            RequestKey::new(format!("{:?}", args))
        }
        fn should_skip(&self, args: &Self::Args) -> bool {
            args.is_empty()
        }
        fn in_scope(&self, _: &Self::Args, _: &Self::Args) -> bool {
            true
        }
        fn transform_args(
            &self,
            args: &Self::Args,
            _: &History<Self::Args>,
            _: &RequestKey,
            _: &[&HistoryEntry<Self::Args>],
        ) -> Self::Args {
            args.clone()
        }
        fn transform_result(&self, _: &Self::Args, responses: Vec<u32>) -> u32 {
            responses.into_iter().sum()
        }
        fn update_state(&self, _: &Self::Args, output: &u32, cache: &mut u32) {
            *cache = *output;
        }
    }

    /// Echoes the `n` field of the body; fails when `n` is 0.
    #[derive(Default)]
    struct EchoTransport {
        calls: AtomicUsize,
    }

    impl Transport for EchoTransport {
        fn send(&self, config: RequestConfig) -> BoxFuture<'_, std::result::Result<Value, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let n = config
                    .data
                    .as_ref()
                    .and_then(|d| d["n"].as_u64())
                    .unwrap_or(0);
                if n == 0 {
                    Err(TransportError::with_status(500, "zero"))
                } else {
                    Ok(json!(n))
                }
            })
        }
    }

    fn configs(ns: &[u64]) -> Vec<RequestConfig> {
        let base = RequestConfig::new("http://h", "sum");
        ns.iter().map(|n| base.with_data(json!({ "n": n }))).collect()
    }

    #[tokio::test]
    async fn test_fan_out_merges_all_responses() {
        let transport = Arc::new(EchoTransport::default());
        let dispatch = Dispatch::Transport {
            transport: transport.clone(),
            configs: configs(&[1, 2, 3]),
        };
        assert_eq!(dispatch.request_count(), 3);

        let out = execute(&Sum, &vec![1], dispatch).await.unwrap();
        assert_eq!(out, 6);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_any_failure_fails_whole_operation() {
        let transport = Arc::new(EchoTransport::default());
        let dispatch = Dispatch::Transport {
            transport,
            configs: configs(&[1, 0, 3]),
        };
        let err = execute(&Sum, &vec![1], dispatch).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref t) if t.status == Some(500)));
    }

    #[tokio::test]
    async fn test_custom_dispatch_skips_transport() {
        let dispatch: Dispatch<'_, u32> = Dispatch::Custom(Box::pin(async { Ok(41) }));
        assert_eq!(execute(&Sum, &vec![1], dispatch).await.unwrap(), 41);
    }

    #[tokio::test]
    async fn test_undecodable_response_is_decode_error() {
        struct Garbage;
        impl Transport for Garbage {
            fn send(&self, _: RequestConfig) -> BoxFuture<'_, std::result::Result<Value, TransportError>> {
                Box::pin(async { Ok(json!("not a number")) })
            }
        }
        let dispatch = Dispatch::Transport {
            transport: Arc::new(Garbage),
            configs: configs(&[1]),
        };
        let err = execute(&Sum, &vec![1], dispatch).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
