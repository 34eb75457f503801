//! # Query Definitions
//!
//! A [`Query`] describes one kind of backend fetch: how its Args are keyed,
//! when they are ill-formed, what "same scope" means, how to reduce them
//! against history, how to split them into physical requests, and how to
//! merge responses and fold them into the cache.
//!
//! The engine supplies the control flow; the query supplies the policy.
//!
//! ```text
//! should_skip ─► id ─► in_scope ─► transform_args ─► prepare_request_config
//!                                                          │
//!        update_state ◄── transform_result ◄── (transport | custom_query)
//! ```

use std::fmt::Debug;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::transport::RequestConfig;
use crate::types::{History, HistoryEntry, RequestKey};

/// The per-query policy hooks.
///
/// Only [`id`](Query::id), [`should_skip`](Query::should_skip),
/// [`in_scope`](Query::in_scope), [`transform_args`](Query::transform_args),
/// [`transform_result`](Query::transform_result) and
/// [`update_state`](Query::update_state) are required.
pub trait Query: Send + Sync + 'static {
    /// Logical parameters of one demand.
    type Args: Clone + PartialEq + Debug + Serialize + Send + Sync + 'static;

    /// Shape of one raw physical response.
    type Response: DeserializeOwned + Send + 'static;

    /// Merged result of one logical demand.
    type Output: Clone + Send + Sync + 'static;

    /// The cache this query populates.
    type Cache: Default + Send + 'static;

    /// Name used in logs and on the event bus.
    fn name(&self) -> &str;

    /// Canonical key of `args`. Must be insensitive to element order.
    fn id(&self, args: &Self::Args) -> RequestKey;

    /// Returns true if `args` is empty or ill-formed; such demands are never
    /// dispatched and never recorded.
    fn should_skip(&self, args: &Self::Args) -> bool;

    /// Returns true if a prior request for `prior` shares `args`' scope, so
    /// that what it requested counts toward `args`.
    fn in_scope(&self, args: &Self::Args, prior: &Self::Args) -> bool;

    /// Reduces `args` to the portion not already covered by `entries`.
    ///
    /// `entries` are the non-rejected entries of *other* keys that passed
    /// [`in_scope`](Query::in_scope).
    fn transform_args(
        &self,
        args: &Self::Args,
        history: &History<Self::Args>,
        key: &RequestKey,
        entries: &[&HistoryEntry<Self::Args>],
    ) -> Self::Args;

    /// Splits reduced Args into physical request configs.
    ///
    /// The default issues a single request carrying `args` as the body.
    fn prepare_request_config(
        &self,
        args: &Self::Args,
        base: &RequestConfig,
        entries: &[&HistoryEntry<Self::Args>],
    ) -> Result<Vec<RequestConfig>> {
        let _ = entries;
        Ok(vec![base.with_data(serde_json::to_value(args)?)])
    }

    /// A local alternative to the transport.
    ///
    /// When this returns `Some`, no transport request is issued and the
    /// future's response is passed to [`transform_result`](Query::transform_result)
    /// as the only element. The future is created under the engine lock and
    /// awaited after it is released, so it owns whatever it needs.
    fn custom_query(&self, args: &Self::Args) -> Option<BoxFuture<'static, Result<Self::Response>>> {
        let _ = args;
        None
    }

    /// Merges the responses of all physical requests.
    ///
    /// Responses arrive in config order, but the merge must not depend on
    /// that order beyond keeping chunks distinct.
    fn transform_result(&self, args: &Self::Args, responses: Vec<Self::Response>) -> Self::Output;

    /// Folds a successful result into the cache.
    ///
    /// New data for a key replaces old data for that key; unrelated keys are
    /// left alone.
    fn update_state(&self, args: &Self::Args, output: &Self::Output, cache: &mut Self::Cache);
}
