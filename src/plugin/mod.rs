// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The HTTP plugin: a token-gated entrypoint plus every debug route hidden
//! under a random path prefix.

use std::{fmt, sync::Arc};

use axum::{routing::get, Router};
use rand::Rng;

use crate::{
    config::{PluginConfig, DEFAULT_ENTRYPOINT},
    runtime::{
        process::ProcessStats, CpuProfiler, ExecutionTracer, ProfileRegistry, ProfileSet,
        StatsSource, Symbolizer,
    },
    trace::TraceGate,
};

mod handlers;
mod sink;

/// Length of the random path segment, not counting the leading `/`.
pub const PREFIX_LEN: usize = 40;

const PREFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";

fn random_prefix() -> String {
    // rand::rng is a CSPRNG, earlier prefixes do not predict later ones
    let mut rng = rand::rng();
    let mut prefix = String::with_capacity(PREFIX_LEN + 1);
    prefix.push('/');
    prefix.extend(
        (0..PREFIX_LEN).map(|_| PREFIX_CHARSET[rng.random_range(0..PREFIX_CHARSET.len())] as char),
    );
    prefix
}

/// The routes served under the random prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Profile index page.
    Index,
    /// A registered profile, by name.
    NamedProfile,
    /// Process command line.
    Cmdline,
    /// CPU profile capture.
    CpuProfile,
    /// Address to symbol lookup.
    Symbol,
    /// Ungated execution trace.
    PprofTrace,
    /// Memory statistics.
    MemStats,
    /// Collector statistics.
    GcStats,
    /// Gated execution trace.
    TraceControl,
}

impl Endpoint {
    /// Every endpoint, in registration order.
    pub const ALL: [Endpoint; 9] = [
        Endpoint::Index,
        Endpoint::NamedProfile,
        Endpoint::Cmdline,
        Endpoint::CpuProfile,
        Endpoint::Symbol,
        Endpoint::PprofTrace,
        Endpoint::MemStats,
        Endpoint::GcStats,
        Endpoint::TraceControl,
    ];

    /// The path of this endpoint below the prefix.
    pub const fn suffix(self) -> &'static str {
        match self {
            Endpoint::Index => "/debug/pprof/",
            Endpoint::NamedProfile => "/debug/pprof/:name",
            Endpoint::Cmdline => "/debug/pprof/cmdline",
            Endpoint::CpuProfile => "/debug/pprof/profile",
            Endpoint::Symbol => "/debug/pprof/symbol",
            Endpoint::PprofTrace => "/debug/pprof/trace",
            Endpoint::MemStats => "/debug/mem",
            Endpoint::GcStats => "/debug/gc",
            Endpoint::TraceControl => "/debug/trace",
        }
    }
}

/// Every concrete path of one plugin instance.
///
/// Built once; all paths share a prefix that is never regenerated.
#[derive(Clone, PartialEq, Eq)]
pub struct RouteTable {
    entrypoint: String,
    prefix: String,
    paths: [String; 9],
}

impl RouteTable {
    fn new(entrypoint: String, prefix: String) -> Self {
        let paths = Endpoint::ALL.map(|endpoint| format!("{prefix}{}", endpoint.suffix()));
        RouteTable {
            entrypoint,
            prefix,
            paths,
        }
    }

    /// The public, token-gated path.
    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    /// The random prefix, including its leading `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The full path of `endpoint`.
    pub fn path(&self, endpoint: Endpoint) -> &str {
        &self.paths[endpoint as usize]
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the prefix is a secret
        f.debug_struct("RouteTable")
            .field("entrypoint", &self.entrypoint)
            .finish_non_exhaustive()
    }
}

pub(crate) struct PluginState {
    token: String,
    routes: RouteTable,
    stats: Arc<dyn StatsSource>,
    profiles: Arc<dyn ProfileRegistry>,
    tracer: Option<Arc<dyn ExecutionTracer>>,
    gate: Option<TraceGate>,
    cpu_profiler: Option<Arc<dyn CpuProfiler>>,
    symbolizer: Option<Arc<dyn Symbolizer>>,
}

/// Builds a [`Plugin`]. Only the token is required; every runtime facility
/// has a default or is optional.
///
/// Defaults: [`ProcessStats`] for statistics, an empty [`ProfileSet`], and
/// no tracer, CPU profiler or symbolizer (their endpoints then answer 500 or
/// report no symbols).
pub struct PluginBuilder {
    token: String,
    entrypoint: Option<String>,
    stats: Option<Arc<dyn StatsSource>>,
    profiles: Option<Arc<dyn ProfileRegistry>>,
    tracer: Option<Arc<dyn ExecutionTracer>>,
    cpu_profiler: Option<Arc<dyn CpuProfiler>>,
    symbolizer: Option<Arc<dyn Symbolizer>>,
}

impl PluginBuilder {
    /// A builder for a plugin guarded by `token`.
    pub fn new(token: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            token: token.into(),
            entrypoint: None,
            stats: None,
            profiles: None,
            tracer: None,
            cpu_profiler: None,
            symbolizer: None,
        }
    }

    /// Sets the public entrypoint path. Defaults to `/debug/pprof/`.
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> PluginBuilder {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Sets the memory and collector statistics source.
    pub fn with_stats(mut self, stats: impl StatsSource) -> PluginBuilder {
        self.stats = Some(Arc::new(stats));
        self
    }

    /// Sets the named profile registry.
    pub fn with_profiles(mut self, profiles: impl ProfileRegistry) -> PluginBuilder {
        self.profiles = Some(Arc::new(profiles));
        self
    }

    /// Sets the execution tracer.
    pub fn with_tracer(mut self, tracer: Arc<dyn ExecutionTracer>) -> PluginBuilder {
        self.tracer = Some(tracer);
        self
    }

    /// Sets the CPU profiler.
    pub fn with_cpu_profiler(mut self, profiler: Arc<dyn CpuProfiler>) -> PluginBuilder {
        self.cpu_profiler = Some(profiler);
        self
    }

    /// Sets the symbolizer.
    pub fn with_symbolizer(mut self, symbolizer: impl Symbolizer) -> PluginBuilder {
        self.symbolizer = Some(Arc::new(symbolizer));
        self
    }

    /// Generate the prefix and freeze the routes.
    pub fn build(self) -> Plugin {
        let mut entrypoint = self
            .entrypoint
            .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_owned());
        if !entrypoint.starts_with('/') {
            entrypoint.insert(0, '/');
        }
        if self.token.is_empty() {
            tracing::warn!("pprof plugin configured with an empty token");
        }
        let routes = RouteTable::new(entrypoint, random_prefix());
        tracing::info!(
            entrypoint = routes.entrypoint(),
            prefix_len = PREFIX_LEN,
            tracer = self.tracer.is_some(),
            cpu_profiler = self.cpu_profiler.is_some(),
            "pprof plugin created"
        );

        let gate = self.tracer.clone().map(TraceGate::new);
        Plugin {
            state: Arc::new(PluginState {
                token: self.token,
                routes,
                stats: self.stats.unwrap_or_else(|| Arc::new(ProcessStats)),
                profiles: self
                    .profiles
                    .unwrap_or_else(|| Arc::new(ProfileSet::new())),
                tracer: self.tracer,
                gate,
                cpu_profiler: self.cpu_profiler,
                symbolizer: self.symbolizer,
            }),
        }
    }
}

/// Serves runtime profiles, statistics and traces behind a token and a
/// random path prefix.
///
/// Only the entrypoint checks the token; it answers with a redirect to the
/// prefixed index. Everything else is reachable by whoever knows the prefix.
#[derive(Clone)]
pub struct Plugin {
    state: Arc<PluginState>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("routes", &self.state.routes)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// A plugin answering on `entrypoint`, with default runtime facilities.
    pub fn new(entrypoint: impl Into<String>, token: impl Into<String>) -> Plugin {
        PluginBuilder::new(token).with_entrypoint(entrypoint).build()
    }

    /// A plugin answering on `/debug/pprof/`, with default runtime facilities.
    pub fn with_default_entrypoint(token: impl Into<String>) -> Plugin {
        PluginBuilder::new(token).build()
    }

    /// Start configuring a plugin guarded by `token`.
    pub fn builder(token: impl Into<String>) -> PluginBuilder {
        PluginBuilder::new(token)
    }

    /// Start configuring a plugin from deserialized settings.
    pub fn from_config(config: PluginConfig) -> PluginBuilder {
        PluginBuilder::new(config.token).with_entrypoint(config.entrypoint)
    }

    /// The paths this instance serves.
    pub fn routes(&self) -> &RouteTable {
        &self.state.routes
    }

    /// The gate guarding trace-control captures, if a tracer is configured.
    pub fn trace_gate(&self) -> Option<&TraceGate> {
        self.state.gate.as_ref()
    }

    /// A router holding only this plugin's routes.
    pub fn router(&self) -> Router {
        use handlers::*;

        let routes = &self.state.routes;
        Router::new()
            .route(routes.entrypoint(), get(entrypoint))
            .route(routes.path(Endpoint::Index), get(index))
            .route(routes.path(Endpoint::NamedProfile), get(named_profile))
            .route(routes.path(Endpoint::Cmdline), get(cmdline))
            .route(routes.path(Endpoint::CpuProfile), get(cpu_profile))
            .route(routes.path(Endpoint::Symbol), get(symbol).post(symbol))
            .route(routes.path(Endpoint::PprofTrace), get(pprof_trace))
            .route(routes.path(Endpoint::MemStats), get(mem_stats))
            .route(routes.path(Endpoint::GcStats), get(gc_stats))
            .route(routes.path(Endpoint::TraceControl), get(trace_control))
            .with_state(self.state.clone())
    }

    /// Mount the plugin's routes onto `router`.
    ///
    /// Panics, like any axum merge, if `router` already serves the entrypoint.
    pub fn plug(&self, router: Router) -> Router {
        router.merge(self.router())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_shape() {
        let prefix = random_prefix();
        assert_eq!(prefix.len(), PREFIX_LEN + 1);
        assert!(prefix.starts_with('/'));
        assert!(prefix[1..]
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'_'));
    }

    #[test]
    fn test_independent_plugins_get_different_prefixes() {
        let a = Plugin::with_default_entrypoint("token");
        let b = Plugin::with_default_entrypoint("token");
        assert_ne!(a.routes().prefix(), b.routes().prefix());
        assert_eq!(a.routes().prefix().len(), PREFIX_LEN + 1);
        assert_eq!(b.routes().prefix().len(), PREFIX_LEN + 1);
    }

    #[test]
    fn test_route_table_shares_prefix() {
        let plugin = Plugin::new("/secret", "token");
        let routes = plugin.routes();
        assert_eq!(routes.entrypoint(), "/secret");
        for endpoint in Endpoint::ALL {
            let path = routes.path(endpoint);
            assert_eq!(path, format!("{}{}", routes.prefix(), endpoint.suffix()));
        }
        assert_eq!(
            routes.path(Endpoint::Index),
            format!("{}/debug/pprof/", routes.prefix())
        );
        assert_eq!(
            routes.path(Endpoint::TraceControl),
            format!("{}/debug/trace", routes.prefix())
        );
        // cloning the plugin keeps the same routes
        assert_eq!(plugin.clone().routes(), routes);
    }

    #[test]
    fn test_builder_defaults() {
        let plugin = PluginBuilder::new("token").build();
        assert_eq!(plugin.routes().entrypoint(), DEFAULT_ENTRYPOINT);
        assert!(plugin.trace_gate().is_none());

        let plugin = PluginBuilder::new("token").with_entrypoint("debug").build();
        assert_eq!(plugin.routes().entrypoint(), "/debug");
    }

    #[test]
    fn test_debug_hides_prefix() {
        let plugin = Plugin::with_default_entrypoint("token");
        let debug = format!("{plugin:?}");
        assert!(!debug.contains(&plugin.routes().prefix()[1..]));
        assert!(!debug.contains("token"));
    }
}
