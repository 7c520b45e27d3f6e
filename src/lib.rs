// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## pprof plugin
//! An HTTP plugin that exposes a process's runtime profiles, memory and
//! collector statistics, and execution traces behind a token-gated entrypoint.
//!
//! ### How access works
//!
//! The plugin registers one public path, the *entrypoint* (`/debug/pprof/` by
//! default). A request to it carrying the right `token` query parameter is
//! redirected (301) to the profile index, which lives under a random
//! 40-character path prefix generated when the plugin is built. Every other
//! route is only reachable under that prefix:
//!
//! | path under the prefix      | serves                                     |
//! |----------------------------|--------------------------------------------|
//! | `/debug/pprof/`            | index of registered profiles               |
//! | `/debug/pprof/{name}`      | a named profile (`?debug=N` for text)      |
//! | `/debug/pprof/cmdline`     | the process command line                   |
//! | `/debug/pprof/profile`     | a CPU profile (`?seconds=N`)               |
//! | `/debug/pprof/symbol`      | address to symbol lookups                  |
//! | `/debug/pprof/trace`       | an execution trace (`?seconds=N`)          |
//! | `/debug/mem`               | memory statistics (`?json=1` for JSON)     |
//! | `/debug/gc`                | collector statistics (`?json=1` for JSON)  |
//! | `/debug/trace`             | an exclusive execution trace (`?dur=5s`)   |
//!
//! Only one `/debug/trace` capture runs at a time; a concurrent request is
//! turned away with 400.
//!
//! ### Usage
//!
//! Mount the plugin on an existing [axum] router:
//!
//! ```
//! use pprof_plugin::Plugin;
//!
//! let plugin = Plugin::with_default_entrypoint("s3cret");
//! let app = plugin.plug(axum::Router::new());
//! # drop(app);
//! ```
//!
//! The runtime facilities behind the routes are pluggable; see
//! [`runtime`] for the traits and [`PluginBuilder`] for wiring them. Hosts
//! without an HTTP server can use [`server::DebugServer`].
//!
//! #### Sample program
//!
//! ```notrust
//! RUST_LOG=debug cargo run --example serve -- --listen 127.0.0.1:6060 --token s3cret
//! ```

pub mod config;
pub mod error;
pub mod plugin;
pub mod runtime;
pub mod server;
pub mod stats;
pub mod trace;

pub use error::PluginError;
pub use plugin::{Plugin, PluginBuilder};
