// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Errors answered to HTTP clients.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Header marking error responses produced by this crate.
pub const ERROR_MARKER_HEADER: &str = "x-pprof";

/// A request the plugin turned down. Each variant maps to one status code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Missing or wrong entrypoint token.
    #[error("Unauthorized")]
    Unauthorized,
    /// No profile registered under the requested name.
    #[error("Unknown profile")]
    UnknownProfile,
    /// The trace gate is held or the tracer is already recording.
    #[error("Tracing is already active")]
    TraceBusy,
    /// The tracer refused to start.
    #[error("Could not enable tracing: {0}")]
    TraceStart(#[source] RuntimeError),
    /// The CPU profiler refused to start.
    #[error("Could not enable CPU profiling: {0}")]
    CpuProfileStart(#[source] RuntimeError),
}

impl PluginError {
    /// The HTTP status this error is answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PluginError::Unauthorized => StatusCode::UNAUTHORIZED,
            PluginError::UnknownProfile => StatusCode::NOT_FOUND,
            PluginError::TraceBusy => StatusCode::BAD_REQUEST,
            PluginError::TraceStart(_) | PluginError::CpuProfileStart(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<crate::trace::GateBusy> for PluginError {
    fn from(_: crate::trace::GateBusy) -> Self {
        PluginError::TraceBusy
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, format!("{self}\n")).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(ERROR_MARKER_HEADER, HeaderValue::from_static("1"));
        headers.remove(header::CONTENT_DISPOSITION);
        response
    }
}
