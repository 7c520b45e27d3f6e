// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, fmt::Write as _, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};

use super::{sink::streaming_body, Endpoint, PluginState};
use crate::{
    error::PluginError,
    runtime::{run_blocking, RuntimeError},
    stats::{gc_stats_json, gc_stats_text, mem_stats_json, mem_stats_text, wants_json},
    trace::{parse_seconds, parse_trace_duration, run_capture},
};

type AppState = State<Arc<PluginState>>;
type Params = Query<HashMap<String, String>>;

const CPU_PROFILE_DEFAULT: Duration = Duration::from_secs(30);
const PPROF_TRACE_DEFAULT: Duration = Duration::from_secs(1);

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";
const NOSNIFF: &str = "nosniff";

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

fn download_headers(filename: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static(NOSNIFF));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    match HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        Ok(disposition) => {
            headers.insert(header::CONTENT_DISPOSITION, disposition);
        }
        Err(err) => tracing::debug!(?err, "profile name is not a valid header value"),
    }
    headers
}

fn text_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static(NOSNIFF));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers
}

pub(crate) async fn entrypoint(State(state): AppState, Query(params): Params) -> Response {
    if param(&params, "token") != Some(state.token.as_str()) {
        tracing::warn!("rejected pprof entrypoint request with a bad token");
        return PluginError::Unauthorized.into_response();
    }
    tracing::debug!("pprof entrypoint token accepted");
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, state.routes.path(Endpoint::Index).to_owned())],
    )
        .into_response()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) async fn index(State(state): AppState) -> Response {
    let mut page = String::from(
        "<html>\n<head>\n<title>/debug/pprof/</title>\n</head>\n<body>\n\
         /debug/pprof/\n<br>\n<p>Set debug=1 as a query parameter to export in legacy text format</p>\n\
         <br>\nTypes of profiles available:\n<table>\n<thead><td>Count</td><td>Profile</td></thead>\n",
    );
    for profile in state.profiles.profiles() {
        let name = escape_html(profile.name());
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td><a href=\"{name}?debug=1\">{name}</a></td></tr>",
            profile.count()
        );
    }
    page.push_str(
        "<tr><td></td><td><a href=\"cmdline\">cmdline</a></td></tr>\n\
         <tr><td></td><td><a href=\"profile\">profile</a></td></tr>\n\
         <tr><td></td><td><a href=\"symbol\">symbol</a></td></tr>\n\
         <tr><td></td><td><a href=\"trace\">trace</a></td></tr>\n\
         </table>\n</body>\n</html>\n",
    );
    (
        [(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static(NOSNIFF))],
        Html(page),
    )
        .into_response()
}

pub(crate) async fn named_profile(
    State(state): AppState,
    Path(name): Path<String>,
    Query(params): Params,
) -> Result<Response, PluginError> {
    let Some(profile) = state.profiles.lookup(&name) else {
        tracing::debug!(name, "unknown profile requested");
        return Err(PluginError::UnknownProfile);
    };
    let debug = param(&params, "debug")
        .and_then(|d| d.parse::<i32>().ok())
        .unwrap_or(0);
    let headers = if debug != 0 {
        text_headers()
    } else {
        download_headers(&name)
    };

    let (mut sink, body) = streaming_body();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = profile.write_to(&mut sink, debug) {
            tracing::warn!(name, ?err, "unable to write profile");
        }
    });
    Ok((headers, body).into_response())
}

pub(crate) async fn cmdline() -> Response {
    let args: Vec<String> = std::env::args().collect();
    (text_headers(), args.join("\0")).into_response()
}

pub(crate) async fn cpu_profile(
    State(state): AppState,
    Query(params): Params,
) -> Result<Response, PluginError> {
    let Some(profiler) = state.cpu_profiler.clone() else {
        return Err(PluginError::CpuProfileStart(RuntimeError::Unavailable(
            "CPU profiler",
        )));
    };
    let duration = parse_seconds(param(&params, "seconds"), CPU_PROFILE_DEFAULT);

    let (sink, body) = streaming_body();
    let starting = profiler.clone();
    run_blocking(move || starting.start(sink.boxed()))
        .await
        .map_err(PluginError::CpuProfileStart)?;
    tokio::spawn(run_capture("cpu profile", duration, move || profiler.stop()));
    Ok((download_headers("profile"), body).into_response())
}

/// An address in `0x` prefixed hex or decimal.
fn parse_address(word: &str) -> Option<u64> {
    let word = word.trim();
    match word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => word.parse().ok(),
    }
}

pub(crate) async fn symbol(
    State(state): AppState,
    method: Method,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let input = if method == Method::POST {
        String::from_utf8_lossy(&body).into_owned()
    } else {
        query.unwrap_or_default()
    };

    let mut out = String::new();
    match &state.symbolizer {
        None => out.push_str("num_symbols: 0\n"),
        Some(symbolizer) => {
            out.push_str("num_symbols: 1\n");
            for addr in input.split('+').filter_map(parse_address) {
                if addr == 0 {
                    continue;
                }
                if let Some(name) = symbolizer.lookup(addr) {
                    let _ = writeln!(out, "{addr:#x} {name}");
                }
            }
        }
    }
    (text_headers(), out).into_response()
}

pub(crate) async fn pprof_trace(
    State(state): AppState,
    Query(params): Params,
) -> Result<Response, PluginError> {
    let Some(tracer) = state.tracer.clone() else {
        return Err(PluginError::TraceStart(RuntimeError::Unavailable(
            "execution tracer",
        )));
    };
    let duration = parse_seconds(param(&params, "seconds"), PPROF_TRACE_DEFAULT);

    let (sink, body) = streaming_body();
    let starting = tracer.clone();
    run_blocking(move || starting.start(sink.boxed()))
        .await
        .map_err(PluginError::TraceStart)?;
    tokio::spawn(run_capture("execution trace", duration, move || tracer.stop()));
    Ok((download_headers("trace"), body).into_response())
}

pub(crate) async fn mem_stats(State(state): AppState, Query(params): Params) -> Response {
    let ms = state.stats.read_mem_stats();
    if wants_json(param(&params, "json")) {
        Json(mem_stats_json(&ms)).into_response()
    } else {
        (text_headers(), mem_stats_text(&ms)).into_response()
    }
}

pub(crate) async fn gc_stats(State(state): AppState, Query(params): Params) -> Response {
    let gs = state.stats.read_gc_stats();
    if wants_json(param(&params, "json")) {
        Json(gc_stats_json(&gs)).into_response()
    } else {
        (text_headers(), gc_stats_text(&gs)).into_response()
    }
}

pub(crate) async fn trace_control(
    State(state): AppState,
    Query(params): Params,
) -> Result<Response, PluginError> {
    let Some(gate) = &state.gate else {
        return Err(PluginError::TraceStart(RuntimeError::Unavailable(
            "execution tracer",
        )));
    };
    let mut session = gate.try_begin().inspect_err(|_| {
        tracing::info!("rejected trace capture, tracing is already active");
    })?;
    let duration = parse_trace_duration(param(&params, "dur"));

    let (sink, body) = streaming_body();
    // a failed start drops the session, which frees the slot
    let session = run_blocking(move || {
        session.start(sink.boxed())?;
        Ok(session)
    })
    .await
    .map_err(PluginError::TraceStart)?;
    tracing::info!(?duration, "trace capture started");
    tokio::spawn(async move {
        if let Err(err) = session.run_for(duration).await {
            tracing::warn!(?err, "trace capture ended with an error");
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static(NOSNIFF));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    Ok((headers, body).into_response())
}
