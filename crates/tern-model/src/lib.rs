// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod adapter;
pub mod adapters;
pub mod hosts;
pub mod mock;
pub mod repair;
pub mod stream;
pub mod transport;
mod error;
mod types;

pub use adapter::{
    adapter_for, fit_output_tokens, merge_headers, register_model_format, resolve_adapter,
    resolve_format, EndpointAdapter,
};
pub use error::{classify_http_error, ProviderError, ProviderErrorKind};
pub use stream::{StreamOutcome, StreamProcessor};
pub use transport::{HttpResponse, HttpTransport, OnStreamData, StreamData, StreamStatus};
pub use types::*;
