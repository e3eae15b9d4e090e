// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod chat_completions;
mod responses;

pub use anthropic::AnthropicMessagesAdapter;
pub use chat_completions::ChatCompletionsAdapter;
pub use responses::ResponsesAdapter;
