// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod execute_command;
pub mod fetch_url;
pub mod fs_ops;
pub mod get_git_diff;
pub mod lint_file;
pub mod list_code_definitions;
pub mod list_directory;
pub mod read_file;
pub mod search_files;
pub mod str_replace;
pub mod web_search;
pub mod write_file;

use crate::executor::ToolRegistry;

/// Register every built-in tool.  Called once at startup; the registry is
/// read-only afterwards.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(read_file::ReadFileTool);
    registry.register(write_file::WriteFileTool);
    registry.register(str_replace::StrReplaceTool);
    registry.register(list_directory::ListDirectoryTool);
    registry.register(search_files::SearchFilesTool);
    registry.register(execute_command::ExecuteCommandTool);
    registry.register(get_git_diff::GetGitDiffTool);
    registry.register(list_code_definitions::ListCodeDefinitionsTool);
    registry.register(fs_ops::CreateDirectoryTool);
    registry.register(fs_ops::DeleteFileTool);
    registry.register(fs_ops::MoveFileTool);
    registry.register(fetch_url::FetchUrlTool);
    registry.register(web_search::WebSearchTool);
    registry.register(lint_file::LintFileTool);
}

// ─── Mode-catalog contract tests ──────────────────────────────────────────────
//
// The mode split is part of the public contract: builder gets everything,
// planner is read-only, chat is a mid-sized subset.  Verified here so a
// modes() override on any tool never silently changes a catalog.
#[cfg(test)]
mod mode_catalog_tests {
    use super::*;
    use tern_config::AgentMode;

    fn names(mode: AgentMode) -> Vec<String> {
        ToolRegistry::with_builtins()
            .definitions_for_mode(mode)
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    #[test]
    fn builder_gets_the_full_catalog() {
        let names = names(AgentMode::Builder);
        for tool in [
            "read_file",
            "write_file",
            "str_replace",
            "list_directory",
            "search_files",
            "execute_command",
            "get_git_diff",
            "list_code_definitions",
            "create_directory",
            "delete_file",
            "move_file",
            "fetch_url",
            "web_search",
            "lint_file",
        ] {
            assert!(names.contains(&tool.to_string()), "builder missing {tool}");
        }
    }

    #[test]
    fn planner_has_no_mutating_tools() {
        let names = names(AgentMode::Planner);
        for tool in [
            "write_file",
            "str_replace",
            "delete_file",
            "move_file",
            "create_directory",
            "execute_command",
        ] {
            assert!(!names.contains(&tool.to_string()), "planner must not offer {tool}");
        }
        assert!(names.contains(&"read_file".to_string()));
        assert!(names.contains(&"search_files".to_string()));
        assert!(names.contains(&"get_git_diff".to_string()));
    }

    #[test]
    fn chat_is_a_mid_sized_subset() {
        let chat = names(AgentMode::Chat);
        let builder = names(AgentMode::Builder);
        assert!(chat.len() < builder.len());
        assert!(chat.contains(&"read_file".to_string()));
        assert!(!chat.contains(&"execute_command".to_string()));
    }
}
