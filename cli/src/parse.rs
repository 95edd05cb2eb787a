//! Hand-rolled argument parser, in the same style as the core engine's own
//! CLI parsing: a subcommand dispatches to a per-group parser, which walks
//! its remaining flags with an index-based loop rather than a derive macro.

use crate::command::Command;

/// Parse CLI arguments into a typed [`Command`].
///
/// `args` must NOT include the program name (i.e. `["session", "status"]`,
/// not `["robust-session", "session", "status"]`).
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'robust-session help' for usage.".into());
    }

    match args[0] {
        "session" => parse_session(args),
        "op" => parse_op(args),
        "context" => parse_context(args),
        "github" => parse_github(args),
        "doc" => parse_doc(args),
        "tags" => parse_tags(args),
        "template" => parse_template(args),
        "analytics" => parse_analytics(args),
        "help" => parse_help(args),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}

fn take_arg(args: &[&str], index: usize, flag: &str) -> Result<String, String> {
    if index >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    Ok(args[index].into())
}

fn parse_help(args: &[&str]) -> Result<Command, String> {
    let topic = if args.len() > 1 { Some(args[1..].join(" ")) } else { None };
    Ok(Command::Help { topic })
}

// ---------------------------------------------------------------------------
// session
// ---------------------------------------------------------------------------

fn parse_session(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session session <start|resume|status|checkpoint|end|list|rename|search|delete|clone|export|import>".into());
    }
    match args[1] {
        "start" => parse_session_start(args),
        "resume" => Ok(Command::SessionResume { session_id: args.get(2).map(|s| s.to_string()) }),
        "status" => Ok(Command::SessionStatus),
        "checkpoint" => Ok(Command::SessionCheckpoint),
        "end" => Ok(Command::SessionEnd { summary: args.get(2).map(|s| args[2..].join(" ")) }),
        "list" => parse_session_list(args),
        "rename" => parse_session_rename(args),
        "search" => parse_session_search(args),
        "delete" => parse_session_delete(args),
        "clone" => parse_session_clone(args),
        "export" => parse_session_export(args),
        "import" => parse_session_import(args),
        other => Err(format!("Unknown session subcommand: '{}'", other)),
    }
}

/// `session start <project> <project_path> <goal...>`
fn parse_session_start(args: &[&str]) -> Result<Command, String> {
    if args.len() < 5 {
        return Err("Usage: robust-session session start <project> <project_path> <goal...>".into());
    }
    Ok(Command::SessionStart {
        project: args[2].into(),
        project_path: args[3].into(),
        goal: args[4..].join(" "),
    })
}

fn parse_session_list(args: &[&str]) -> Result<Command, String> {
    let mut limit = 20usize;
    let rest = &args[2..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--limit" => {
                i += 1;
                limit = take_arg(rest, i, "--limit")?.parse().map_err(|_| "invalid --limit".to_string())?;
            }
            other => return Err(format!("Unknown flag for session list: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::SessionList { limit })
}

fn parse_session_rename(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session session rename <name...>".into());
    }
    Ok(Command::SessionRename { name: args[2..].join(" ") })
}

fn parse_session_search(args: &[&str]) -> Result<Command, String> {
    let mut query = None;
    let mut tags = Vec::new();
    let mut project = None;
    let mut status = None;
    let mut limit = 20usize;

    let rest = &args[2..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--query" => {
                i += 1;
                query = Some(take_arg(rest, i, "--query")?);
            }
            "--tag" => {
                i += 1;
                tags.push(take_arg(rest, i, "--tag")?);
            }
            "--project" => {
                i += 1;
                project = Some(take_arg(rest, i, "--project")?);
            }
            "--status" => {
                i += 1;
                status = Some(take_arg(rest, i, "--status")?);
            }
            "--limit" => {
                i += 1;
                limit = take_arg(rest, i, "--limit")?.parse().map_err(|_| "invalid --limit".to_string())?;
            }
            other => return Err(format!("Unknown flag for session search: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::SessionSearch { query, tags, project, status, limit })
}

fn parse_session_delete(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session session delete <session_id>".into());
    }
    Ok(Command::SessionDelete { session_id: args[2].into() })
}

fn parse_session_clone(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session session clone <session_id> [--goal <goal...>]".into());
    }
    let session_id = args[2].to_string();
    let mut new_goal = None;
    let rest = &args[3..];
    if rest.first() == Some(&"--goal") {
        new_goal = Some(rest[1..].join(" "));
    }
    Ok(Command::SessionClone { session_id, new_goal })
}

fn parse_session_export(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session session export <session_id> [--output <path>] [--include-checkpoints]".into());
    }
    let session_id = args[2].to_string();
    let mut output_path = None;
    let mut include_checkpoints = false;

    let rest = &args[3..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--output" => {
                i += 1;
                output_path = Some(take_arg(rest, i, "--output")?);
            }
            "--include-checkpoints" => include_checkpoints = true,
            other => return Err(format!("Unknown flag for session export: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::SessionExport { session_id, output_path, include_checkpoints })
}

fn parse_session_import(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session session import <input_path>".into());
    }
    Ok(Command::SessionImport { input_path: args[2].into() })
}

// ---------------------------------------------------------------------------
// op
// ---------------------------------------------------------------------------

fn parse_op(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session op <status|list|retry|cancel>".into());
    }
    match args[1] {
        "status" => {
            if args.len() < 3 {
                return Err("Usage: robust-session op status <op_id>".into());
            }
            Ok(Command::OpStatus { op_id: args[2].into() })
        }
        "list" => parse_op_list(args),
        "retry" => {
            if args.len() < 3 {
                return Err("Usage: robust-session op retry <op_id>".into());
            }
            Ok(Command::OpRetry { op_id: args[2].into() })
        }
        "cancel" => {
            if args.len() < 3 {
                return Err("Usage: robust-session op cancel <op_id>".into());
            }
            Ok(Command::OpCancel { op_id: args[2].into() })
        }
        other => Err(format!("Unknown op subcommand: '{}'", other)),
    }
}

fn parse_op_list(args: &[&str]) -> Result<Command, String> {
    let mut filter = "pending".to_string();
    let mut limit = None;
    let rest = &args[2..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--filter" => {
                i += 1;
                filter = take_arg(rest, i, "--filter")?;
            }
            "--limit" => {
                i += 1;
                limit = Some(take_arg(rest, i, "--limit")?.parse().map_err(|_| "invalid --limit".to_string())?);
            }
            other => return Err(format!("Unknown flag for op list: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::OpList { filter, limit })
}

// ---------------------------------------------------------------------------
// context
// ---------------------------------------------------------------------------

fn parse_context(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session context <set|get>".into());
    }
    match args[1] {
        "set" => {
            if args.len() < 4 {
                return Err("Usage: robust-session context set <key> <value...>".into());
            }
            Ok(Command::ContextSet { key: args[2].into(), value: args[3..].join(" ") })
        }
        "get" => {
            if args.len() < 3 {
                return Err("Usage: robust-session context get <key>".into());
            }
            Ok(Command::ContextGet { key: args[2].into() })
        }
        other => Err(format!("Unknown context subcommand: '{}'", other)),
    }
}

// ---------------------------------------------------------------------------
// github
// ---------------------------------------------------------------------------

fn parse_github(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session github <connect|disconnect|info>".into());
    }
    match args[1] {
        "connect" => {
            if args.len() < 3 {
                return Err("Usage: robust-session github connect <repo_url> [--branch <name>]".into());
            }
            let repo_url = args[2].to_string();
            let mut branch = None;
            let rest = &args[3..];
            if rest.first() == Some(&"--branch") {
                branch = rest.get(1).map(|s| s.to_string());
            }
            Ok(Command::GithubConnect { repo_url, branch })
        }
        "disconnect" => Ok(Command::GithubDisconnect),
        "info" => Ok(Command::GithubInfo),
        other => Err(format!("Unknown github subcommand: '{}'", other)),
    }
}

// ---------------------------------------------------------------------------
// doc
// ---------------------------------------------------------------------------

fn parse_doc(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session doc <add|remove|list>".into());
    }
    match args[1] {
        "add" => parse_doc_add(args),
        "remove" => {
            if args.len() < 3 {
                return Err("Usage: robust-session doc remove <doc_id>".into());
            }
            Ok(Command::DocRemove { doc_id: args[2].into() })
        }
        "list" => Ok(Command::DocList),
        other => Err(format!("Unknown doc subcommand: '{}'", other)),
    }
}

fn parse_doc_add(args: &[&str]) -> Result<Command, String> {
    if args.len() < 4 {
        return Err("Usage: robust-session doc add <name> <path> [--type file|url|text] [--description <text>]".into());
    }
    let name = args[2].to_string();
    let path = args[3].to_string();
    let mut doc_type = None;
    let mut description = None;

    let rest = &args[4..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--type" => {
                i += 1;
                doc_type = Some(take_arg(rest, i, "--type")?);
            }
            "--description" => {
                i += 1;
                description = Some(take_arg(rest, i, "--description")?);
            }
            other => return Err(format!("Unknown flag for doc add: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::DocAdd { name, path, doc_type, description })
}

// ---------------------------------------------------------------------------
// tags
// ---------------------------------------------------------------------------

fn parse_tags(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: robust-session tags <add|remove> <tag> [tag...]".into());
    }
    let tags: Vec<String> = args[2..].iter().map(|s| s.to_string()).collect();
    match args[1] {
        "add" => Ok(Command::TagsAdd { tags }),
        "remove" => Ok(Command::TagsRemove { tags }),
        other => Err(format!("Unknown tags subcommand: '{}'", other)),
    }
}

// ---------------------------------------------------------------------------
// template
// ---------------------------------------------------------------------------

fn parse_template(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session template <list|use|create|from-session>".into());
    }
    match args[1] {
        "list" => Ok(Command::TemplateList),
        "use" => parse_template_use(args),
        "create" => parse_template_create(args),
        "from-session" => parse_template_from_session(args),
        other => Err(format!("Unknown template subcommand: '{}'", other)),
    }
}

/// `template use <template_id> <project> <project_path> [--var key=value ...]`
fn parse_template_use(args: &[&str]) -> Result<Command, String> {
    if args.len() < 5 {
        return Err("Usage: robust-session template use <template_id> <project> <project_path> [--var key=value]".into());
    }
    let template_id = args[2].to_string();
    let project = args[3].to_string();
    let project_path = args[4].to_string();
    let mut goal_vars = Vec::new();

    let rest = &args[5..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--var" => {
                i += 1;
                let pair = take_arg(rest, i, "--var")?;
                let (key, value) = pair.split_once('=').ok_or_else(|| "--var expects key=value".to_string())?;
                goal_vars.push((key.to_string(), value.to_string()));
            }
            other => return Err(format!("Unknown flag for template use: '{}'", other)),
        }
        i += 1;
    }
    Ok(Command::TemplateUse { template_id, project, project_path, goal_vars })
}

fn parse_template_create(args: &[&str]) -> Result<Command, String> {
    if args.len() < 5 {
        return Err("Usage: robust-session template create <name> <description> <goal_template...>".into());
    }
    Ok(Command::TemplateCreate { name: args[2].into(), description: args[3].into(), goal_template: args[4..].join(" ") })
}

fn parse_template_from_session(args: &[&str]) -> Result<Command, String> {
    if args.len() < 4 {
        return Err("Usage: robust-session template from-session <name> <description...>".into());
    }
    Ok(Command::TemplateFromSession { name: args[2].into(), description: args[3..].join(" ") })
}

// ---------------------------------------------------------------------------
// analytics
// ---------------------------------------------------------------------------

fn parse_analytics(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: robust-session analytics <summary|project|timeline|tags>".into());
    }
    match args[1] {
        "summary" => Ok(Command::AnalyticsSummary),
        "project" => {
            if args.len() < 3 {
                return Err("Usage: robust-session analytics project <name>".into());
            }
            Ok(Command::AnalyticsProject { project: args[2].into() })
        }
        "timeline" => {
            let days = if args.len() > 2 { args[2].parse().map_err(|_| "invalid days".to_string())? } else { 30 };
            Ok(Command::AnalyticsTimeline { days })
        }
        "tags" => Ok(Command::AnalyticsTags),
        other => Err(format!("Unknown analytics subcommand: '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_args_is_an_error() {
        assert!(parse_args(&[]).is_err());
    }

    #[test]
    fn session_start_joins_goal_words() {
        let cmd = parse_args(&["session", "start", "proj", "/tmp/proj", "fix", "the", "bug"]).unwrap();
        assert_eq!(
            cmd,
            Command::SessionStart { project: "proj".into(), project_path: "/tmp/proj".into(), goal: "fix the bug".into() }
        );
    }

    #[test]
    fn session_resume_with_no_id() {
        let cmd = parse_args(&["session", "resume"]).unwrap();
        assert_eq!(cmd, Command::SessionResume { session_id: None });
    }

    #[test]
    fn session_list_with_limit() {
        let cmd = parse_args(&["session", "list", "--limit", "5"]).unwrap();
        assert_eq!(cmd, Command::SessionList { limit: 5 });
    }

    #[test]
    fn session_search_multiple_tags() {
        let cmd = parse_args(&["session", "search", "--tag", "bugfix", "--tag", "urgent", "--limit", "3"]).unwrap();
        assert_eq!(
            cmd,
            Command::SessionSearch {
                query: None,
                tags: vec!["bugfix".into(), "urgent".into()],
                project: None,
                status: None,
                limit: 3,
            }
        );
    }

    #[test]
    fn op_list_defaults_to_pending() {
        let cmd = parse_args(&["op", "list"]).unwrap();
        assert_eq!(cmd, Command::OpList { filter: "pending".into(), limit: None });
    }

    #[test]
    fn template_use_parses_vars() {
        let cmd = parse_args(&["template", "use", "bugfix", "proj", "/tmp", "--var", "description=null deref"]).unwrap();
        assert_eq!(
            cmd,
            Command::TemplateUse {
                template_id: "bugfix".into(),
                project: "proj".into(),
                project_path: "/tmp".into(),
                goal_vars: vec![("description".into(), "null deref".into())],
            }
        );
    }

    #[test]
    fn doc_add_with_flags() {
        let cmd = parse_args(&["doc", "add", "notes", "/tmp/notes.txt", "--type", "file", "--description", "design doc"]).unwrap();
        assert_eq!(
            cmd,
            Command::DocAdd {
                name: "notes".into(),
                path: "/tmp/notes.txt".into(),
                doc_type: Some("file".into()),
                description: Some("design doc".into()),
            }
        );
    }

    #[test]
    fn unknown_top_level_command_rejected() {
        assert!(parse_args(&["bogus"]).is_err());
    }

    #[test]
    fn unknown_session_subcommand_rejected() {
        assert!(parse_args(&["session", "bogus"]).is_err());
    }
}
