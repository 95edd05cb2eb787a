//! `robust-session` — a thin CLI over `robust-session-core`'s `Engine`.
//!
//! There is no daemon and no socket: every invocation opens the engine's
//! data directory directly (`--base-dir`, or `$PWD` if omitted), performs
//! one operation, and exits.

mod command;
mod parse;

use std::env;
use std::path::PathBuf;
use std::process;

use robust_session_core::config::EngineConfig;
use robust_session_core::operation::OperationFilter;
use robust_session_core::session::{DocumentType, SessionStatus};
use robust_session_core::value::{Value, ValueMap};
use robust_session_core::Engine;

use command::Command;

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();
    let (base_dir, rest) = take_base_dir(&argv);
    let args: Vec<&str> = rest.iter().map(|s| s.as_str()).collect();

    let cmd = match parse::parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("robust-session: {}", e);
            process::exit(1);
        }
    };

    if let Command::Help { topic } = &cmd {
        print_help(topic.as_deref());
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("robust-session: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    let mut engine = Engine::new(EngineConfig::new(base_dir));

    match runtime.block_on(dispatch(&mut engine, cmd)) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("robust-session: {}", e);
            process::exit(1);
        }
    }
}

/// Pull `--base-dir <path>` out of argv wherever it appears, falling back
/// to the current working directory.
fn take_base_dir(argv: &[String]) -> (PathBuf, Vec<String>) {
    let mut base_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut rest = Vec::with_capacity(argv.len());
    let mut i = 0;
    while i < argv.len() {
        if argv[i] == "--base-dir" {
            if let Some(value) = argv.get(i + 1) {
                base_dir = PathBuf::from(value);
            }
            i += 2;
            continue;
        }
        rest.push(argv[i].clone());
        i += 1;
    }
    (base_dir, rest)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn parse_status(s: &str) -> Result<SessionStatus, String> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "paused" => Ok(SessionStatus::Paused),
        "recovered" => Ok(SessionStatus::Recovered),
        "completed" => Ok(SessionStatus::Completed),
        "imported" => Ok(SessionStatus::Imported),
        other => Err(format!("unknown status: '{}'", other)),
    }
}

fn parse_doc_type(s: &str) -> Result<DocumentType, String> {
    match s {
        "file" => Ok(DocumentType::File),
        "url" => Ok(DocumentType::Url),
        "text" => Ok(DocumentType::Text),
        other => Err(format!("unknown document type: '{}'", other)),
    }
}

async fn dispatch(engine: &mut Engine, cmd: Command) -> Result<String, String> {
    match cmd {
        Command::SessionStart { project, project_path, goal } => {
            let summary = engine.session_start(project, project_path, goal, ValueMap::new()).await.map_err(|e| e.to_string())?;
            to_json(&summary)
        }
        Command::SessionResume { session_id } => {
            let summary = engine.session_resume(session_id).await.map_err(|e| e.to_string())?;
            to_json(&summary)
        }
        Command::SessionStatus => {
            let report = engine.session_status().await.map_err(|e| e.to_string())?;
            to_json(&report)
        }
        Command::SessionCheckpoint => {
            let checkpoint = engine.session_checkpoint().await.map_err(|e| e.to_string())?;
            to_json(&checkpoint)
        }
        Command::SessionEnd { summary } => {
            let result = engine.session_end(summary).await.map_err(|e| e.to_string())?;
            to_json(&result)
        }
        Command::SessionList { limit } => to_json(&engine.session_list(limit)),
        Command::SessionRename { name } => {
            engine.session_rename(&name).await.map_err(|e| e.to_string())?;
            Ok(format!("{{\"renamed_to\":\"{}\"}}", name))
        }
        Command::SessionSearch { query, tags, project, status, limit } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let tags = if tags.is_empty() { None } else { Some(tags.as_slice()) };
            let rows = engine.session_search(query.as_deref(), tags, project.as_deref(), status, limit);
            to_json(&rows)
        }
        Command::SessionDelete { session_id } => {
            let deleted = engine.session_delete(&session_id);
            Ok(format!("{{\"deleted\":{}}}", deleted))
        }
        Command::SessionClone { session_id, new_goal } => {
            let new_id = engine.session_clone(&session_id, new_goal).map_err(|e| e.to_string())?;
            Ok(format!("{{\"session_id\":\"{}\"}}", new_id))
        }
        Command::SessionExport { session_id, output_path, include_checkpoints } => {
            let output = output_path.map(PathBuf::from);
            let result = engine
                .session_export(&session_id, output.as_deref(), include_checkpoints)
                .map_err(|e| e.to_string())?;
            to_json(&result)
        }
        Command::SessionImport { input_path } => {
            let result = engine.session_import(&PathBuf::from(input_path)).map_err(|e| e.to_string())?;
            to_json(&result)
        }

        Command::OpStatus { op_id } => {
            let op = engine.op_status(&op_id).ok_or_else(|| format!("operation {} not found", op_id))?;
            to_json(op)
        }
        Command::OpList { filter, limit } => {
            let filter = OperationFilter::parse(&filter)?;
            let mut ops = engine.op_list(filter);
            if let Some(limit) = limit {
                ops.truncate(limit);
            }
            to_json(&ops)
        }
        Command::OpRetry { op_id } => {
            engine.op_retry(&op_id).map_err(|e| e.to_string())?;
            Ok(format!("{{\"retried\":\"{}\"}}", op_id))
        }
        Command::OpCancel { op_id } => {
            engine.op_cancel(&op_id).map_err(|e| e.to_string())?;
            Ok(format!("{{\"cancelled\":\"{}\"}}", op_id))
        }

        Command::ContextSet { key, value } => {
            engine.context_set(&key, Value::String(value)).await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }
        Command::ContextGet { key } => {
            let value = engine.context_get(&key).await.map_err(|e| e.to_string())?;
            to_json(&value)
        }

        Command::GithubConnect { repo_url, branch } => {
            engine.github_connect(&repo_url, branch).await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }
        Command::GithubDisconnect => {
            engine.github_disconnect().await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }
        Command::GithubInfo => {
            let info = engine.github_info().await.map_err(|e| e.to_string())?;
            to_json(&info)
        }

        Command::DocAdd { name, path, doc_type, description } => {
            let doc_type = doc_type.map(|t| parse_doc_type(&t)).transpose()?.unwrap_or(DocumentType::File);
            let description = description.unwrap_or_default();
            let doc_id = engine.doc_add(&name, &path, doc_type, &description).await.map_err(|e| e.to_string())?;
            Ok(format!("{{\"doc_id\":\"{}\"}}", doc_id))
        }
        Command::DocRemove { doc_id } => {
            engine.doc_remove(&doc_id).await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }
        Command::DocList => {
            let docs = engine.doc_list().await.map_err(|e| e.to_string())?;
            to_json(&docs)
        }

        Command::TagsAdd { tags } => {
            engine.tags_add(&tags).await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }
        Command::TagsRemove { tags } => {
            engine.tags_remove(&tags).await.map_err(|e| e.to_string())?;
            Ok("{}".to_string())
        }

        Command::TemplateList => to_json(&engine.template_list()),
        Command::TemplateUse { template_id, project, project_path, goal_vars } => {
            let vars = goal_vars.into_iter().collect();
            let summary = engine.template_use(&template_id, project, project_path, &vars).await.map_err(|e| e.to_string())?;
            to_json(&summary)
        }
        Command::TemplateCreate { name, description, goal_template } => {
            let id = engine
                .template_create(&name, &description, &goal_template, Vec::new(), ValueMap::new(), None)
                .map_err(|e| e.to_string())?;
            Ok(format!("{{\"template_id\":\"{}\"}}", id))
        }
        Command::TemplateFromSession { name, description } => {
            let id = engine.template_from_session(&name, &description).await.map_err(|e| e.to_string())?;
            Ok(format!("{{\"template_id\":\"{}\"}}", id))
        }

        Command::AnalyticsSummary => to_json(&engine.analytics_summary()),
        Command::AnalyticsProject { project } => to_json(&engine.analytics_project(&project)),
        Command::AnalyticsTimeline { days } => to_json(&engine.analytics_timeline(days)),
        Command::AnalyticsTags => to_json(&engine.analytics_tags()),

        Command::Help { .. } => unreachable!("handled before runtime dispatch"),
    }
}

fn print_help(topic: Option<&str>) {
    match topic {
        None => {
            println!("robust-session <group> <verb> [args...] [--base-dir <path>]");
            println!();
            println!("Groups: session, op, context, github, doc, tags, template, analytics");
            println!("Run 'robust-session help <group>' for the verbs in a group.");
        }
        Some(group) => println!("See the README for the full '{}' command surface.", group),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_base_dir_extracts_flag_anywhere() {
        let argv = vec!["session".to_string(), "status".to_string(), "--base-dir".to_string(), "/tmp/x".to_string()];
        let (base_dir, rest) = take_base_dir(&argv);
        assert_eq!(base_dir, PathBuf::from("/tmp/x"));
        assert_eq!(rest, vec!["session".to_string(), "status".to_string()]);
    }

    #[test]
    fn take_base_dir_defaults_to_cwd() {
        let argv = vec!["session".to_string(), "status".to_string()];
        let (base_dir, rest) = take_base_dir(&argv);
        assert_eq!(base_dir, env::current_dir().unwrap());
        assert_eq!(rest, argv);
    }
}
