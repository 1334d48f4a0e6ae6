use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use serde::Serialize;
use serde_json::value::RawValue;

use crate::args::{read_file, require_json_array, require_resource, split_list, BodyArgs};
use crate::backup::{run_backup, run_restore};
use crate::client::KoorClient;
use crate::config::{self, config_path, mask_secret, resolve_from, set_value_at};
use crate::contract;
use crate::error::{KoorError, Result};
use crate::format::{print_body, render_body, write_atomic};
use crate::help::USAGE;
use crate::request::Request;
use crate::subscribe::{run_fallback, DEFAULT_PATTERN};

#[derive(Parser, Debug)]
#[command(
    name = "koor-cli",
    version,
    about = "Command-line client for the Koor control-plane server",
    override_help = USAGE
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parses argv. For `metrics agents` a bare id is only honoured when it
    /// comes before the options; once the tail opens with `--` it is all
    /// options and a stray bare token is dropped.
    pub fn parse_args<I, T>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;
        if let Commands::Metrics {
            action: MetricsAction::Agents { id, .. },
        } = &mut cli.command
        {
            let agents = matches
                .subcommand_matches("metrics")
                .and_then(|m| m.subcommand_matches("agents"));
            if agents.is_some_and(id_follows_option) {
                tracing::debug!("ignoring agent id given after options: {id:?}");
                *id = None;
            }
        }
        Ok(cli)
    }
}

fn id_follows_option(matches: &ArgMatches) -> bool {
    let Some(id_at) = matches.index_of("id") else {
        return false;
    };
    ["instance_id", "period"]
        .iter()
        .filter_map(|option| matches.index_of(option))
        .any(|at| at < id_at)
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check server health
    Status,
    /// Versioned key/value state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Project specs
    Specs {
        #[command(subcommand)]
        action: SpecsAction,
    },
    /// Publish, query and follow events
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Import and export rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Contract specs, validation and endpoint tests
    Contract {
        #[command(subcommand)]
        action: ContractAction,
    },
    /// Webhook subscriptions
    Webhooks {
        #[command(subcommand)]
        action: WebhooksAction,
    },
    /// Compliance runs
    Compliance {
        #[command(subcommand)]
        action: ComplianceAction,
    },
    /// Spec templates
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
    /// Audit log
    Audit(AuditArgs),
    /// Agent metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },
    /// Registered instances
    Instances {
        #[command(subcommand)]
        action: InstancesAction,
    },
    /// Register a new instance
    Register(RegisterArgs),
    /// Activate a registered instance
    Activate {
        id: String,
    },
    /// Snapshot state and rules to a local file
    Backup {
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Replay a backup file against the server
    Restore {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
    /// Manage settings.json
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    List,
    Get {
        key: String,
    },
    Set {
        key: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    Delete {
        key: String,
    },
    History {
        key: String,
        #[arg(long)]
        limit: Option<String>,
    },
    Rollback {
        key: String,
        #[arg(long = "version", value_name = "V")]
        to_version: String,
    },
    Diff {
        key: String,
        #[arg(long)]
        v1: String,
        #[arg(long)]
        v2: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SpecsAction {
    List {
        project: String,
    },
    Get {
        /// <project>/<name>
        spec: String,
    },
    Set {
        spec: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    Delete {
        spec: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum EventsAction {
    Publish {
        topic: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    History(HistoryArgs),
    Subscribe {
        pattern: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct HistoryArgs {
    #[arg(long)]
    pub last: Option<String>,
    #[arg(long)]
    pub topic: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    Import {
        #[command(flatten)]
        body: BodyArgs,
    },
    Export(ExportArgs),
}

#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    #[arg(long)]
    pub source: Option<String>,
    /// Write pretty JSON to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ContractAction {
    Set {
        contract: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    Get {
        contract: String,
    },
    Validate(ValidateArgs),
    Test {
        contract: String,
        /// Base URL of the deployment under test
        #[arg(long)]
        target: String,
    },
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    pub contract: String,
    /// Endpoint key, e.g. "POST /api/x"
    #[arg(long)]
    pub endpoint: String,
    #[arg(long, default_value = "request")]
    pub direction: String,
    #[arg(long, value_name = "JSON", conflicts_with = "file", allow_hyphen_values = true)]
    pub payload: Option<String>,
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum WebhooksAction {
    List,
    Add {
        #[arg(long)]
        url: String,
        /// Comma-separated event topics
        #[arg(long)]
        events: Option<String>,
        #[arg(long)]
        secret: Option<String>,
    },
    Delete {
        id: String,
    },
    Test {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ComplianceAction {
    History {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<String>,
    },
    Run {
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplatesAction {
    List {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    Get {
        id: String,
    },
    Create(CreateTemplateArgs),
    Delete {
        id: String,
    },
    Apply {
        id: String,
        #[arg(long)]
        project: String,
    },
}

#[derive(Args, Debug)]
pub struct CreateTemplateArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub kind: String,
    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,
    #[command(flatten)]
    pub body: BodyArgs,
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: Option<AuditAction>,
    #[command(flatten)]
    pub filters: AuditFilters,
}

#[derive(Args, Debug, Default)]
pub struct AuditFilters {
    #[arg(long)]
    pub instance: Option<String>,
    #[arg(long)]
    pub action: Option<String>,
    #[arg(long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub limit: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum AuditAction {
    Summary {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetricsAction {
    /// Agent metrics, optionally for a single agent
    Agents {
        id: Option<String>,
        #[arg(long = "instance_id")]
        instance_id: Option<String>,
        #[arg(long)]
        period: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum InstancesAction {
    List,
    Get { id: String },
    Stale,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    pub name: String,
    #[arg(long)]
    pub workspace: Option<String>,
    #[arg(long)]
    pub intent: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Store a setting (server or token)
    Set { key: String, value: String },
    /// Show effective settings
    Show,
    /// Print settings file path
    Path,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    topic: &'a str,
    data: &'a RawValue,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    url: &'a str,
    events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

#[derive(Serialize)]
struct TemplateBody<'a> {
    id: &'a str,
    name: &'a str,
    kind: &'a str,
    data: &'a RawValue,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ProjectBody<'a> {
    project: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    name: &'a str,
    workspace: &'a str,
    intent: &'a str,
}

fn json_payload(bytes: &[u8], what: &str) -> Result<Box<RawValue>> {
    serde_json::from_slice(bytes)
        .map_err(|e| KoorError::usage(format!("{what} is not valid JSON: {e}")))
}

fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn state_request(action: &StateAction) -> Result<Request> {
    fn path(key: &str) -> String {
        format!("/api/state/{key}")
    }
    Ok(match action {
        StateAction::List => Request::get("/api/state"),
        StateAction::Get { key } => Request::get(path(key)),
        StateAction::Set { key, body } => Request::put(path(key)).body(body.read()?),
        StateAction::Delete { key } => Request::delete(path(key)),
        StateAction::History { key, limit } => Request::get(path(key))
            .query("history", "1")
            .query_opt("limit", limit.as_deref()),
        StateAction::Rollback { key, to_version } => {
            Request::post(path(key)).query("rollback", to_version.as_str())
        }
        StateAction::Diff { key, v1, v2 } => {
            Request::get(path(key)).query("diff", format!("{v1},{v2}"))
        }
    })
}

fn specs_request(action: &SpecsAction) -> Result<Request> {
    fn path(spec: &str) -> Result<String> {
        let (project, name) = require_resource(spec)?;
        Ok(format!("/api/specs/{project}/{name}"))
    }
    Ok(match action {
        SpecsAction::List { project } => Request::get(format!("/api/specs/{project}")),
        SpecsAction::Get { spec } => Request::get(path(spec)?),
        SpecsAction::Set { spec, body } => Request::put(path(spec)?).body(body.read()?),
        SpecsAction::Delete { spec } => Request::delete(path(spec)?),
    })
}

fn events_history_request(args: &HistoryArgs) -> Request {
    Request::get("/api/events/history")
        .query_opt("last", args.last.as_deref())
        .query_opt("topic", args.topic.as_deref())
        .query_opt("from", args.from.as_deref())
        .query_opt("to", args.to.as_deref())
        .query_opt("source", args.source.as_deref())
}

fn publish_request(topic: &str, body: &BodyArgs) -> Result<Request> {
    let bytes = body.read()?;
    let data = json_payload(&bytes, "event data")?;
    let payload = json_body(&PublishBody { topic, data: &data })?;
    Ok(Request::post("/api/events/publish").body(payload))
}

fn rules_import_request(body: &BodyArgs) -> Result<Request> {
    let bytes = body.read()?;
    require_json_array(&bytes, "rules file")?;
    Ok(Request::post("/api/rules/import").body(bytes))
}

fn rules_export_request(source: Option<&str>) -> Request {
    Request::get("/api/rules/export").query_opt("source", source)
}

fn webhooks_request(action: &WebhooksAction) -> Result<Request> {
    Ok(match action {
        WebhooksAction::List => Request::get("/api/webhooks"),
        WebhooksAction::Add {
            url,
            events,
            secret,
        } => Request::post("/api/webhooks").body(json_body(&WebhookBody {
            url,
            events: split_list(events.as_deref()),
            secret: secret.as_deref(),
        })?),
        WebhooksAction::Delete { id } => Request::delete(format!("/api/webhooks/{id}")),
        WebhooksAction::Test { id } => Request::post(format!("/api/webhooks/{id}/test")),
    })
}

fn compliance_request(action: &ComplianceAction) -> Result<Request> {
    Ok(match action {
        ComplianceAction::History { project, limit } => Request::get("/api/compliance/history")
            .query_opt("project", project.as_deref())
            .query_opt("limit", limit.as_deref()),
        ComplianceAction::Run { project } => {
            let req = Request::post("/api/compliance/run");
            match project {
                Some(project) => req.body(json_body(&ProjectBody { project })?),
                None => req,
            }
        }
    })
}

fn templates_request(action: &TemplatesAction) -> Result<Request> {
    Ok(match action {
        TemplatesAction::List { kind, tag } => Request::get("/api/templates")
            .query_opt("kind", kind.as_deref())
            .query_opt("tag", tag.as_deref()),
        TemplatesAction::Get { id } => Request::get(format!("/api/templates/{id}")),
        TemplatesAction::Create(args) => {
            let bytes = args.body.read()?;
            let data = json_payload(&bytes, "template data")?;
            Request::post("/api/templates").body(json_body(&TemplateBody {
                id: &args.id,
                name: &args.name,
                kind: &args.kind,
                data: &data,
                tags: split_list(args.tags.as_deref()),
            })?)
        }
        TemplatesAction::Delete { id } => Request::delete(format!("/api/templates/{id}")),
        TemplatesAction::Apply { id, project } => {
            Request::post(format!("/api/templates/{id}/apply"))
                .body(json_body(&ProjectBody { project })?)
        }
    })
}

fn audit_request(args: &AuditArgs) -> Request {
    match &args.command {
        Some(AuditAction::Summary { from, to }) => Request::get("/api/audit/summary")
            .query_opt("from", from.as_deref())
            .query_opt("to", to.as_deref()),
        None => {
            let f = &args.filters;
            Request::get("/api/audit")
                .query_opt("instance", f.instance.as_deref())
                .query_opt("action", f.action.as_deref())
                .query_opt("resource", f.resource.as_deref())
                .query_opt("from", f.from.as_deref())
                .query_opt("to", f.to.as_deref())
                .query_opt("limit", f.limit.as_deref())
        }
    }
}

fn metrics_request(action: &MetricsAction) -> Request {
    match action {
        MetricsAction::Agents {
            id,
            instance_id,
            period,
        } => {
            let path = match id {
                Some(id) => format!("/api/metrics/agents/{id}"),
                None => "/api/metrics/agents".to_string(),
            };
            Request::get(path)
                .query_opt("instance_id", instance_id.as_deref())
                .query_opt("period", period.as_deref())
        }
    }
}

fn instances_request(action: &InstancesAction) -> Request {
    match action {
        InstancesAction::List => Request::get("/api/instances"),
        InstancesAction::Get { id } => Request::get(format!("/api/instances/{id}")),
        InstancesAction::Stale => Request::get("/api/instances/stale"),
    }
}

/// The single request behind a pass-through command. Composite and local
/// commands have none.
pub fn simple_request(command: &Commands) -> Result<Option<Request>> {
    let req = match command {
        Commands::Status => Request::get("/health"),
        Commands::State { action } => state_request(action)?,
        Commands::Specs { action } => specs_request(action)?,
        Commands::Events { action } => match action {
            EventsAction::Publish { topic, body } => publish_request(topic, body)?,
            EventsAction::History(args) => events_history_request(args),
            EventsAction::Subscribe { .. } => return Ok(None),
        },
        Commands::Rules { action } => match action {
            RulesAction::Import { body } => rules_import_request(body)?,
            RulesAction::Export(args) => rules_export_request(args.source.as_deref()),
        },
        Commands::Webhooks { action } => webhooks_request(action)?,
        Commands::Compliance { action } => compliance_request(action)?,
        Commands::Templates { action } => templates_request(action)?,
        Commands::Audit(args) => audit_request(args),
        Commands::Metrics { action } => metrics_request(action),
        Commands::Instances { action } => instances_request(action),
        Commands::Register(args) => {
            Request::post("/api/instances/register").body(json_body(&RegisterBody {
                name: &args.name,
                workspace: args.workspace.as_deref().unwrap_or_default(),
                intent: args.intent.as_deref().unwrap_or_default(),
            })?)
        }
        Commands::Activate { id } => Request::post(format!("/api/instances/{id}/activate")),
        Commands::Contract { .. }
        | Commands::Backup { .. }
        | Commands::Restore { .. }
        | Commands::Config { .. } => return Ok(None),
    };
    Ok(Some(req))
}

fn connect() -> Result<KoorClient> {
    let cfg = config::resolve();
    KoorClient::new(&cfg.server, &cfg.token)
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

pub fn handle(command: Commands, pretty: bool) -> Result<()> {
    match command {
        Commands::Config { action } => handle_config(action),
        Commands::Contract { action } => handle_contract(action, pretty),
        Commands::Backup { output } => {
            let summary = run_backup(&connect()?, &output)?;
            print_lines(&summary.lines());
            Ok(())
        }
        Commands::Restore { file } => {
            let summary = run_restore(&connect()?, &file)?;
            print_lines(&summary.lines());
            Ok(())
        }
        Commands::Events {
            action: EventsAction::Subscribe { pattern },
        } => {
            let pattern = pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
            run_fallback(&connect()?, pattern, &mut std::io::stdout().lock())
        }
        Commands::Rules {
            action:
                RulesAction::Export(ExportArgs {
                    source,
                    output: Some(output),
                }),
        } => handle_rules_export_to_file(source.as_deref(), &output),
        other => match simple_request(&other)? {
            Some(req) => {
                let resp = connect()?.send(&req)?;
                print_body(&resp.body, pretty)?;
                Ok(())
            }
            None => Ok(()),
        },
    }
}

fn handle_rules_export_to_file(source: Option<&str>, output: &Path) -> Result<()> {
    let resp = connect()?.send(&rules_export_request(source))?;
    write_atomic(output, &render_body(&resp.body, true), 0o644)?;
    println!("rules exported to {}", output.display());
    Ok(())
}

fn handle_contract(action: ContractAction, pretty: bool) -> Result<()> {
    match action {
        ContractAction::Set { contract, body } => {
            let (project, name) = require_resource(&contract)?;
            let req = contract::set_request(project, name, body.read()?)?;
            let resp = connect()?.send(&req)?;
            print_body(&resp.body, pretty)?;
            Ok(())
        }
        ContractAction::Get { contract } => {
            let (project, name) = require_resource(&contract)?;
            let resp = connect()?.send(&contract::get_request(project, name))?;
            print_body(&resp.body, true)?;
            Ok(())
        }
        ContractAction::Validate(args) => {
            let (project, name) = require_resource(&args.contract)?;
            let payload = match (&args.payload, &args.file) {
                (Some(inline), _) => Some(inline.clone().into_bytes()),
                (None, Some(path)) => Some(read_file(path)?),
                (None, None) => None,
            };
            let report = contract::validate(
                &connect()?,
                project,
                name,
                &args.endpoint,
                &args.direction,
                payload.as_deref(),
            )?;
            print_lines(&report.lines);
            if report.passed {
                Ok(())
            } else {
                Err(KoorError::ValidationFailed(format!(
                    "{} {} failed contract validation",
                    args.direction, args.endpoint
                )))
            }
        }
        ContractAction::Test { contract, target } => {
            let (project, name) = require_resource(&contract)?;
            let report = contract::run_tests(&connect()?, project, name, &target)?;
            print_lines(&report.lines());
            if report.passed() {
                Ok(())
            } else {
                Err(KoorError::ValidationFailed(format!(
                    "{} of {} endpoints failed",
                    report.failed_count(),
                    report.results.len()
                )))
            }
        }
    }
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    handle_config_with_path(action, &config_path(), &mut stdout)
}

pub fn handle_config_with_path<W: Write>(
    action: ConfigAction,
    path: &Path,
    out: &mut W,
) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => set_value_at(path, &key, &value),
        ConfigAction::Path => {
            writeln!(out, "{}", path.display())?;
            Ok(())
        }
        ConfigAction::Show => {
            let cfg = resolve_from(path);
            let token = if cfg.token.is_empty() {
                "(unset)".to_string()
            } else {
                mask_secret(&cfg.token)
            };
            writeln!(out, "path: {}", path.display())?;
            writeln!(out, "server: {} ({})", cfg.server, cfg.server_source)?;
            writeln!(out, "token: {token}")?;
            Ok(())
        }
    }
}
