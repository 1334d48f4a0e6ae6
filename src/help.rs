pub const USAGE: &str = "\
koor-cli - command-line client for the Koor control-plane server

usage: koor-cli <command> [<subcommand>] [<args>...] [--flag value]... [--pretty]

general:
  status                                   server health
  help, --help, -h                         show this message

state:
  state list
  state get <key>
  state set <key> --file <path> | --data <json>
  state delete <key>
  state history <key> [--limit N]
  state rollback <key> --version V
  state diff <key> --v1 A --v2 B

specs:
  specs list <project>
  specs get <project>/<name>
  specs set <project>/<name> --file <path> | --data <json>
  specs delete <project>/<name>

events:
  events publish <topic> --file <path> | --data <json>
  events history [--last N] [--topic T] [--from F] [--to T] [--source S]
  events subscribe [<pattern>]

rules:
  rules import --file <path>
  rules export [--source S] [--output <path>]

contracts:
  contract set <project>/<name> --file <path> | --data <json>
  contract get <project>/<name>
  contract validate <project>/<name> --endpoint E [--direction request|response]
                    [--payload <json> | --file <path>]
  contract test <project>/<name> --target <url>

webhooks:
  webhooks list
  webhooks add --url <url> [--events a,b] [--secret S]
  webhooks delete <id>
  webhooks test <id>

compliance:
  compliance history [--project P] [--limit N]
  compliance run [--project P]

templates:
  templates list [--kind K] [--tag T]
  templates get <id>
  templates create --id <id> --name <name> --kind <kind> [--tags a,b]
                   --file <path> | --data <json>
  templates delete <id>
  templates apply <id> --project P

audit:
  audit [--instance I] [--action A] [--resource R] [--from F] [--to T] [--limit N]
  audit summary [--from F] [--to T]

agents and instances:
  metrics agents [<id>] [--instance_id I] [--period P]
  instances list
  instances get <id>
  instances stale
  register <name> [--workspace W] [--intent I]
  activate <id>

backup:
  backup --output <path>
  restore --file <path>

configuration:
  config set <server|token> <value>
  config show
  config path

environment:
  KOOR_SERVER   server base URL (overrides settings.json)
  KOOR_TOKEN    bearer token (overrides settings.json)
  KOOR_LOG      log filter, e.g. debug (default: warn)

settings are stored in ./settings.json
";
