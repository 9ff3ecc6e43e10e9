use clap::{crate_authors, crate_description, crate_version, Arg, ArgAction, ArgMatches, Command};
use datagate::Value;
use log::{error, info};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

mod config;

fn statement_args() -> [Arg; 2] {
    [
        Arg::new("statement").required(true).index(1),
        Arg::new("param")
            .short('P')
            .long("param")
            .help("Bind parameter, parsed as JSON and falling back to a plain string")
            .action(ArgAction::Append),
    ]
}

// "42" binds an integer, "null" binds NULL, anything that isn't JSON binds as text
fn parse_param(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => Value::from_json(v),
        Err(_) => Value::Text(raw.to_string()),
    }
}

fn params(matches: &ArgMatches) -> Vec<Value> {
    matches
        .get_many::<String>("param")
        .map(|values| values.map(|v| parse_param(v)).collect())
        .unwrap_or_default()
}

fn cli() -> Command {
    Command::new("datagate")
        .about(crate_description!())
        .version(format!("v{}", crate_version!()))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .name("datagate")
        .author(crate_authors!())
        .arg(
            Arg::new("project")
                .short('p')
                .long("project")
                .help("The project in datagate.toml to use")
                .action(ArgAction::Set)
                .num_args(1),
        )
        .subcommands([
            Command::new("query")
                .about("Run a statement and print the returned records as JSON")
                .args(statement_args()),
            Command::new("execute")
                .about("Run a statement and print the number of affected rows")
                .args(statement_args()),
            Command::new("ping").about("Check that the database answers"),
        ])
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let config = config::resolve(matches.get_one::<String>("project").map(String::as_str))?;
    let mut handle = datagate::acquire(&config).await?;

    match matches.subcommand() {
        Some(("query", query_matches)) => {
            let statement = query_matches.get_one::<String>("statement").unwrap();
            let records = handle.query(statement, &params(query_matches)).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Some(("execute", query_matches)) => {
            let statement = query_matches.get_one::<String>("statement").unwrap();
            let affected = handle.execute(statement, &params(query_matches)).await?;
            println!("{}", affected);
        }
        Some(("ping", ..)) => {
            handle.ready().await?;
            info!("{} is ready", handle.backend());
        }
        _ => unreachable!(), // If all subcommands are defined above, anything else is unreachable
    }

    handle.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("Failed to initialize logger");

    let matches = cli().get_matches();

    if let Err(err) = run(matches).await {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("42"), Value::Int(42));
        assert_eq!(parse_param("1.5"), Value::Float(1.5));
        assert_eq!(parse_param("null"), Value::Null);
        assert_eq!(parse_param("true"), Value::Bool(true));
        assert_eq!(parse_param("\"42\""), Value::Text("42".to_string()));
        assert_eq!(parse_param("alice"), Value::Text("alice".to_string()));
        assert_eq!(
            parse_param(r#"{"a":1}"#),
            Value::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_project_requires_a_name() {
        assert!(cli().try_get_matches_from(["datagate", "-p", "ping"]).is_err());

        let matches = cli()
            .try_get_matches_from(["datagate", "-p", "local", "ping"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("project").map(String::as_str),
            Some("local")
        );
        assert_eq!(matches.subcommand_name(), Some("ping"));
    }

    #[test]
    fn test_params_keep_order() {
        let matches = Command::new("datagate")
            .subcommand(Command::new("query").args(statement_args()))
            .get_matches_from(["datagate", "query", "SELECT ?, ?", "-P", "1", "--param", "x"]);

        let (_, query_matches) = matches.subcommand().unwrap();
        assert_eq!(
            params(query_matches),
            vec![Value::Int(1), Value::Text("x".to_string())]
        );
    }
}
