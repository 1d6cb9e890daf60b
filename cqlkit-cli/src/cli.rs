use clap::{Args, Parser};
use std::path::PathBuf;

use cqlkit_core::{Consistency, OutputFormat, TimeZoneSetting};

const AFTER_HELP: &str = "If none of -q, --query-ranges, --query-partition-keys and FILE is \
given, queries are read from STDIN, one per line.";

/// Where the queries of a run come from
#[derive(Args, Debug, Clone, Default)]
#[group(id = "source", multiple = false)]
pub struct SourceArgs {
    /// The CQL query to execute. If specified, it overrides FILE and STDIN
    #[arg(short = 'q', long = "query", value_name = "CQL")]
    pub query: Option<String>,

    /// The CQL query is split by the token ranges. WHERE is not allowed in the query
    #[arg(long = "query-ranges", value_name = "CQL")]
    pub query_ranges: Option<String>,

    /// Query the partition key(s) of a table
    #[arg(long = "query-partition-keys", value_name = "TABLE")]
    pub query_partition_keys: Option<String>,

    /// File of CQL queries, one per line
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Flags shared by every exporter
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// The contact points, separated by ','
    #[arg(short = 'c', value_name = "HOSTS")]
    pub hosts: Option<String>,

    /// The user to authenticate
    #[arg(short = 'u', value_name = "USER")]
    pub username: Option<String>,

    /// The password to authenticate
    #[arg(short = 'p', value_name = "PASSWORD", env = "CQLKIT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// The keyspace to use
    #[arg(short = 'k', value_name = "KEYSPACE")]
    pub keyspace: Option<String>,

    /// The consistency level (any, one, two, three, quorum, all, local_quorum,
    /// each_quorum, serial, local_serial, local_one)
    #[arg(long, value_name = "LEVEL", value_parser = parse_consistency)]
    pub consistency: Option<Consistency>,

    /// The page size of each query. Default is 5000
    #[arg(long = "fetch-size", visible_alias = "fetchSize", value_name = "SIZE",
          value_parser = clap::value_parser!(i32).range(1..))]
    pub fetch_size: Option<i32>,

    /// Connection timeout in seconds; default: 5
    #[arg(long = "connect-timeout", value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    /// Request timeout in seconds; default: 12
    #[arg(long = "request-timeout", value_name = "SECONDS")]
    pub request_timeout: Option<u64>,

    /// The level of parallelism. Default is sequential, or the number of CPUs
    /// for range and partition key queries
    #[arg(short = 'P', long = "parallel", value_name = "N",
          value_parser = clap::value_parser!(u32).range(1..))]
    pub parallel: Option<u32>,

    /// Insert a column of line numbers at the front of the output
    #[arg(short = 'l', long = "linenumbers")]
    pub line_numbers: bool,

    /// Custom timestamp format (strftime). Default is "%Y-%m-%dT%H:%M:%S%.3f%z"
    #[arg(long = "date-format", value_name = "PATTERN")]
    pub date_format: Option<String>,

    /// Time zone for timestamps: local, utc or an offset like +08:00
    #[arg(long = "time-zone", value_name = "ZONE", allow_hyphen_values = true,
          value_parser = parse_time_zone)]
    pub time_zone: Option<TimeZoneSetting>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use an alternative cqlshrc file location. Default is ~/.cassandra/cqlshrc
    #[arg(long, value_name = "FILE")]
    pub cqlshrc: Option<PathBuf>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long)]
    pub quiet: bool,
}

/// Output options of one exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArgs {
    pub format: OutputFormat,
    pub header: bool,
    pub json_columns: Option<String>,
    pub json_array: bool,
}

/// Parsed command line of any exporter
pub trait ExporterArgs: Parser {
    fn common(&self) -> &CommonArgs;
    fn output(&self) -> OutputArgs;
}

/// Export CQL query results as CSV
#[derive(Parser, Debug)]
#[command(name = "cql2csv", version, after_help = AFTER_HELP)]
pub struct Cql2CsvArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not output column names
    #[arg(short = 'H', long = "no-header-row")]
    pub no_header_row: bool,
}

impl ExporterArgs for Cql2CsvArgs {
    fn common(&self) -> &CommonArgs {
        &self.common
    }

    fn output(&self) -> OutputArgs {
        OutputArgs {
            format: OutputFormat::Csv,
            header: !self.no_header_row,
            json_columns: None,
            json_array: false,
        }
    }
}

/// Export CQL query results as JSON
#[derive(Parser, Debug)]
#[command(name = "cql2json", version, after_help = AFTER_HELP)]
pub struct Cql2JsonArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The columns that contain JSON strings, separated by ','
    #[arg(short = 'j', long = "json-columns", value_name = "COLUMNS")]
    pub json_columns: Option<String>,

    /// Wrap all records in one JSON array instead of one object per line
    #[arg(long = "json-array")]
    pub json_array: bool,
}

impl ExporterArgs for Cql2JsonArgs {
    fn common(&self) -> &CommonArgs {
        &self.common
    }

    fn output(&self) -> OutputArgs {
        OutputArgs {
            format: OutputFormat::Json,
            header: false,
            json_columns: self.json_columns.clone(),
            json_array: self.json_array,
        }
    }
}

/// Render CQL query results as CQL statements
#[derive(Parser, Debug)]
#[command(name = "cql2cql", version, after_help = AFTER_HELP)]
pub struct Cql2CqlArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// The statement template; each '?' takes the next column's value
    #[arg(short = 'T', long = "template", value_name = "CQL", required = true)]
    pub template: String,
}

impl ExporterArgs for Cql2CqlArgs {
    fn common(&self) -> &CommonArgs {
        &self.common
    }

    fn output(&self) -> OutputArgs {
        OutputArgs {
            format: OutputFormat::Cql(self.template.clone()),
            header: false,
            json_columns: None,
            json_array: false,
        }
    }
}

fn parse_consistency(level: &str) -> Result<Consistency, String> {
    level.parse().map_err(|e: cqlkit_core::Error| e.to_string())
}

/// Parse `local`, `utc`, `+HH:MM`, `-HH:MM` or `+HHMM`
pub fn parse_time_zone(zone: &str) -> Result<TimeZoneSetting, String> {
    let zone = zone.trim();
    match zone.to_lowercase().as_str() {
        "local" => return Ok(TimeZoneSetting::Local),
        "utc" | "z" => return Ok(TimeZoneSetting::Utc),
        _ => {}
    }

    let invalid = || format!("Invalid time zone: {}", zone);
    let (sign, rest) = match zone.chars().next() {
        Some('+') => (1, &zone[1..]),
        Some('-') => (-1, &zone[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(TimeZoneSetting::Offset(sign * (hours * 3600 + minutes * 60)))
}
