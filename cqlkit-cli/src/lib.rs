//! Command-line front end shared by `cql2csv`, `cql2json` and `cql2cql`
//!
//! Each binary parses its own [`ExporterArgs`] and hands over to
//! [`main_with`], which merges flags with the config file, connects to the
//! cluster, resolves the queries and drives the core execution engine with
//! stdout as the output stream.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod source;

use anyhow::{Context, Result};
use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cqlkit_core::cluster::ClusterSession;
use cqlkit_core::config::DEFAULT_DATE_FORMAT;
use cqlkit_core::planner::normalize_identifier;
use cqlkit_core::{
    Consistency, DateFormat, EncoderConfig, ExecutionConfig, ExecutionEngine, Layout,
    OutputFormat, OutputSink, RecordEncoder, RetryPolicy, TimeZoneSetting,
};

use crate::cli::{CommonArgs, ExporterArgs, OutputArgs};
use crate::cluster::{ClusterOptions, ScyllaCluster};
use crate::config::Config;
use crate::source::QuerySource;

/// Everything a run needs, after flags and config file are merged
#[derive(Debug, Clone)]
pub struct Settings {
    pub cluster: ClusterOptions,
    pub execution: ExecutionConfig,
    pub encoder: EncoderConfig,
    pub format: OutputFormat,
    pub layout: Layout,
    pub source: QuerySource,
}

impl Settings {
    /// Flags win over the config file, the config file over defaults
    pub fn resolve(common: &CommonArgs, output: OutputArgs, config: &Config) -> Result<Self> {
        let source = QuerySource::from_args(&common.source)?;
        let defaults = ClusterOptions::default();

        let hosts = match &common.hosts {
            Some(hosts) => split_hosts(hosts),
            None => config.connection.hosts.clone(),
        };
        let cluster = ClusterOptions {
            hosts: if hosts.is_empty() { defaults.hosts } else { hosts },
            username: common
                .username
                .clone()
                .or_else(|| config.authentication.username.clone()),
            password: common
                .password
                .clone()
                .or_else(|| config.authentication.password.clone()),
            keyspace: common
                .keyspace
                .as_deref()
                .or(config.authentication.keyspace.as_deref())
                .map(normalize_identifier),
            connect_timeout: common
                .connect_timeout
                .or(config.connection.timeout)
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: common
                .request_timeout
                .or(config.connection.request_timeout)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            fetch_size: common
                .fetch_size
                .or(config.connection.fetch_size)
                .unwrap_or(defaults.fetch_size),
        };
        if cluster.fetch_size < 1 {
            anyhow::bail!("Invalid fetch size: {}", cluster.fetch_size);
        }

        let consistency = match (common.consistency, &config.connection.consistency) {
            (Some(level), _) => level,
            (None, Some(level)) => level
                .parse::<Consistency>()
                .context("Invalid consistency in config file")?,
            (None, None) => Consistency::default(),
        };
        let parallelism = match common.parallel {
            Some(n) => n as usize,
            None if source.is_range_query() => num_cpus::get(),
            None => 1,
        };
        let execution = ExecutionConfig {
            parallelism,
            consistency,
            retry: RetryPolicy::default(),
        };

        let time_zone = match (common.time_zone, &config.output.time_zone) {
            (Some(zone), _) => zone,
            (None, Some(zone)) => crate::cli::parse_time_zone(zone).map_err(anyhow::Error::msg)?,
            (None, None) => TimeZoneSetting::default(),
        };
        let pattern = common
            .date_format
            .clone()
            .or_else(|| config.output.date_format.clone())
            .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
        let mut encoder = EncoderConfig {
            date_format: DateFormat::new(pattern, time_zone)?,
            line_numbers: common.line_numbers,
            header: output.header,
            json_array: output.json_array,
            ..EncoderConfig::default()
        };
        if let Some(columns) = &output.json_columns {
            encoder = encoder.with_json_columns(columns);
        }

        let layout = if output.json_array {
            Layout::JsonArray
        } else {
            Layout::Lines
        };

        Ok(Self {
            cluster,
            execution,
            encoder,
            format: output.format,
            layout,
            source,
        })
    }
}

fn split_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the flags
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Entry point of every exporter binary
pub fn main_with<A: ExporterArgs>() -> ExitCode {
    let args = match A::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // --help and --version are reported through the error path too
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.common().verbose, args.common().quiet);

    match run(args.common(), args.output()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Resolve settings, then export on a runtime sized to the parallelism
pub fn run(common: &CommonArgs, output: OutputArgs) -> Result<()> {
    let mut config = Config::load(common.config.as_deref())?;
    if let Some(cqlshrc) = Config::load_cqlshrc(common.cqlshrc.as_deref())? {
        config = config.or(cqlshrc);
    }
    let settings = Settings::resolve(common, output, &config)?;
    debug!(
        parallelism = settings.execution.parallelism,
        consistency = %settings.execution.consistency,
        source = ?settings.source,
        "resolved settings"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.execution.parallelism.max(1))
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(export(settings))
}

async fn export(settings: Settings) -> Result<()> {
    let cluster = ScyllaCluster::connect(&settings.cluster)
        .await
        .context("Failed to connect to cluster")?;
    let session: Arc<dyn ClusterSession> = Arc::new(cluster);

    let outcome = execute(&settings, Arc::clone(&session)).await;
    if let Err(err) = session.close().await {
        debug!(error = %err, "closing session failed");
    }
    outcome
}

async fn execute(settings: &Settings, session: Arc<dyn ClusterSession>) -> Result<()> {
    let queries = settings.source.queries(session.as_ref()).await?;
    let encoder = RecordEncoder::for_format(&settings.format, &settings.encoder)?;
    let sink = OutputSink::new(BufWriter::new(io::stdout()), settings.layout);

    let engine = ExecutionEngine::new(session, encoder, sink, settings.execution.clone());
    let summary = engine.run(queries).await?;
    info!(
        queries = summary.queries,
        rows = summary.rows,
        retries = summary.retries,
        "export finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cql2CsvArgs, Cql2JsonArgs};

    fn resolve<A: ExporterArgs>(argv: &[&str], config: &Config) -> Result<Settings> {
        let args = A::try_parse_from(argv)?;
        Settings::resolve(args.common(), args.output(), config)
    }

    #[test]
    fn test_defaults_without_flags_or_config() {
        let settings = resolve::<Cql2CsvArgs>(&["cql2csv", "-q", "select 1"], &Config::default())
            .unwrap();
        assert_eq!(settings.cluster, ClusterOptions::default());
        assert_eq!(settings.execution.parallelism, 1);
        assert_eq!(settings.execution.consistency, Consistency::One);
        assert_eq!(settings.execution.retry, RetryPolicy::default());
        assert!(settings.encoder.header);
        assert_eq!(settings.layout, Layout::Lines);
        assert_eq!(settings.source, QuerySource::Literal("select 1".to_string()));
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.connection.hosts = vec!["cfg-host".to_string()];
        config.connection.consistency = Some("quorum".to_string());
        config.connection.request_timeout = Some(60);
        config.authentication.keyspace = Some("cfg_ks".to_string());

        let settings = resolve::<Cql2CsvArgs>(
            &["cql2csv", "-c", "a, b:9043", "-k", "shop", "-q", "select 1"],
            &config,
        )
        .unwrap();
        assert_eq!(settings.cluster.hosts, vec!["a", "b:9043"]);
        assert_eq!(settings.cluster.keyspace.as_deref(), Some("shop"));
        assert_eq!(settings.cluster.request_timeout, Duration::from_secs(60));
        assert_eq!(settings.execution.consistency, Consistency::Quorum);
    }

    #[test]
    fn test_keyspace_names_follow_cql_case_rules() {
        let settings =
            resolve::<Cql2CsvArgs>(&["cql2csv", "-k", "Shop", "-q", "select 1"], &Config::default())
                .unwrap();
        assert_eq!(settings.cluster.keyspace.as_deref(), Some("shop"));

        let settings = resolve::<Cql2CsvArgs>(
            &["cql2csv", "-k", "\"Shop\"", "-q", "select 1"],
            &Config::default(),
        )
        .unwrap();
        assert_eq!(settings.cluster.keyspace.as_deref(), Some("Shop"));

        let mut config = Config::default();
        config.authentication.keyspace = Some("Analytics".to_string());
        let settings = resolve::<Cql2CsvArgs>(&["cql2csv", "-q", "select 1"], &config).unwrap();
        assert_eq!(settings.cluster.keyspace.as_deref(), Some("analytics"));
    }

    #[test]
    fn test_range_queries_default_to_cpu_parallelism() {
        let settings = resolve::<Cql2CsvArgs>(
            &["cql2csv", "--query-partition-keys", "shop.orders"],
            &Config::default(),
        )
        .unwrap();
        assert_eq!(settings.execution.parallelism, num_cpus::get());

        let settings = resolve::<Cql2CsvArgs>(
            &["cql2csv", "-P", "3", "--query-ranges", "select * from shop.orders"],
            &Config::default(),
        )
        .unwrap();
        assert_eq!(settings.execution.parallelism, 3);
    }

    #[test]
    fn test_json_output_settings() {
        let settings = resolve::<Cql2JsonArgs>(
            &["cql2json", "-j", "payload, meta", "--json-array", "-l", "-q", "select 1"],
            &Config::default(),
        )
        .unwrap();
        assert_eq!(settings.layout, Layout::JsonArray);
        assert!(settings.encoder.json_array);
        assert!(settings.encoder.line_numbers);
        assert!(settings.encoder.is_json_column("payload"));
        assert!(settings.encoder.is_json_column("meta"));
    }

    #[test]
    fn test_invalid_config_values_are_errors() {
        let mut config = Config::default();
        config.connection.consistency = Some("most".to_string());
        assert!(resolve::<Cql2CsvArgs>(&["cql2csv", "-q", "select 1"], &config).is_err());

        let mut config = Config::default();
        config.output.time_zone = Some("Mars/Olympus".to_string());
        assert!(resolve::<Cql2CsvArgs>(&["cql2csv", "-q", "select 1"], &config).is_err());
    }
}
