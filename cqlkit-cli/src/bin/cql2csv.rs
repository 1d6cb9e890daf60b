use std::process::ExitCode;

use cqlkit_cli::cli::Cql2CsvArgs;

fn main() -> ExitCode {
    cqlkit_cli::main_with::<Cql2CsvArgs>()
}
