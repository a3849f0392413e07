use clap::Parser;

/// Bulk student roster importer for the campus election portal.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The roster workbook to ingest. Must be a spreadsheet with a
    /// NAME, INDEX NO and EMAIL column; PHONE NO and a picture column are optional.
    #[clap(short, long, value_parser)]
    pub input: String,

    /// (file path) The JSON student record store to import into. Created on first use.
    #[clap(short, long, value_parser, default_value = "students.json")]
    pub store: String,

    /// (directory path or empty) Where uploaded student photos are written. When not
    /// specified, photos are skipped and the summary carries a warning.
    #[clap(short, long, value_parser)]
    pub media_dir: Option<String>,

    /// (file path, 'stdout' or empty) Where the ingestion summary is written in JSON
    /// format. Defaults to the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, rosterimp will
    /// check that the produced summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (regular expression) Overrides the anchored pattern student identifiers must
    /// match.
    #[clap(long, value_parser)]
    pub identifier_pattern: Option<String>,

    /// (string or empty) When specified, initial credentials are derived from this
    /// salt instead of defaulting to the student's email address.
    #[clap(long, value_parser)]
    pub credential_salt: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
