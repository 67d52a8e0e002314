//! lib.rs – command-line front end for the pull-force record log.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pullforce_core::{
    AppendOptions, BatchRow, XlsxEditor, append_batch, auth::CredentialStore, last_recorded_key,
    needs_same_day_confirmation, output_file_name, scan,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};


#[derive(Debug, Parser)]
#[command(name = "pullforce-log")]
#[command(about = "Append pull-force measurement records to an XLSX control-chart template.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Append a batch of records and write the result next to the input.
    Append(AppendArgs),
    /// Print the key of the last recorded row.
    LastKey(SheetArgs),
    /// List the sheets of a workbook in order.
    Sheets {
        input: PathBuf,
    },
    /// Check a username/password pair against a credential store.
    Verify(AuthArgs),
}

#[derive(Debug, Parser)]
pub struct SheetArgs {
    pub input: PathBuf,

    /// Data sheet; the first visible sheet is used when it does not exist.
    #[arg(long, default_value = "Data")]
    pub sheet: String,
}

#[derive(Debug, Parser)]
pub struct AppendArgs {
    #[command(flatten)]
    pub target: SheetArgs,

    /// JSON array of `{"date", "values": [6 strings], "owner"}`.
    #[arg(long)]
    pub rows: PathBuf,

    /// Output path. Defaults to `<input stem>-out.<ext>`.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Accept two unkeyed rows of one day (or one explicit key twice).
    #[arg(long)]
    pub confirm_same_day: bool,

    #[arg(long, default_value = "Calibri")]
    pub owner_font: String,

    #[arg(long, default_value_t = 11.0)]
    pub owner_font_size: f64,

    /// Require a login against this credential store before writing anything.
    #[arg(long, requires = "user")]
    pub credentials: Option<PathBuf>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, env = "PULLFORCE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Parser)]
pub struct AuthArgs {
    /// JSON object `{user: {algo, iter, salt, hash}}`.
    #[arg(long)]
    pub credentials: PathBuf,

    #[arg(long)]
    pub user: String,

    #[arg(long, env = "PULLFORCE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

fn login(credentials: &Path, user: &str, password: &str) -> Result<()> {
    let store = CredentialStore::load(credentials)?;
    if !store.verify(user, password) {
        bail!("invalid username or password");
    }
    debug!(user, "login accepted");
    Ok(())
}

/// Runs one command; human-readable results go to `out`.
pub fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    match cli.command {
        Command::Append(args) => {
            let written = append(&args)?;
            writeln!(out, "{}", written.display())?;
        }
        Command::LastKey(args) => {
            let bytes = read_workbook(&args.input)?;
            let key = last_recorded_key(&bytes, &args.sheet)?;
            writeln!(out, "{key}")?;
        }
        Command::Sheets { input } => {
            for name in scan(&input)? {
                writeln!(out, "{name}")?;
            }
        }
        Command::Verify(auth) => {
            login(&auth.credentials, &auth.user, &auth.password)?;
            writeln!(out, "ok")?;
        }
    }
    Ok(())
}

/// Appends the rows file to the workbook and returns the written path.
pub fn append(args: &AppendArgs) -> Result<PathBuf> {
    if let Some(credentials) = &args.credentials {
        let user = args.user.as_deref().unwrap_or_default();
        login(credentials, user, args.password.as_deref().unwrap_or_default())?;
    }

    let rows = load_rows(&args.rows)?;
    if !args.confirm_same_day && needs_same_day_confirmation(&rows) {
        bail!(
            "the batch repeats a date or key; re-run with --confirm-same-day to append it anyway"
        );
    }

    let input = &args.target.input;
    let opts = AppendOptions {
        sheet_name: args.target.sheet.clone(),
        owner_font_name: args.owner_font.clone(),
        owner_font_size: args.owner_font_size,
    };
    let mut editor = XlsxEditor::open(input, &opts.sheet_name)?;
    let outcome = append_batch(&mut editor, &rows, &opts)?;
    let bytes = editor.into_bytes()?;

    let dst = match &args.out {
        Some(p) => p.clone(),
        None => PathBuf::from(output_file_name(&input.to_string_lossy())),
    };
    write_atomically(&dst, &bytes)?;

    info!(
        sheet = %outcome.sheet_name,
        rows = outcome.appended.len(),
        last_row = outcome.last_row(),
        first_key = outcome.appended.first().map(|r| r.key.as_str()),
        last_key = outcome.appended.last().map(|r| r.key.as_str()),
        dst = %dst.display(),
        "workbook written"
    );
    Ok(dst)
}

pub fn load_rows(path: &Path) -> Result<Vec<BatchRow>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading rows file {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("{} is not a JSON row array", path.display()))
}

fn read_workbook(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading workbook {}", path.display()))
}

/// Writes through a temp file in the destination directory; `dst` only
/// appears once the whole workbook is on disk.
pub fn write_atomically(dst: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst)
        .with_context(|| format!("writing {}", dst.display()))?;
    Ok(())
}
