//! protomatch - Match renamed Protocol Buffer types against a reference schema
//!
//! This tool loads a compiled descriptor set for an obfuscated schema and one
//! for a reference schema, compares their types by structure and reports
//! exact, unique and perfectly re-mappable types. The `sequential` command
//! walks the obfuscated types one at a time and records the user's decisions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use protomatch_core::config::{DEFAULT_SCORE_GAP, DEFAULT_THRESHOLD};
use protomatch_core::signature::DEFAULT_MAX_DEPTH;
use protomatch_core::{
    load_schema, CandidatePair, MatchConfig, MatchIndex, Schema, ScoreWeights,
    Session, Side, SignatureConfig, TypeId,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Match renamed Protocol Buffer types against a reference schema by structure
#[derive(Parser, Debug)]
#[command(name = "protomatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Descriptor set (protoc --descriptor_set_out) of the reference schema
    #[arg(long, env = "PROTOMATCH_REFERENCE")]
    reference: PathBuf,

    /// Descriptor set of the obfuscated schema
    #[arg(long, env = "PROTOMATCH_OBFUSCATED")]
    obfuscated: PathBuf,

    /// JSON array of obfuscated proto names; sets the sequential order
    #[arg(long, env = "PROTOMATCH_OBS_LIST")]
    obs_list: Option<PathBuf>,

    /// JSON array of reference proto names; used for positions in reports
    #[arg(long, env = "PROTOMATCH_REF_LIST")]
    ref_list: Option<PathBuf>,

    /// Minimum similarity for a candidate (0.0 - 1.0)
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD, env = "PROTOMATCH_THRESHOLD")]
    threshold: f64,

    /// Candidates within this score of the best one make a match ambiguous
    #[arg(long, default_value_t = DEFAULT_SCORE_GAP, env = "PROTOMATCH_GAP")]
    gap: f64,

    /// Credit for fields matched on shape but not on number (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    renumber_weight: f64,

    /// Deepest nesting level at which messages are still expanded
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: u32,

    /// Match nested types as well as top-level ones
    #[arg(long)]
    include_nested: bool,

    /// Keep references to empty messages and enums instead of treating them as bytes
    #[arg(long)]
    keep_empty_messages: bool,

    /// Maximum number of candidates shown per type
    #[arg(long, default_value_t = 5)]
    max_display: usize,

    /// Output directory for JSON results
    #[arg(short, long, default_value = "output", env = "PROTOMATCH_OUTPUT")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print types whose signature is unique within their own schema
    #[command(alias = "u")]
    Uniques {
        /// Schema to list
        #[arg(value_enum, default_value = "ref")]
        side: SideArg,
    },
    /// Print groups of types sharing one signature across both schemas
    #[command(alias = "em")]
    ExactMatches,
    /// Print exact matches whose referenced types are all unique as well
    #[command(alias = "pm")]
    PerfectMappables,
    /// Show the signature and best matches of one type from either schema
    #[command(alias = "s")]
    Search {
        /// Type name, fully qualified or relative to its package
        name: String,
    },
    /// Walk the obfuscated types one at a time and confirm matches
    #[command(alias = "sm")]
    Sequential,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    /// Reference schema
    Ref,
    /// Obfuscated schema
    Obs,
}

impl From<SideArg> for Side {
    fn from(arg: SideArg) -> Self {
        match arg {
            SideArg::Ref => Side::Reference,
            SideArg::Obs => Side::Obfuscated,
        }
    }
}

/// Ordered list of proto names as exported alongside a descriptor set
#[derive(Debug, Default)]
struct ProtoList {
    names: Vec<String>,
}

impl ProtoList {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read proto list: {}", path.display()))?;
        let names: Vec<String> = serde_json::from_str(&text)
            .with_context(|| {
                format!("Proto list is not a JSON array of names: {}", path.display())
            })?;
        debug!("Loaded {} names from {}", names.len(), path.display());
        Ok(Self { names })
    }

    fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a type given its fully qualified or display name
    fn position(&self, full_name: &str, display_name: &str) -> Option<usize> {
        self.names.iter().position(|entry| {
            let entry = entry.strip_suffix(".proto").unwrap_or(entry);
            entry == full_name || entry == display_name
        })
    }

    /// Types named by the list, in list order; unknown names are skipped
    fn resolve(&self, schema: &Schema) -> Vec<TypeId> {
        self.names
            .iter()
            .filter_map(|name| {
                let id = schema.find(name);
                if id.is_none() {
                    warn!("Proto list names unknown type {}", name);
                }
                id
            })
            .collect()
    }
}

/// Loaded index plus everything needed to render it
struct App {
    index: MatchIndex,
    obs_list: ProtoList,
    ref_list: ProtoList,
    max_display: usize,
}

impl App {
    fn list(&self, side: Side) -> &ProtoList {
        match side {
            Side::Obfuscated => &self.obs_list,
            Side::Reference => &self.ref_list,
        }
    }

    fn name(&self, side: Side, id: TypeId) -> &str {
        self.index.schema(side).name(id)
    }

    /// Type name followed by its proto list position, when known
    fn label(&self, side: Side, id: TypeId) -> String {
        let schema = self.index.schema(side);
        let Some(def) = schema.get(id) else {
            return id.to_string();
        };
        match self.list(side).position(&def.name, def.display_name()) {
            Some(position) => format!("{} [{}]", def.name, position),
            None => def.name.clone(),
        }
    }

    fn fingerprint(&self, side: Side, id: TypeId) -> String {
        self.index
            .signature(side, id)
            .map_or_else(|| "?".repeat(9), |signature| signature.fingerprint())
    }

    fn print_candidates(
        &self,
        out: &mut impl Write,
        side: Side,
        pairs: &[CandidatePair],
    ) -> io::Result<()> {
        writeln!(
            out,
            "Matches (showing {}/{}, threshold {:.0}%):",
            pairs.len().min(self.max_display),
            pairs.len(),
            self.index.config().threshold * 100.0
        )?;
        for (i, pair) in pairs.iter().take(self.max_display).enumerate() {
            let other = match side {
                Side::Obfuscated => self.label(Side::Reference, pair.reference),
                Side::Reference => self.label(Side::Obfuscated, pair.obfuscated),
            };
            writeln!(out, "  {:>2}. ({:5.1}%) {}", i + 1, pair.score * 100.0, other)?;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let app = load(&cli)?;
    let mut out = io::stdout().lock();

    match &cli.command {
        Command::Uniques { side } => print_uniques(&app, &mut out, (*side).into())?,
        Command::ExactMatches => {
            let matches = print_exact_matches(&app, &mut out)?;
            write_json(&cli.output, "exact_matches.json", &matches)?;
        }
        Command::PerfectMappables => {
            let mappables = print_perfect_mappables(&app, &mut out)?;
            write_json(&cli.output, "perfect_mappables.json", &mappables)?;
        }
        Command::Search { name } => search(&app, &mut out, name)?,
        Command::Sequential => {
            let mut input = io::stdin().lock();
            let matches = run_sequential(&app, &mut input, &mut out)?;
            write_json(&cli.output, "seq_matches.json", &matches)?;
            writeln!(out, "Finished sequential matching.")?;
        }
    }

    Ok(())
}

fn config(cli: &Cli) -> MatchConfig {
    MatchConfig::new()
        .threshold(cli.threshold)
        .score_gap_tolerance(cli.gap)
        .weights(ScoreWeights::default().renumber_weight(cli.renumber_weight))
        .signature(
            SignatureConfig::new()
                .max_depth(cli.max_depth)
                .empty_as_bytes(!cli.keep_empty_messages),
        )
        .include_nested(cli.include_nested)
}

/// Load both schemas and lists and build the index
fn load(cli: &Cli) -> Result<App> {
    let reference = load_schema(&cli.reference)
        .with_context(|| format!("Failed to load reference schema: {}", cli.reference.display()))?;
    let obfuscated = load_schema(&cli.obfuscated).with_context(|| {
        format!(
            "Failed to load obfuscated schema: {}",
            cli.obfuscated.display()
        )
    })?;
    info!(
        "Loaded {} reference and {} obfuscated types",
        reference.len(),
        obfuscated.len()
    );

    let index = MatchIndex::build(obfuscated, reference, config(cli))
        .context("Failed to build match index")?;

    Ok(App {
        index,
        obs_list: ProtoList::load(cli.obs_list.as_deref())?,
        ref_list: ProtoList::load(cli.ref_list.as_deref())?,
        max_display: cli.max_display,
    })
}

fn print_uniques(app: &App, out: &mut impl Write, side: Side) -> Result<()> {
    let uniques = app.index.uniques(side);
    for &id in uniques {
        writeln!(out, "({}) {}", app.fingerprint(side, id), app.label(side, id))?;
    }
    writeln!(out, "Total {} unique signatures: {}", side, uniques.len())?;
    Ok(())
}

/// Prints every exact match group and returns the 1:1 ones as reference -> obfuscated names
fn print_exact_matches(app: &App, out: &mut impl Write) -> Result<BTreeMap<String, String>> {
    let mut one_to_one = BTreeMap::new();
    writeln!(out, "{:<9}  {:<40}  {}", "Sign Hash", "Obfuscated", "Reference")?;
    for group in app.index.exact_matches() {
        let names = |side: Side| {
            group
                .members(side)
                .iter()
                .map(|&id| app.name(side, id))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(
            out,
            "{:<9}  {:<40}  {}",
            group.signature.fingerprint(),
            names(Side::Obfuscated),
            names(Side::Reference)
        )?;
        if group.is_one_to_one() {
            one_to_one.insert(
                app.name(Side::Reference, group.reference[0]).to_string(),
                app.name(Side::Obfuscated, group.obfuscated[0]).to_string(),
            );
        }
    }
    writeln!(
        out,
        "Found {} exact match groups ({} one-to-one) from {} unique reference types ({} total)",
        app.index.exact_matches().len(),
        one_to_one.len(),
        app.index.uniques(Side::Reference).len(),
        app.index.matchable(Side::Reference).count()
    )?;
    Ok(one_to_one)
}

fn print_perfect_mappables(app: &App, out: &mut impl Write) -> Result<BTreeMap<String, String>> {
    let mut mappables = BTreeMap::new();
    writeln!(out, "{:<9}  {:<40}  {}", "Sign Hash", "Obfuscated", "Reference")?;
    for &(obs, reference) in app.index.perfect_mappables() {
        writeln!(
            out,
            "{:<9}  {:<40}  {}",
            app.fingerprint(Side::Obfuscated, obs),
            app.name(Side::Obfuscated, obs),
            app.name(Side::Reference, reference)
        )?;
        mappables.insert(
            app.name(Side::Reference, reference).to_string(),
            app.name(Side::Obfuscated, obs).to_string(),
        );
    }
    let one_to_one = app
        .index
        .exact_matches()
        .iter()
        .filter(|group| group.is_one_to_one())
        .count();
    writeln!(
        out,
        "Found {} perfectly re-mappable types from {} one-to-one exact matches",
        mappables.len(),
        one_to_one
    )?;
    Ok(mappables)
}

/// Reference names are searched first, like the reports list them
fn search(app: &App, out: &mut impl Write, name: &str) -> Result<()> {
    let found = [Side::Reference, Side::Obfuscated]
        .into_iter()
        .find_map(|side| app.index.schema(side).find(name).map(|id| (side, id)));
    let Some((side, id)) = found else {
        bail!("No such type as {}", name);
    };
    let Some(signature) = app.index.signature(side, id) else {
        bail!("No signature for {}", name);
    };

    writeln!(out, "{} ({} type)", app.label(side, id), side)?;
    writeln!(out, "{}", signature)?;
    writeln!(
        out,
        "Field count: {} shallow, {} total; depth {}{}",
        signature.shallow_len(),
        signature.deep_len(),
        signature.depth(),
        if signature.is_truncated() { " (truncated)" } else { "" }
    )?;

    if let Some(group) = app.index.exact_match_for(side, id) {
        let others: Vec<String> = group
            .members(side.opposite())
            .iter()
            .map(|&other| app.label(side.opposite(), other))
            .collect();
        if group.is_one_to_one() {
            writeln!(out, "Unique exact match with {}", others.join(", "))?;
            let obs = group.obfuscated[0];
            if app.index.is_perfect(obs) {
                writeln!(out, "This type is also perfectly re-mappable!")?;
            }
            return Ok(());
        }
        writeln!(out, "Exact match with {}", others.join(", "))?;
    }

    let pairs = match side {
        Side::Obfuscated => app.index.candidates(id).to_vec(),
        Side::Reference => app.index.reverse_candidates(id),
    };
    if pairs.is_empty() {
        writeln!(out, "No matches found.")?;
    } else {
        app.print_candidates(out, side, &pairs)?;
    }
    Ok(())
}

/// One line of input during a sequential session
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    /// Confirm the n-th shown candidate (1-based)
    Accept(usize),
    /// Exclude the n-th shown candidate
    Exclude(usize),
    /// Exclude every shown candidate
    RejectAll,
    /// Defer the current type
    Skip,
    /// Add a reference type to the candidates
    Force(String),
    /// Withdraw a confirmation
    Unconfirm(String),
    /// End the session
    Quit,
}

impl Action {
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, Some(argument.trim())),
            None => (line, None),
        };
        let number = |text: &str| {
            text.parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("not a candidate number: {}", text))
        };
        match (command, argument) {
            ("", None) => Ok(Action::Accept(1)),
            ("s", None) => Ok(Action::Skip),
            ("x", None) => Ok(Action::RejectAll),
            ("x", Some(n)) => number(n).map(Action::Exclude),
            ("f", Some(name)) => Ok(Action::Force(name.to_string())),
            ("u", Some(name)) => Ok(Action::Unconfirm(name.to_string())),
            ("q", None) => Ok(Action::Quit),
            (n, None) if n.bytes().all(|b| b.is_ascii_digit()) => number(n).map(Action::Accept),
            _ => Err(format!("unknown command: {}", line)),
        }
    }
}

const SESSION_HELP: &str = concat!(
    "enter = accept best, N = accept N, x = exclude shown, x N = exclude N, s = skip,\n",
    "f NAME = add candidate, u NAME = unconfirm, q = quit"
);

fn read_line(input: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Runs a sequential session, returning confirmed pairs as reference -> obfuscated names
fn run_sequential(
    app: &App,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<BTreeMap<String, String>> {
    let index = &app.index;
    let mut session = if app.obs_list.is_empty() {
        Session::in_declaration_order(index)?
    } else {
        let worklist: Vec<TypeId> = app
            .obs_list
            .resolve(index.schema(Side::Obfuscated))
            .into_iter()
            .filter(|&id| index.is_matchable(Side::Obfuscated, id))
            .collect();
        Session::new(index, worklist)?
    };

    let auto = session.confirm_perfect_mappables()?;
    writeln!(out, "Confirmed {} perfectly re-mappable types", auto)?;
    writeln!(out, "{}", SESSION_HELP)?;

    loop {
        let Some(obs) = session.current() else {
            let (_, _, _, skipped) = session.progress();
            if skipped == 0 {
                break;
            }
            write!(out, "Revisit {} skipped types? [y/N] ", skipped)?;
            out.flush()?;
            match read_line(input)? {
                Some(answer) if answer.trim().eq_ignore_ascii_case("y") => {
                    session.revisit_skipped();
                    continue;
                }
                _ => break,
            }
        };

        let candidates = session.candidates(obs);
        writeln!(out)?;
        writeln!(
            out,
            "[{}/{}] {}",
            session.position() + 1,
            session.worklist().len(),
            app.label(Side::Obfuscated, obs)
        )?;
        if let Some(signature) = index.signature(Side::Obfuscated, obs) {
            writeln!(out, "{}", signature)?;
        }
        if let Some(mapping) = session.assignment().get(obs) {
            writeln!(
                out,
                "Current match ({}): {}",
                mapping.provenance.as_str(),
                app.label(Side::Reference, mapping.reference)
            )?;
        }
        if candidates.is_empty() {
            writeln!(out, "No open candidates.")?;
        } else {
            app.print_candidates(out, Side::Obfuscated, &candidates)?;
        }
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = read_line(input)? else {
            break;
        };
        let action = match Action::parse(&line) {
            Ok(action) => action,
            Err(message) => {
                writeln!(out, "{}\n{}", message, SESSION_HELP)?;
                continue;
            }
        };

        let shown = |n: usize| {
            let n = n.checked_sub(1)?;
            candidates.iter().take(app.max_display).nth(n).map(|pair| pair.reference)
        };
        let outcome = match action {
            Action::Quit => break,
            Action::Accept(n) => match shown(n) {
                Some(reference) => session.confirm(obs, reference),
                None => {
                    writeln!(out, "No candidate {}", n)?;
                    continue;
                }
            },
            Action::Exclude(n) => match shown(n) {
                Some(reference) => session.exclude(obs, reference),
                None => {
                    writeln!(out, "No candidate {}", n)?;
                    continue;
                }
            },
            Action::RejectAll => session.reject(obs, app.max_display),
            Action::Skip => session.skip(obs),
            Action::Force(name) => match index.schema(Side::Reference).find(&name) {
                Some(reference) => session.force_candidate(obs, reference),
                None => {
                    writeln!(out, "No reference type {}", name)?;
                    continue;
                }
            },
            Action::Unconfirm(name) => match index.schema(Side::Obfuscated).find(&name) {
                Some(other) => session.unconfirm(other),
                None => {
                    writeln!(out, "No obfuscated type {}", name)?;
                    continue;
                }
            },
        };
        if let Err(e) = outcome {
            writeln!(out, "{}", e)?;
        }
    }

    let (pending, confirmed, excluded, skipped) = session.progress();
    info!(
        "Session ended: {} confirmed, {} excluded, {} skipped, {} pending",
        confirmed, excluded, skipped, pending
    );
    Ok(session
        .confirmed()
        .iter()
        .map(|(&obs, &reference)| {
            (
                app.name(Side::Reference, reference).to_string(),
                app.name(Side::Obfuscated, obs).to_string(),
            )
        })
        .collect())
}

/// Write a JSON object into the output directory
fn write_json(output_dir: &Path, filename: &str, map: &BTreeMap<String, String>) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
    let path = output_dir.join(filename);
    let json = serde_json::to_string_pretty(map).context("Failed to serialize results")?;
    fs::write(&path, json).with_context(|| format!("Failed to write file: {}", path.display()))?;
    info!("Wrote {} entries to {}", map.len(), path.display());
    Ok(())
}
