#[cfg(not(all(feature = "replayer", feature = "export")))]
fn main() {
    eprintln!(
        "The sndarc CLI requires the \"replayer\" and \"export\" features. Rebuild with default features to enable it."
    );
}

#[cfg(all(feature = "replayer", feature = "export"))]
fn main() {
    std::process::exit(cli::run());
}

#[cfg(all(feature = "replayer", feature = "export"))]
mod cli {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use anyhow::{bail, Context};

    use sndarc::bank::BankFile;
    use sndarc::export::{export_to_wav, write_event_table};
    use sndarc::info::{SoundEntry, SoundPayload, SoundType};
    use sndarc::listing::{list_members, Glob, ListKind};
    use sndarc::synth::{RenderConfig, SequencePlayer, SequenceRenderer};
    use sndarc::wave::WaveArchive;
    use sndarc::{
        ArchiveContext, ByteView, Chunk, DiskFs, FileHalf, SequenceFile, SoundArchive,
    };

    struct CliOptions {
        list: Option<ListKind>,
        filter: String,
        seq_filter: String,
        csv: Option<String>,
        render: Option<String>,
        out: Option<PathBuf>,
        sample_rate: u32,
        verbose: bool,
        inputs: Vec<String>,
    }

    const USAGE: &str = "Usage: sndarc [OPTIONS] FILE...

Options:
  --list TYPE     List archive members (seq, strm, wave, file, group,
                  player, bank, label)
  --filter GLOB   Only list members whose name matches GLOB
  --seq GLOB      Sequence filter for label listing
  --csv NAME      Write the named sequence's event table as CSV
  --render NAME   Render the named sequence to a WAV file
  --out PATH      Output path for --csv/--render
  --rate HZ       Render sample rate (default 44100)
  --verbose       Include bookkeeping events and extra diagnostics
  --help          Show this help";

    fn parse_args() -> anyhow::Result<CliOptions> {
        let mut options = CliOptions {
            list: None,
            filter: String::new(),
            seq_filter: String::new(),
            csv: None,
            render: None,
            out: None,
            sample_rate: 44100,
            verbose: false,
            inputs: Vec::new(),
        };

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            let mut value_for = |name: &str| {
                args.next()
                    .with_context(|| format!("{name} requires a value"))
            };
            match arg.as_str() {
                "--list" => {
                    let keyword = value_for("--list")?;
                    options.list = Some(
                        ListKind::from_keyword(&keyword)
                            .with_context(|| format!("unknown list type: {keyword}"))?,
                    );
                }
                "--filter" => options.filter = value_for("--filter")?,
                "--seq" => options.seq_filter = value_for("--seq")?,
                "--csv" => options.csv = Some(value_for("--csv")?),
                "--render" => options.render = Some(value_for("--render")?),
                "--out" => options.out = Some(PathBuf::from(value_for("--out")?)),
                "--rate" => {
                    let value = value_for("--rate")?;
                    options.sample_rate = value
                        .parse()
                        .with_context(|| format!("invalid sample rate: {value}"))?;
                }
                "--verbose" => options.verbose = true,
                "--help" | "-h" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other if other.starts_with("--") => bail!("unknown option: {other}"),
                _ => options.inputs.push(arg.clone()),
            }
        }

        if options.inputs.is_empty() {
            bail!("no input files\n\n{USAGE}");
        }
        if options.list.is_none() && options.csv.is_none() && options.render.is_none() {
            options.list = Some(ListKind::Seq);
        }
        if options.list == Some(ListKind::Label) && options.seq_filter.is_empty() {
            bail!("listing labels requires --seq");
        }
        Ok(options)
    }

    pub fn run() -> i32 {
        let options = match parse_args() {
            Ok(options) => options,
            Err(err) => {
                eprintln!("{err}");
                return 1;
            }
        };

        // File-level failures report and move on to the next input.
        let mut failures = 0;
        for filename in &options.inputs {
            if let Err(err) = run_file(filename, &options) {
                eprintln!("Error while reading {filename}: {err:#}");
                failures += 1;
            }
        }
        if failures > 0 {
            1
        } else {
            0
        }
    }

    fn open_archive(
        filename: &str,
        options: &CliOptions,
    ) -> anyhow::Result<(SoundArchive, ArchiveContext)> {
        let path = Path::new(filename);
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut ctx = ArchiveContext::with_fs(Box::new(DiskFs::new(base)));
        ctx.options.verbose = options.verbose;

        let data = fs::read(path).with_context(|| format!("unable to open {filename}"))?;
        let archive = SoundArchive::open(&ByteView::from_vec(data))
            .with_context(|| format!("unable to load {filename}"))?;
        Ok((archive, ctx))
    }

    fn run_file(filename: &str, options: &CliOptions) -> anyhow::Result<()> {
        let (archive, ctx) = open_archive(filename, options)?;

        if let Some(kind) = options.list {
            let glob = Glob::new(&options.filter);
            let seq_glob = Glob::new(&options.seq_filter);
            let result = list_members(&archive, &ctx, kind, &glob, &seq_glob)?;
            print_listing(filename, options, kind, &result);
        }

        if let Some(name) = &options.csv {
            let sound = find_sequence(&archive, name)?;
            let seq = load_sequence(&archive, &ctx, sound)?;
            match &options.out {
                Some(path) => {
                    let file = fs::File::create(path)
                        .with_context(|| format!("unable to create {}", path.display()))?;
                    write_event_table(&seq, file)?;
                }
                None => write_event_table(&seq, io::stdout().lock())?,
            }
            report_warnings(&seq.warnings, options);
        }

        if let Some(name) = &options.render {
            render_sequence(&archive, &ctx, name, options)?;
        }

        Ok(())
    }

    fn print_listing(filename: &str, options: &CliOptions, kind: ListKind, result: &sndarc::ListResult) {
        if result.matches.is_empty() {
            let qualifier = if !options.filter.is_empty() {
                "matching "
            } else if result.named_only {
                "named "
            } else {
                ""
            };
            println!(
                "No {qualifier}{} found in {filename}",
                result.list_type_lc
            );
            return;
        }

        if kind == ListKind::Label {
            let mut last_seq = String::new();
            for entry in &result.matches {
                match entry.split_once('\\') {
                    Some((seq_name, label)) => {
                        if seq_name != last_seq {
                            println!("{} in {filename} - {seq_name}:", result.list_type);
                            last_seq = seq_name.to_string();
                        }
                        println!("\t{label}");
                    }
                    None => {
                        println!("No labels found in {filename} - {entry}");
                    }
                }
            }
            return;
        }

        println!("{} in {filename}:", result.list_type);
        for entry in &result.matches {
            println!("\t{entry}");
        }
    }

    fn find_sequence<'a>(archive: &'a SoundArchive, name: &str) -> anyhow::Result<&'a SoundEntry> {
        let glob = Glob::new(name);
        archive
            .info()?
            .sounds
            .iter()
            .find(|s| s.payload.sound_type() == SoundType::Seq && glob.matches(&s.name))
            .with_context(|| format!("no sequence matches '{name}'"))
    }

    fn load_sequence(
        archive: &SoundArchive,
        ctx: &ArchiveContext,
        sound: &SoundEntry,
    ) -> anyhow::Result<SequenceFile> {
        let view = archive.file(sound.file_index as usize, FileHalf::Main, ctx)?;
        let seq = SequenceFile::parse(Chunk::load_root(&view)?, &ctx.options)?;
        Ok(seq)
    }

    fn report_warnings(warnings: &[String], options: &CliOptions) {
        if options.verbose {
            for warning in warnings {
                eprintln!("warning: {warning}");
            }
        }
    }

    fn render_sequence(
        archive: &SoundArchive,
        ctx: &ArchiveContext,
        name: &str,
        options: &CliOptions,
    ) -> anyhow::Result<()> {
        let sound = find_sequence(archive, name)?;
        let SoundPayload::Seq(seq_data) = sound.payload else {
            bail!("'{}' is not a sequence", sound.name);
        };
        if seq_data.bank_index < 0 {
            bail!("sequence '{}' has no bank", sound.name);
        }
        let info = archive.info()?;
        let bank_entry = info
            .banks
            .get(seq_data.bank_index as usize)
            .with_context(|| format!("bank index {} out of range", seq_data.bank_index))?;

        let seq = load_sequence(archive, ctx, sound)?;
        let bank_view = archive.file(bank_entry.file_index as usize, FileHalf::Main, ctx)?;
        let bank = BankFile::parse(Chunk::load_root(&bank_view)?)?;
        let wave_view = archive.file(bank_entry.file_index as usize, FileHalf::Audio, ctx)?;
        let waves = WaveArchive::parse(Chunk::load_root(&wave_view)?)?;

        // Fresh cache for each top-level render pass.
        ctx.purge_samples();

        let mut player = SequencePlayer::new(&seq, &bank, &waves, ctx);
        let mut renderer = SequenceRenderer::new(RenderConfig {
            sample_rate: options.sample_rate,
            channels: 2,
        });
        player.translate_into(&mut renderer)?;

        let output = options
            .out
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.wav", sound.name)));
        println!(
            "Rendering {} ({:.1}s) to {}...",
            sound.name,
            renderer.end_time(),
            output.display()
        );
        export_to_wav(&mut renderer, &output)?;

        if player.dropped_notes() > 0 {
            eprintln!(
                "warning: {} note(s) dropped (no resolvable sample)",
                player.dropped_notes()
            );
        }
        report_warnings(&seq.warnings, options);
        report_warnings(&player.warnings, options);
        println!("Render complete");
        Ok(())
    }
}
