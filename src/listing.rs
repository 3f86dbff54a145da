//! Archive listing actions and the wildcard matcher that filters them.

use crate::archive::{FileHalf, SoundArchive};
use crate::bank::BankFile;
use crate::chunk::Chunk;
use crate::context::ArchiveContext;
use crate::error::Result;
use crate::info::{SoundPayload, SoundType};
use crate::seq::SequenceFile;
use crate::wave::{WaveArchive, WaveFormat};

/// A `*`-wildcard pattern. Literal sections anchor to the start and end of
/// the subject; an empty pattern matches everything.
pub struct Glob {
    sections: Vec<String>,
}

impl Glob {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Self {
        if pattern.is_empty() {
            return Glob {
                sections: Vec::new(),
            };
        }
        let mut sections = Vec::new();
        let mut section = String::new();
        for ch in pattern.chars() {
            if ch == '*' {
                sections.push(std::mem::take(&mut section));
            } else {
                section.push(ch);
            }
        }
        sections.push(section);
        Glob { sections }
    }

    /// Whether `subject` matches the pattern.
    pub fn matches(&self, subject: &str) -> bool {
        if self.sections.is_empty() {
            return true;
        }
        let count = self.sections.len();
        let mut position = 0;
        for (i, section) in self.sections.iter().enumerate() {
            if section.is_empty() {
                continue;
            }
            let Some(found) = subject[position..].find(section.as_str()) else {
                return false;
            };
            let found = position + found;
            if i == 0 && found != 0 {
                return false;
            }
            position = found + section.len();
            if i == count - 1 && position != subject.len() {
                return false;
            }
        }
        true
    }
}

/// What to enumerate from an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Sequenced sounds.
    Seq,
    /// Streamed sounds.
    Strm,
    /// Wave sounds.
    Wave,
    /// Logical files.
    File,
    /// File groups.
    Group,
    /// Players.
    Player,
    /// Instrument banks.
    Bank,
    /// Sequence entry-point labels.
    Label,
}

impl ListKind {
    /// Parse a CLI list-type keyword.
    pub fn from_keyword(keyword: &str) -> Option<ListKind> {
        match keyword {
            "seq" => Some(ListKind::Seq),
            "strm" => Some(ListKind::Strm),
            "wave" => Some(ListKind::Wave),
            "file" => Some(ListKind::File),
            "group" => Some(ListKind::Group),
            "player" => Some(ListKind::Player),
            "bank" => Some(ListKind::Bank),
            "label" => Some(ListKind::Label),
            _ => None,
        }
    }
}

/// The outcome of one listing action.
pub struct ListResult {
    /// Heading, e.g. "Sequences".
    pub list_type: &'static str,
    /// Lowercase form for "no ... found" messages.
    pub list_type_lc: &'static str,
    /// Whether only named entries are listed.
    pub named_only: bool,
    /// One line per match; lines starting with a tab are detail rows.
    pub matches: Vec<String>,
}

impl ListResult {
    fn new(list_type: &'static str, list_type_lc: &'static str) -> Self {
        ListResult {
            list_type,
            list_type_lc,
            named_only: false,
            matches: Vec::new(),
        }
    }
}

/// Run one listing action against an opened archive.
pub fn list_members(
    archive: &SoundArchive,
    ctx: &ArchiveContext,
    kind: ListKind,
    glob: &Glob,
    seq_glob: &Glob,
) -> Result<ListResult> {
    match kind {
        ListKind::Seq => list_by_sound_type(archive, ctx, glob, SoundType::Seq),
        ListKind::Strm => list_by_sound_type(archive, ctx, glob, SoundType::Strm),
        ListKind::Wave => list_by_sound_type(archive, ctx, glob, SoundType::Wave),
        ListKind::File => list_files(archive, ctx),
        ListKind::Group => list_groups(archive),
        ListKind::Player => list_players(archive),
        ListKind::Bank => list_banks(archive, ctx, glob),
        ListKind::Label => list_labels(archive, ctx, glob, seq_glob),
    }
}

fn load_sequence(
    archive: &SoundArchive,
    ctx: &ArchiveContext,
    file_index: u32,
) -> Result<SequenceFile> {
    let view = archive.file(file_index as usize, FileHalf::Main, ctx)?;
    SequenceFile::parse(Chunk::load_root(&view)?, &ctx.options)
}

fn list_by_sound_type(
    archive: &SoundArchive,
    ctx: &ArchiveContext,
    glob: &Glob,
    sound_type: SoundType,
) -> Result<ListResult> {
    let (list_type, list_type_lc) = match sound_type {
        SoundType::Seq => ("Sequences", "sequences"),
        SoundType::Strm => ("Streams", "streams"),
        SoundType::Wave => ("Waves", "waves"),
    };
    let mut result = ListResult::new(list_type, list_type_lc);
    let info = archive.info()?;

    for sound in &info.sounds {
        if sound.payload.sound_type() != sound_type || !glob.matches(&sound.name) {
            continue;
        }
        result.matches.push(sound.name.clone());
        let SoundPayload::Seq(seq_data) = sound.payload else {
            continue;
        };
        if seq_data.label_entry != 0 {
            if let Ok(seq) = load_sequence(archive, ctx, sound.file_index) {
                if let Some(label) = seq.label(seq_data.label_entry as usize) {
                    result.matches.push(format!("\tEntrypoint: {label}"));
                }
            }
        }
        if seq_data.bank_index >= 0 {
            if let Some(bank) = info.banks.get(seq_data.bank_index as usize) {
                result.matches.push(format!("\tBank: {}", bank.name));
            }
        }
    }
    Ok(result)
}

fn sniff_magic(archive: &SoundArchive, ctx: &ArchiveContext, index: usize, half: FileHalf) -> String {
    let Ok(view) = archive.file(index, half, ctx) else {
        return "unknown".to_string();
    };
    match view.view(0, 4) {
        Ok(head) => {
            let bytes = head.bytes();
            if bytes.iter().all(|b| b.is_ascii_uppercase()) {
                String::from_utf8_lossy(bytes).into_owned()
            } else {
                "unknown".to_string()
            }
        }
        Err(_) => "unknown".to_string(),
    }
}

fn list_files(archive: &SoundArchive, ctx: &ArchiveContext) -> Result<ListResult> {
    let mut result = ListResult::new("Files", "files");
    result.named_only = true;
    let info = archive.info()?;

    for (index, file) in info.files.iter().enumerate() {
        if let Some(name) = &file.external_name {
            result.matches.push(format!("{name} (external)"));
            continue;
        } else if !file.positions.is_empty() {
            for (i, pos) in file.positions.iter().enumerate() {
                let group = &info.groups[pos.group as usize];
                let group_name = if group.name.is_empty() {
                    "nameless_group"
                } else {
                    &group.name
                };
                let prefix = if i == 0 { "" } else { "  + " };
                result
                    .matches
                    .push(format!("{prefix}{group_name}#{}", pos.index));
            }
        } else if file.main_size > 0 || file.audio_size > 0 {
            result.matches.push(format!("nameless_file#{index}"));
        }

        if file.main_size > 0 {
            let magic = sniff_magic(archive, ctx, index, FileHalf::Main);
            result.matches.push(format!("\tMain Type: {magic}"));
        }
        if file.audio_size > 0 {
            let magic = sniff_magic(archive, ctx, index, FileHalf::Audio);
            result.matches.push(format!("\tAudio Type: {magic}"));
        }
    }
    Ok(result)
}

fn list_groups(archive: &SoundArchive) -> Result<ListResult> {
    let mut result = ListResult::new("Groups", "groups");
    for group in &archive.info()?.groups {
        let name = if group.name.is_empty() {
            "nameless_group"
        } else {
            &group.name
        };
        result
            .matches
            .push(format!("{name} ({} items)", group.items.len()));
        if let Some(path) = &group.external_path {
            result.matches.push(format!("\tExternal file: {path}"));
        }
    }
    Ok(result)
}

fn list_players(archive: &SoundArchive) -> Result<ListResult> {
    let mut result = ListResult::new("Players", "players");
    for player in &archive.info()?.players {
        result.matches.push(player.name.clone());
    }
    Ok(result)
}

fn list_banks(archive: &SoundArchive, ctx: &ArchiveContext, glob: &Glob) -> Result<ListResult> {
    let mut result = ListResult::new("Banks", "banks");
    let info = archive.info()?;

    for bank_entry in &info.banks {
        if !glob.matches(&bank_entry.name) {
            continue;
        }
        let file_entry = info.files.get(bank_entry.file_index as usize);
        let location = file_entry
            .and_then(|f| f.external_name.clone())
            .map(|name| format!(" (in {name})"))
            .unwrap_or_default();
        result.matches.push(format!("{}{location}", bank_entry.name));

        if !ctx.options.verbose || file_entry.is_none() {
            continue;
        }
        let Ok(bank_view) = archive.file(bank_entry.file_index as usize, FileHalf::Main, ctx)
        else {
            continue;
        };
        let Ok(bank) = Chunk::load_root(&bank_view).and_then(BankFile::parse) else {
            continue;
        };
        let waves = archive
            .file(bank_entry.file_index as usize, FileHalf::Audio, ctx)
            .and_then(|view| Chunk::load_root(&view))
            .and_then(WaveArchive::parse)
            .ok();

        for (program_index, program) in bank.programs().iter().enumerate() {
            result.matches.push(format!("\tProgram {program_index}:"));
            for key_split in &program.key_splits {
                for vel_split in &key_split.vel_splits {
                    let sample = &vel_split.sample;
                    result.matches.push(format!(
                        "\t  Wave {} [{}-{}] ({}-{}) A={} H={} D={} S={} R={}",
                        sample.wave.pointer,
                        key_split.min_key,
                        key_split.max_key,
                        vel_split.min_vel,
                        vel_split.max_vel,
                        sample.attack,
                        sample.hold,
                        sample.decay,
                        sample.sustain,
                        sample.release,
                    ));
                    let Some(waves) = waves.as_ref() else {
                        continue;
                    };
                    let Ok(wave) = waves.wave(sample.wave.pointer as usize) else {
                        continue;
                    };
                    let format = match wave.format {
                        WaveFormat::Pcm8 => "PCM8",
                        WaveFormat::Pcm16 => "PCM16",
                        WaveFormat::Adpcm => "ADPCM",
                    };
                    let mut detail = format!(
                        "\t\t {format} {}Hz {}ch",
                        wave.sample_rate,
                        wave.channels.len()
                    );
                    if wave.looped {
                        match waves.sample(sample.wave.pointer as usize, ctx) {
                            Ok(decoded) => detail.push_str(&format!(
                                " loop ({}-{})",
                                decoded.loop_start.unwrap_or(0),
                                decoded.loop_end.unwrap_or(0)
                            )),
                            Err(_) => detail.push_str(" (decoding error)"),
                        }
                    }
                    result.matches.push(detail);
                }
            }
        }
    }
    Ok(result)
}

fn list_labels(
    archive: &SoundArchive,
    ctx: &ArchiveContext,
    glob: &Glob,
    seq_glob: &Glob,
) -> Result<ListResult> {
    let mut result = ListResult::new("Labels", "labels");
    let info = archive.info()?;

    for sound in &info.sounds {
        if sound.payload.sound_type() != SoundType::Seq || !seq_glob.matches(&sound.name) {
            continue;
        }
        let Ok(seq) = load_sequence(archive, ctx, sound.file_index) else {
            continue;
        };
        let mut found = false;
        for label in seq.labels() {
            if !glob.matches(&label.name) {
                continue;
            }
            found = true;
            result.matches.push(format!("{}\\{}", sound.name, label.name));
        }
        if !found {
            result.matches.push(sound.name.clone());
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_empty_matches_everything() {
        let glob = Glob::new("");
        assert!(glob.matches("anything"));
        assert!(glob.matches(""));
    }

    #[test]
    fn test_glob_literal_is_exact() {
        let glob = Glob::new("BGM_TITLE");
        assert!(glob.matches("BGM_TITLE"));
        assert!(!glob.matches("BGM_TITLE2"));
        assert!(!glob.matches("X_BGM_TITLE"));
    }

    #[test]
    fn test_glob_wildcards_anchor_sections() {
        let glob = Glob::new("BGM_*");
        assert!(glob.matches("BGM_TITLE"));
        assert!(!glob.matches("SE_BGM_X"));

        let glob = Glob::new("*_TITLE");
        assert!(glob.matches("BGM_TITLE"));
        assert!(!glob.matches("BGM_TITLE2"));

        let glob = Glob::new("BGM*LE");
        assert!(glob.matches("BGM_TITLE"));
        assert!(glob.matches("BGMLE"));
        assert!(!glob.matches("BGM_TITLES"));
    }

    #[test]
    fn test_list_kind_keywords() {
        assert_eq!(ListKind::from_keyword("seq"), Some(ListKind::Seq));
        assert_eq!(ListKind::from_keyword("bank"), Some(ListKind::Bank));
        assert_eq!(ListKind::from_keyword("nope"), None);
    }
}
